use crate::error::Result;
use crate::sanitizer::QuerySanitizer;

/// Execute the `sanitize` command: print the text as it would leave the process.
pub fn execute(text: &str, sanitizer: &QuerySanitizer) -> Result<()> {
    println!("{}", sanitizer.sanitize(text));
    Ok(())
}
