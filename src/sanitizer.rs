//! Query sanitizer
//!
//! Turns free text into a representation that is safe to place on the wire:
//! quote characters and special characters are removed, then the result is
//! truncated. The transformation is pure and never fails.

use crate::policy::SanitizationPolicy;

/// Punctuation kept when special characters are stripped
const BASIC_PUNCTUATION: &[char] = &['-', '_', '.', ','];

/// Whether `c` is a quotation mark (ASCII and typographic)
pub fn is_quote_char(c: char) -> bool {
    matches!(
        c,
        '"' | '\''
            | '`'
            | '\u{00AB}' // «
            | '\u{00BB}' // »
            | '\u{2018}'
            | '\u{2019}'
            | '\u{201A}'
            | '\u{201B}'
            | '\u{201C}'
            | '\u{201D}'
            | '\u{201E}'
            | '\u{201F}'
            | '\u{2039}'
            | '\u{203A}'
            | '\u{FF02}'
            | '\u{FF07}'
    )
}

/// Whether `c` survives special-character stripping
pub fn is_allowed_char(c: char) -> bool {
    c.is_alphanumeric() || c == ' ' || BASIC_PUNCTUATION.contains(&c)
}

/// Sanitize `raw` under `policy`
///
/// Idempotent: `sanitize(&sanitize(s, p), p) == sanitize(s, p)`.
pub fn sanitize(raw: &str, policy: &SanitizationPolicy) -> String {
    raw.chars()
        .filter(|&c| !(policy.strip_quote_characters && is_quote_char(c)))
        .filter_map(|c| {
            if !policy.strip_special_characters || is_allowed_char(c) {
                Some(c)
            } else if c.is_whitespace() {
                // tabs and newlines become plain spaces
                Some(' ')
            } else {
                None
            }
        })
        .take(policy.max_query_length)
        .collect()
}

/// Stateless sanitizer bound to a policy
///
/// Cheap to copy and safe to share across tasks.
#[derive(Debug, Clone, Copy)]
pub struct QuerySanitizer {
    policy: SanitizationPolicy,
}

impl QuerySanitizer {
    pub fn new(policy: SanitizationPolicy) -> Self {
        Self { policy }
    }

    pub fn sanitize(&self, raw: &str) -> String {
        sanitize(raw, &self.policy)
    }

    pub fn policy(&self) -> &SanitizationPolicy {
        &self.policy
    }
}

impl Default for QuerySanitizer {
    fn default() -> Self {
        Self::new(SanitizationPolicy::default())
    }
}
