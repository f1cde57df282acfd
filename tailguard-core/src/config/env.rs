//! Parsing primitives for environment values
//!
//! These helpers never fail: malformed input degrades to the documented
//! default or is passed through untouched.

/// Spellings accepted as `true`, compared case-insensitively
pub const TRUTHY: [&str; 6] = ["1", "t", "true", "y", "yes", "on"];

/// Parse a boolean flag
///
/// Absent or empty values yield `default`. Any non-empty value outside
/// [`TRUTHY`] is `false`.
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        None | Some("") => default,
        Some(v) => TRUTHY.iter().any(|t| v.eq_ignore_ascii_case(t)),
    }
}

/// Strip one matching pair of wrapping `'` or `"` quotes
///
/// One-sided, mismatched, or nested quoting is left alone.
pub fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Split an argument-list value on whitespace and unquote each token
///
/// A token opening with a quote runs to the next matching quote that sits
/// right before whitespace or the end of input, so `'--y=2 3'` stays one
/// argument. Without such a closing quote the token ends at the next
/// whitespace and keeps its lone quote.
pub fn split_args(value: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut rest = value.trim_start();

    while !rest.is_empty() {
        let end = match rest.as_bytes()[0] {
            quote @ (b'\'' | b'"') => closing_quote_end(rest, quote).unwrap_or_else(|| token_end(rest)),
            _ => token_end(rest),
        };
        args.push(unquote(&rest[..end]).to_string());
        rest = rest[end..].trim_start();
    }

    args
}

/// Byte offset just past the first whitespace-delimited token
fn token_end(s: &str) -> usize {
    s.find(char::is_whitespace).unwrap_or(s.len())
}

/// Byte offset just past the quote closing the one at position 0
fn closing_quote_end(s: &str, quote: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    (1..bytes.len())
        .find(|&i| bytes[i] == quote && s[i + 1..].chars().next().map_or(true, char::is_whitespace))
        .map(|i| i + 1)
}

/// Return the value unless it is absent or empty
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
