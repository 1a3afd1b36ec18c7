//! Content-type normalisation, as used for stream creation and append
//! comparisons (case-insensitive, whitespace trimmed, params stripped).

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Strip `;charset=...`-style parameters, trim whitespace, and lowercase.
pub fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

pub fn content_types_match(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

pub fn is_json(content_type: &str) -> bool {
    normalize(content_type) == JSON_CONTENT_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_params() {
        assert_eq!(normalize("Application/JSON; charset=utf-8"), "application/json");
    }

    #[test]
    fn matches_ignore_whitespace_and_case() {
        assert!(content_types_match(" text/plain ", "TEXT/PLAIN"));
        assert!(!content_types_match("text/plain", "application/json"));
    }
}
