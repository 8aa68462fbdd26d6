//! Bearer token extraction.

/// Extract a bearer token from an `Authorization` header value.
///
/// Accepts only the case-sensitive `Bearer ` prefix. Whitespace around the
/// token is trimmed; an empty token after trimming is treated as absent.
pub fn extract_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(extract_bearer("Bearer   tok  "), Some("tok"));
    }

    #[test]
    fn prefix_is_case_sensitive() {
        assert_eq!(extract_bearer("bearer tok"), None);
        assert_eq!(extract_bearer("BEARER tok"), None);
        assert_eq!(extract_bearer("Basic dXNlcjpwYXNz"), None);
    }

    #[test]
    fn empty_token_is_none() {
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Bearer    "), None);
        assert_eq!(extract_bearer(""), None);
    }
}
