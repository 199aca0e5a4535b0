//! Filtering of credentials and secrets out of logged request data.

const SENSITIVE_MARKERS: &[&str] = &[
    "user",
    "pass",
    "pwd",
    "secret",
    "token",
    "apikey",
    "api-key",
    "api_key",
    "authorization",
    "cookie",
];

/// True when a parameter or header name looks like it carries a secret.
pub fn is_sensitive(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Copy of `pairs` with sensitive entries dropped, order preserved.
pub fn redact_pairs(pairs: &[(String, String)]) -> Vec<(&str, &str)> {
    pairs
        .iter()
        .filter(|(name, _)| !is_sensitive(name))
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn drops_credentials_keeps_the_rest() {
        let input = pairs(&[
            ("offset", "0"),
            ("username", "alice"),
            ("Password", "hunter2"),
            ("limit", "50"),
            ("apiKey", "k"),
        ]);
        assert_eq!(redact_pairs(&input), vec![("offset", "0"), ("limit", "50")]);
    }

    #[test]
    fn header_names_are_matched_case_insensitively() {
        assert!(is_sensitive("Authorization"));
        assert!(is_sensitive("X-Api-Key"));
        assert!(is_sensitive("Cookie"));
        assert!(!is_sensitive("Idempotency-Key"));
        assert!(!is_sensitive("Accept"));
    }
}
