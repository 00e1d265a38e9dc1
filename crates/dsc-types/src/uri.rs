//! URI normalization for identifier comparison.
//!
//! Connector, resource and artifact identifiers are absolute URIs that
//! peers are free to spell differently (`HTTPS://Host:443/a/` and
//! `https://host/a` name the same thing). Every identifier comparison in
//! the connector goes through [`uris_equal`].

use url::Url;

/// Returns the normalized form of an absolute URI.
///
/// Scheme and host are lowercased, default ports dropped, and a trailing
/// slash on the path removed. Strings that do not parse as absolute URIs
/// are returned trimmed but otherwise untouched.
pub fn normalize_uri(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            let path = url.path().trim_end_matches('/').to_string();
            if url.cannot_be_a_base() {
                return url.to_string();
            }
            url.set_path(&path);
            let mut normalized = url.to_string();
            if path.is_empty() && url.query().is_none() && normalized.ends_with('/') {
                normalized.pop();
            }
            normalized
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Compares two URIs by their normalized absolute form.
pub fn uris_equal(a: &str, b: &str) -> bool {
    a == b || normalize_uri(a) == normalize_uri(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_and_default_port_are_ignored() {
        assert!(uris_equal(
            "HTTPS://Provider.Example.com:443/artifacts/1",
            "https://provider.example.com/artifacts/1"
        ));
    }

    #[test]
    fn trailing_slash_is_ignored() {
        assert!(uris_equal(
            "https://provider.example.com/",
            "https://provider.example.com"
        ));
        assert!(uris_equal(
            "https://provider.example.com/artifacts/1/",
            "https://provider.example.com/artifacts/1"
        ));
    }

    #[test]
    fn different_paths_differ() {
        assert!(!uris_equal(
            "https://provider.example.com/artifacts/1",
            "https://provider.example.com/artifacts/2"
        ));
    }

    #[test]
    fn non_default_port_is_significant() {
        assert!(!uris_equal(
            "https://provider.example.com:8443/a",
            "https://provider.example.com/a"
        ));
    }

    #[test]
    fn urns_compare_verbatim() {
        assert!(uris_equal("urn:uuid:1234", "urn:uuid:1234"));
        assert!(!uris_equal("urn:uuid:1234", "urn:uuid:5678"));
    }

    #[test]
    fn unparseable_strings_are_trimmed() {
        assert_eq!(normalize_uri("  not a uri "), "not a uri");
    }
}
