//! Secret-value redaction

use std::collections::HashMap;

use crate::constants::SECRET_MASK;

/// Replace every non-empty secret value in `text` with the mask.
///
/// Matching is on values, not names: a secret that leaks into output through
/// any channel (env echo, error message, string formatting) is scrubbed.
pub fn mask_secrets(text: &str, secrets: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for value in secrets.values() {
        if value.is_empty() {
            continue;
        }
        out = out.replace(value.as_str(), SECRET_MASK);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_masks_all_occurrences() {
        let s = secrets(&[("API_KEY", "my-super-secret-12345")]);
        let out = mask_secrets(
            "key=my-super-secret-12345 again: my-super-secret-12345",
            &s,
        );
        assert_eq!(out, "key=*** again: ***");
        assert!(!out.contains("my-super-secret-12345"));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let s = secrets(&[("EMPTY", "")]);
        assert_eq!(mask_secrets("nothing to hide", &s), "nothing to hide");
    }

    #[test]
    fn test_multiple_secrets() {
        let s = secrets(&[("A", "alpha-token"), ("B", "beta-token")]);
        let out = mask_secrets("alpha-token beta-token plain", &s);
        assert_eq!(out, "*** *** plain");
    }
}
