//! Host-pattern glob matching: `*` matches exactly one dot-delimited
//! label, `**` matches one or more labels, anything else must match a
//! label literally. No crate in the corpus implements this exact
//! two-class wildcard semantics, so it's hand-written.

/// A label is a valid wildcard only if it is exactly `*` or `**`; any
/// other occurrence of `*` within a label (e.g. `a*b`, `*b`) is not a
/// supported pattern.
pub fn is_valid_pattern(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    pattern.split('.').all(|label| {
        if label.is_empty() {
            return false;
        }
        if label.contains('*') {
            label == "*" || label == "**"
        } else {
            true
        }
    })
}

pub fn matches(pattern: &str, host: &str) -> bool {
    let pattern_labels: Vec<&str> = pattern.split('.').collect();
    let host_labels: Vec<&str> = host.split('.').collect();
    matches_labels(&pattern_labels, &host_labels)
}

fn matches_labels(pattern: &[&str], host: &[&str]) -> bool {
    match pattern.first() {
        None => host.is_empty(),
        Some(&"**") => {
            if host.is_empty() {
                return false;
            }
            // `**` must consume at least one label; try every split.
            (1..=host.len()).any(|consumed| matches_labels(&pattern[1..], &host[consumed..]))
        }
        Some(&"*") => {
            if host.is_empty() {
                return false;
            }
            matches_labels(&pattern[1..], &host[1..])
        }
        Some(literal) => match host.first() {
            Some(first) if first == literal => matches_labels(&pattern[1..], &host[1..]),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_label_wildcard_does_not_cross_labels() {
        assert!(!matches("*.example.com", "a.b.example.com"));
        assert!(matches("*.example.com", "a.example.com"));
    }

    #[test]
    fn double_label_wildcard_requires_at_least_one_label() {
        assert!(matches("**.example.com", "a.b.example.com"));
        assert!(!matches("**.example.com", "example.com"));
    }

    #[test]
    fn literal_pattern_matches_exactly() {
        assert!(matches("api.internal", "api.internal"));
        assert!(!matches("api.internal", "api.internal.extra"));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert!(!is_valid_pattern("a*b.example.com"));
        assert!(!is_valid_pattern("*b.example.com"));
        assert!(is_valid_pattern("*.example.com"));
        assert!(is_valid_pattern("**.example.com"));
        assert!(is_valid_pattern("api.internal"));
        assert!(!is_valid_pattern(""));
    }

    proptest! {
        #[test]
        fn literal_pattern_always_matches_itself(
            labels in proptest::collection::vec("[a-z]{1,6}", 1..5)
        ) {
            let host = labels.join(".");
            prop_assert!(matches(&host, &host));
        }

        #[test]
        fn double_wildcard_prefix_matches_any_suffix_with_extra_labels(
            prefix in proptest::collection::vec("[a-z]{1,6}", 1..4),
            suffix in proptest::collection::vec("[a-z]{1,6}", 1..4),
        ) {
            let pattern = format!("**.{}", suffix.join("."));
            let host = format!("{}.{}", prefix.join("."), suffix.join("."));
            prop_assert!(matches(&pattern, &host));
        }
    }
}
