//! Name lookup for distribution families.

use super::Distribution;
use crate::error::{DistBoostError, Result};
use std::collections::BTreeSet;

/// Resolve a distribution by name, ignoring case and surrounding whitespace.
pub fn get_distribution(name: &str) -> Result<Distribution> {
    let wanted = name.trim();
    Distribution::ALL
        .iter()
        .copied()
        .find(|d| d.name().eq_ignore_ascii_case(wanted))
        .ok_or_else(|| DistBoostError::UnknownDistribution {
            name: name.to_string(),
            available: list_distributions().into_iter().collect::<Vec<_>>().join(", "),
        })
}

/// Names of every registered distribution.
pub fn list_distributions() -> BTreeSet<&'static str> {
    Distribution::ALL.iter().map(|d| d.name()).collect()
}

/// One line per family: name, parameters and their links.
pub fn describe_distributions() -> String {
    let mut lines = Vec::with_capacity(Distribution::ALL.len());
    for dist in Distribution::ALL {
        let params: Vec<String> = dist
            .params()
            .iter()
            .map(|p| format!("{} ({})", p.name, p.link.name()))
            .collect();
        lines.push(format!("{}: {}", dist.name(), params.join(", ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(get_distribution("normal").unwrap(), Distribution::Normal);
        assert_eq!(get_distribution("NORMAL").unwrap(), Distribution::Normal);
        assert_eq!(get_distribution(" LogNormal ").unwrap(), Distribution::LogNormal);
    }

    #[test]
    fn test_unknown_name() {
        let err = get_distribution("not_a_real_one").unwrap_err();
        match err {
            DistBoostError::UnknownDistribution { name, available } => {
                assert_eq!(name, "not_a_real_one");
                assert!(available.contains("normal"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_list_distributions() {
        let names = list_distributions();
        assert_eq!(names.len(), 5);
        for expected in ["normal", "lognormal", "laplace", "exponential", "poisson"] {
            assert!(names.contains(expected));
        }
    }

    #[test]
    fn test_describe_mentions_every_param() {
        let doc = describe_distributions();
        assert!(doc.contains("normal: loc (identity), scale (exp)"));
        assert!(doc.contains("poisson: mu (exp)"));
    }
}
