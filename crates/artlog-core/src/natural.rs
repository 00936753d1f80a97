//! Numeric-aware ordering of rotated log file names.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

/// Splits a name into alternating digit and non-digit runs.
static CHUNK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+|\D+").unwrap());

/// Compares two strings so that embedded numbers order by value
/// (`engine.log.2` < `engine.log.10`).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = CHUNK_RE.find_iter(a).map(|m| m.as_str());
    let mut right = CHUNK_RE.find_iter(b).map(|m| m.as_str());

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = compare_chunks(l, r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn compare_chunks(l: &str, r: &str) -> Ordering {
    let l_numeric = l.bytes().all(|b| b.is_ascii_digit());
    let r_numeric = r.bytes().all(|b| b.is_ascii_digit());
    match (l_numeric, r_numeric) {
        (true, true) => {
            // Compare by magnitude without parsing, so arbitrarily long runs work.
            let l_digits = l.trim_start_matches('0');
            let r_digits = r.trim_start_matches('0');
            l_digits
                .len()
                .cmp(&r_digits.len())
                .then_with(|| l_digits.cmp(r_digits))
                .then_with(|| l.len().cmp(&r.len()))
        }
        // Numbers sort before text.
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => l.cmp(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut names: Vec<&str>) -> Vec<&str> {
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }

    #[test]
    fn numbers_order_by_value() {
        assert_eq!(
            sorted(vec!["vdsm.log.10.xz", "vdsm.log.2.xz", "vdsm.log.1.xz"]),
            vec!["vdsm.log.1.xz", "vdsm.log.2.xz", "vdsm.log.10.xz"]
        );
    }

    #[test]
    fn unnumbered_file_sorts_first() {
        assert_eq!(
            sorted(vec![
                "engine.log-20240302.gz",
                "engine.log",
                "engine.log-20240301.gz"
            ]),
            vec![
                "engine.log",
                "engine.log-20240301.gz",
                "engine.log-20240302.gz"
            ]
        );
    }

    #[test]
    fn leading_zeros_and_long_runs() {
        assert_eq!(natural_cmp("a007", "a7"), Ordering::Greater);
        assert_eq!(natural_cmp("a07", "a8"), Ordering::Less);
        assert_eq!(
            natural_cmp("log.123456789012345678901234567890", "log.99"),
            Ordering::Greater
        );
    }

    #[test]
    fn equal_names() {
        assert_eq!(natural_cmp("art_test_runner.log", "art_test_runner.log"), Ordering::Equal);
        assert_eq!(natural_cmp("", ""), Ordering::Equal);
    }
}
