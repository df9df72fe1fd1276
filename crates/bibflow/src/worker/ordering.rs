//! Numeric-aware file name ordering.
//!
//! Names are split into digit and non-digit runs. Runs are compared pairwise,
//! digit runs by value and everything else lexically, so `file2` sorts before
//! `file10`. Names that compare equal run by run fall back to a plain
//! lexical comparison, which makes the order total.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static RE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+|\D+").unwrap());

fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn is_digits(run: &str) -> bool {
    run.bytes().all(|b| b.is_ascii_digit())
}

pub fn compare_names(a: &str, b: &str) -> Ordering {
    let mut left = RE_RUN.find_iter(a).map(|m| m.as_str());
    let mut right = RE_RUN.find_iter(b).map(|m| m.as_str());

    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = if is_digits(x) && is_digits(y) {
                    compare_digits(x, y)
                } else {
                    x.cmp(y)
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn name_of(path: &Path) -> std::borrow::Cow<'_, str> {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default()
}

/// Sorts paths by file name using [`compare_names`].
pub fn sort_paths(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| compare_names(&name_of(a), &name_of(b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(names: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        names.sort_by(|a, b| compare_names(a, b));
        names
    }

    #[test]
    fn test_numeric_runs_compare_by_value() {
        assert_eq!(compare_names("file2.mrc", "file10.mrc"), Ordering::Less);
        assert_eq!(compare_names("file10.mrc", "file9.mrc"), Ordering::Greater);
        assert_eq!(
            sorted(&["b1.xml", "a10.xml", "a2.xml", "a1.xml"]),
            vec!["a1.xml", "a2.xml", "a10.xml", "b1.xml"]
        );
    }

    #[test]
    fn test_order_is_independent_of_input_permutation() {
        let expected = sorted(&["x.mrc", "file10.mrc", "file2.mrc", "file02.mrc", "File3.mrc"]);
        let permutations: [&[&str]; 3] = [
            &["file2.mrc", "file02.mrc", "x.mrc", "File3.mrc", "file10.mrc"],
            &["File3.mrc", "x.mrc", "file10.mrc", "file02.mrc", "file2.mrc"],
            &["file02.mrc", "file2.mrc", "File3.mrc", "file10.mrc", "x.mrc"],
        ];
        for names in permutations {
            assert_eq!(sorted(names), expected);
        }
    }

    #[test]
    fn test_leading_zeros_tie_break_lexically() {
        assert_eq!(compare_names("file02.mrc", "file2.mrc"), Ordering::Less);
        assert_eq!(compare_names("file2.mrc", "file2.mrc"), Ordering::Equal);
    }

    #[test]
    fn test_very_long_digit_runs() {
        assert_eq!(
            compare_names("batch99999999999999999999999.mrc", "batch100000000000000000000000.mrc"),
            Ordering::Less
        );
    }

    #[test]
    fn test_sort_paths_uses_file_names() {
        let mut paths = vec![
            PathBuf::from("/z/file10.mrc"),
            PathBuf::from("/a/file2.mrc"),
        ];
        sort_paths(&mut paths);
        assert_eq!(paths[0], PathBuf::from("/a/file2.mrc"));
    }
}
