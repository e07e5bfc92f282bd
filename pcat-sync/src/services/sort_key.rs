//! Suffix sort keys
//!
//! Images taken on the same day carry a free-form suffix after the date
//! (`1990-05-02B.jpg`, `1990-05-02 2.jpg`, `1990-05-02.O.jpg`,
//! `1990-05-02 copy.jpg`). [`derive`] maps that suffix onto a string key whose
//! plain lexicographic order is the display order:
//!
//! | class | suffix shape                          | example      | key          |
//! |-------|---------------------------------------|--------------|--------------|
//! | `0`   | empty / whitespace                    | ``           | `0`          |
//! | `A`   | letters only                          | `b`          | `A_B`        |
//! | `N`   | digits, then anything                 | `2b`         | `N_002_B`    |
//! | `P`   | one separator, then letters only      | `.O`         | `P_O`        |
//! | `Y`   | contains `copy` (any case)            | ` copy a`    | `Y__COPY_ A` |
//! | `Z`   | anything else                         | `!!!`        | `Z_!!!`      |
//!
//! Classes order `0 < A < N < P < Y < Z` because the class letters do in ASCII.
//! A suffix containing the `copy` token never lands in class `A`, so every
//! copy variant sorts together. Digit runs are padded to width 3; longer runs
//! keep their length and sort after shorter ones only lexicographically.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width digit runs are zero-padded to
const NUMERIC_WIDTH: usize = 3;

/// Totally ordered key derived from a filename suffix
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortKey(String);

impl SortKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the sort key of a raw suffix
///
/// Total and deterministic: every input yields a key.
pub fn derive(raw_suffix: &str) -> SortKey {
    let suffix = raw_suffix.trim();

    if suffix.is_empty() {
        return SortKey("0".to_string());
    }

    let upper = suffix.to_uppercase();
    let has_copy = upper.contains("COPY");

    if !has_copy && suffix.chars().all(char::is_alphabetic) {
        return SortKey(format!("A_{}", upper));
    }

    let digit_len = suffix
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(suffix.len());
    if digit_len > 0 {
        let (digits, rest) = suffix.split_at(digit_len);
        return SortKey(format!(
            "N_{:0>width$}_{}",
            digits,
            rest.to_uppercase(),
            width = NUMERIC_WIDTH
        ));
    }

    let mut chars = suffix.chars();
    if let Some(first) = chars.next() {
        let rest = chars.as_str();
        if !first.is_alphanumeric() && !rest.is_empty() && rest.chars().all(char::is_alphabetic) {
            return SortKey(format!("P_{}", rest.to_uppercase()));
        }
    }

    if has_copy {
        return SortKey(format!("Y_{}", upper.replace("COPY", "_COPY_")));
    }

    SortKey(format!("Z_{}", upper))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_ordering() {
        let ordered = ["", "B", "2", ".O", "copy", "!!!"];
        let keys: Vec<SortKey> = ordered.iter().map(|s| derive(s)).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_known_keys() {
        assert_eq!(derive("").as_str(), "0");
        assert_eq!(derive("   ").as_str(), "0");
        assert_eq!(derive("b").as_str(), "A_B");
        assert_eq!(derive("GA").as_str(), "A_GA");
        assert_eq!(derive(" 1").as_str(), "N_001_");
        assert_eq!(derive("2B").as_str(), "N_002_B");
        assert_eq!(derive(".O").as_str(), "P_O");
        assert_eq!(derive(".ga").as_str(), "P_GA");
        assert_eq!(derive("copy").as_str(), "Y__COPY_");
        assert_eq!(derive(" copy a").as_str(), "Y__COPY_ A");
        assert_eq!(derive("a Copy").as_str(), "Y_A _COPY_");
        assert_eq!(derive("!!!").as_str(), "Z_!!!");
    }

    #[test]
    fn test_numeric_suffixes_sort_numerically() {
        assert!(derive("2") < derive("10"));
        assert!(derive("10") < derive("100"));
        assert!(derive("2") < derive("2B"));
        assert!(derive("2B") < derive("3"));
    }

    #[test]
    fn test_letters_sort_alphabetically_case_insensitive() {
        assert!(derive("b") < derive("C"));
        assert_eq!(derive("b"), derive("B"));
    }

    #[test]
    fn test_copy_variants_sort_together() {
        let copy = derive("copy");
        let copy_a = derive(" copy a");
        let dot = derive(".Z");
        let other = derive("#1");
        assert!(dot < copy && dot < copy_a);
        assert!(copy < other && copy_a < other);
    }

    #[test]
    fn test_separator_needs_letters_after_it() {
        assert_eq!(derive(".").as_str(), "Z_.");
        assert_eq!(derive(".O2").as_str(), "Z_.O2");
        assert_eq!(derive("-x").as_str(), "P_X");
    }

    #[test]
    fn test_overflow_beyond_width_keeps_digits() {
        assert_eq!(derive("1234").as_str(), "N_1234_");
    }

    #[test]
    fn test_deterministic_and_total() {
        for input in ["", "B", "2", ".O", "copy", "!!!", "ü", "٣", "\u{0}", "x y z"] {
            assert_eq!(derive(input), derive(input));
        }
    }
}
