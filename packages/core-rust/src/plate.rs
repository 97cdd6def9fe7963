//! License-plate text normalization and layout (template) checks.

use std::sync::LazyLock;

use regex::Regex;

/// Known plate layouts, matched against normalized text.
static PLATE_TEMPLATES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^[A-Z]{3}[0-9]{3,4}$",              // ABC123, ABC1234
        r"^[0-9]{3}[A-Z]{3}$",                // 123ABC
        r"^[A-Z]{2}[0-9]{2}[A-Z]{2}$",        // AB12CD
        r"^[A-Z]{1,3}[0-9]{1,4}[A-Z]?$",      // common US layouts
        r"^[0-9]{1,3}[A-Z]{1,3}[0-9]{1,4}$",  // mixed
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Minimum and maximum normalized plate length.
pub const MIN_PLATE_LEN: usize = 4;
pub const MAX_PLATE_LEN: usize = 8;

/// Uppercases and strips everything outside `[A-Z0-9]`.
#[must_use]
pub fn normalize_plate(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Whether `text` matches one of the known plate layouts after normalization.
#[must_use]
pub fn matches_template(text: &str) -> bool {
    let plate = normalize_plate(text);
    if !(MIN_PLATE_LEN..=MAX_PLATE_LEN).contains(&plate.len()) {
        return false;
    }
    PLATE_TEMPLATES.iter().any(|re| re.is_match(&plate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_and_uppercases() {
        assert_eq!(normalize_plate(" abc-123 "), "ABC123");
        assert_eq!(normalize_plate("7·xyz·89"), "7XYZ89");
        assert_eq!(normalize_plate(""), "");
    }

    #[test]
    fn common_layouts_match() {
        assert!(matches_template("ABC123"));
        assert!(matches_template("abc 1234"));
        assert!(matches_template("123ABC"));
        assert!(matches_template("AB12CD"));
        assert!(matches_template("1ABC234"));
    }

    #[test]
    fn length_bounds_are_enforced() {
        assert!(!matches_template("A12"));
        assert!(!matches_template("ABC123456"));
    }

    #[test]
    fn letters_only_does_not_match() {
        assert!(!matches_template("ABCDEF"));
    }
}
