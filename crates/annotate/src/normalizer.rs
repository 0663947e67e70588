use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// Harakat U+064B..U+0655 and tatweel U+0640
static DIACRITICS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{064B}-\u{0655}\u{0640}]").expect("static pattern"));

/// Remove Arabic short-vowel marks and tatweel so vocalised and bare
/// spellings compare equal.
///
/// Text is NFKD-decomposed first, so hamza and madda carriers (أ إ آ ؤ ئ)
/// lose their marks and presentation forms fold to base letters.
pub fn strip_diacritics(text: &str) -> String {
    let decomposed: String = text.nfkd().collect();
    DIACRITICS.replace_all(&decomposed, "").into_owned()
}

/// Compare two spellings ignoring diacritics and surrounding whitespace.
pub fn same_word(a: &str, b: &str) -> bool {
    strip_diacritics(a.trim()) == strip_diacritics(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_diacritics() {
        assert_eq!(strip_diacritics("كِتَابٌ"), "كتاب");
        assert_eq!(strip_diacritics("قـــلم"), "قلم");
        assert_eq!(strip_diacritics("book"), "book");
    }

    #[test]
    fn test_hamza_and_madda_carriers_fold_to_bare_letters() {
        assert_eq!(strip_diacritics("أحمد"), "احمد");
        assert_eq!(strip_diacritics("إسلام"), "اسلام");
        assert_eq!(strip_diacritics("آمن"), "امن");
        assert_eq!(strip_diacritics("مُؤْمِن"), "مومن");
        assert!(same_word("أَمِير", "امير"));
    }

    #[test]
    fn test_presentation_forms_fold() {
        // U+FEFB lam-alef ligature
        assert_eq!(strip_diacritics("\u{FEFB}"), "لا");
    }

    #[test]
    fn test_same_word() {
        assert!(same_word("سَلَام ", "سلام"));
        assert!(!same_word("سلام", "سلم"));
    }
}
