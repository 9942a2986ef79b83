//! Text canonicalization applied to both the target sentence and the
//! recognizer hypothesis before they are compared.
//!
//! The pipeline, in order:
//!
//! 1. NFKC so full-width and compatibility forms (`！`, `Ａ`, `ﾟ`) are seen in
//!    their canonical shape by the later steps
//! 2. drop quotation marks ([`QUOTE_CHARS`])
//! 3. drop punctuation ([`STRIPPED_PUNCTUATION`])
//! 4. HTML line breaks (`<br>`, `<br/>`, `<br />`, any case) become a space
//! 5. collapse whitespace runs to a single space and trim
//! 6. lower-case with [`str::to_lowercase`]
//! 7. a final NFKC pass
//!
//! Punctuation is removed before whitespace is collapsed so the output is a
//! fixed point: `normalize(normalize(x)) == normalize(x)`.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

pub const QUOTE_CHARS: &[char] = &['"', '\'', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}'];

pub const STRIPPED_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '(', ')', '[', ']', '{', '}', '~', '-', '_', '/', '\\',
];

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break pattern is valid"));

/// Canonicalize `text` for comparison. Total: empty input yields `""`.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let folded: String = text
        .nfkc()
        .filter(|c| !QUOTE_CHARS.contains(c) && !STRIPPED_PUNCTUATION.contains(c))
        .collect();

    // Replacing one break can close another around it: `<br<br>>`.
    let mut without_breaks = folded;
    while LINE_BREAK.is_match(&without_breaks) {
        without_breaks = LINE_BREAK.replace_all(&without_breaks, " ").into_owned();
    }

    let collapsed = without_breaks.split_whitespace().collect::<Vec<_>>().join(" ");

    collapsed.to_lowercase().nfkc().collect()
}

/// [`normalize`] for values that may be absent.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

/// Normalized text with every whitespace character removed.
///
/// Recognizers place Korean word spacing inconsistently ("찾을 수 있어" vs
/// "찾을수있어"), so the scorer compares on this key rather than on the
/// spaced form.
pub fn comparison_key(text: &str) -> String {
    normalize(text).chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_quotes_punctuation_and_case() {
        assert_eq!(normalize("“Hello, World!”"), "hello world");
        assert_eq!(normalize("'나는' 할 수 있어."), "나는 할 수 있어");
        assert_eq!(normalize("(a) [b] {c} ~d- e_f/g\\h"), "a b c d efgh");
    }

    #[test]
    fn line_breaks_become_spaces() {
        assert_eq!(normalize("오늘도<br>최고야"), "오늘도 최고야");
        assert_eq!(normalize("오늘도<BR />최고야"), "오늘도 최고야");
        assert_eq!(normalize("오늘도<br/>최고야"), "오늘도 최고야");
    }

    #[test]
    fn collapses_and_trims_whitespace() {
        assert_eq!(normalize("  나는 \t 희망을\n\n찾을  수 있어  "), "나는 희망을 찾을 수 있어");
    }

    #[test]
    fn folds_compatibility_forms() {
        assert_eq!(normalize("ＡＢＣ！"), "abc");
        assert_eq!(normalize("ｈｅｌｌｏ　ｗｏｒｌｄ"), "hello world");
    }

    #[test]
    fn empty_and_absent_inputs_are_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("?!.,"), "");
        assert_eq!(normalize_opt(None), "");
        assert_eq!(normalize_opt(Some("A")), "a");
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "",
            "나는 희망을 찾을 수 있어",
            "  “나는 오늘도 최고야!”  ",
            "a . b , c",
            "<b-r>line",
            "<B/R>x",
            "ＡＢＣ！ ｄｅｆ？",
            "Straße İstanbul",
            "tab\tand\u{3000}ideographic space",
            "'quoted' \"twice\" ‘single’",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn nested_line_breaks_are_fully_removed() {
        assert_eq!(normalize("a<br<br>>b"), "a b");
        assert_eq!(normalize("<BR<br/>/>"), "");
    }

    #[test]
    fn comparison_key_ignores_spacing() {
        assert_eq!(
            comparison_key("나는 희망을 찾을 수 있어"),
            comparison_key("나는 희망을 찾을수있어")
        );
        assert_eq!(comparison_key(" a b  c "), "abc");
    }

    fn markup_heavy() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                Just("<br>".to_string()),
                Just("<".to_string()),
                Just("br".to_string()),
                Just("/>".to_string()),
                Just(">".to_string()),
                Just(" ".to_string()),
                Just(".".to_string()),
                Just("\u{201C}".to_string()),
                "[가-힣a-zA-Z]{0,3}",
            ],
            0..16,
        )
        .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn idempotent_for_any_text(text in ".{0,64}") {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn idempotent_around_markup(text in markup_heavy()) {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn output_is_trimmed_and_single_spaced(text in "\\PC{0,64}") {
            let out = normalize(&text);
            prop_assert_eq!(out.trim(), out.as_str());
            prop_assert!(!out.contains("  "));
        }
    }
}
