//! G2P input sanitization and language-code canonicalization.
//!
//! Distinct from the Text Segmenter's richer text normalization
//! ([`crate::segmenter`]): this pass only does what the G2P stage's own
//! contract requires before handing text to a phonemizer backend.

/// What [`sanitize`] changed, for inclusion in the [`super::Phonemes`]
/// sanitization report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizationReport {
    /// Code points stripped because they fell outside the printable +
    /// whitespace set the phonemizer backends accept.
    pub chars_stripped: usize,
    /// Number of 2+-newline runs collapsed to a single `\n`.
    pub newline_collapses: usize,
}

/// Sanitize text for G2P input:
/// 1. Normalize line endings to `\n`.
/// 2. Collapse any run of 2+ `\n` into one.
/// 3. Strip code points outside the printable + whitespace set.
///
/// Idempotent: `sanitize(sanitize(text).0) == sanitize(text)`, since every transformation here maps its output back into
/// its own fixed point.
#[must_use]
pub fn sanitize(text: &str) -> (String, SanitizationReport) {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut collapsed = String::with_capacity(unified.len());
    let mut newline_collapses = 0usize;
    let mut chars = unified.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' {
            let mut run = 1;
            while chars.peek() == Some(&'\n') {
                chars.next();
                run += 1;
            }
            collapsed.push('\n');
            if run >= 2 {
                newline_collapses += 1;
            }
        } else {
            collapsed.push(c);
        }
    }

    let mut chars_stripped = 0usize;
    let stripped: String = collapsed
        .chars()
        .filter(|c| {
            let keep = is_printable_or_whitespace(*c);
            if !keep {
                chars_stripped += 1;
            }
            keep
        })
        .collect();

    (
        stripped,
        SanitizationReport {
            chars_stripped,
            newline_collapses,
        },
    )
}

fn is_printable_or_whitespace(c: char) -> bool {
    if c == '\n' || c == '\t' || c == ' ' {
        return true;
    }
    !c.is_control() && !c.is_ascii_control()
}

/// Canonicalize a BCP-47-like language tag to the form the phonemizer
/// backends expect.
///
/// Unrecognized tags are lower-cased and returned unchanged; this never
/// fails, matching the G2P stage's "never raises to the caller" contract.
#[must_use]
pub fn canonicalize_lang(lang: &str) -> String {
    match lang.to_ascii_lowercase().as_str() {
        "en" => "en-us".to_owned(),
        "en-gb" | "en-uk" => "en-gb".to_owned(),
        "en-us" => "en-us".to_owned(),
        other => other.to_owned(),
    }
}

/// `true` if `lang` canonicalizes to a British-English variant.
#[must_use]
pub fn is_british(lang: &str) -> bool {
    canonicalize_lang(lang) == "en-gb"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_crlf_and_cr() {
        let (out, _) = sanitize("a\r\nb\rc");
        assert_eq!(out, "a\nb\nc");
    }

    #[test]
    fn collapses_multiple_newlines() {
        let (out, report) = sanitize("a\n\n\n\nb");
        assert_eq!(out, "a\nb");
        assert_eq!(report.newline_collapses, 1);
    }

    #[test]
    fn strips_control_chars() {
        let (out, report) = sanitize("a\u{0007}b\u{001b}c");
        assert_eq!(out, "abc");
        assert_eq!(report.chars_stripped, 2);
    }

    #[test]
    fn keeps_tabs_and_spaces() {
        let (out, report) = sanitize("a\tb c");
        assert_eq!(out, "a\tb c");
        assert_eq!(report.chars_stripped, 0);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "plain text",
            "a\r\n\r\nb\r\rc",
            "\u{0001}control\u{0007}chars",
            "line1\n\n\n\n\nline2\nline3",
        ];
        for s in samples {
            let (once, _) = sanitize(s);
            let (twice, _) = sanitize(&once);
            assert_eq!(once, twice, "not idempotent for input {s:?}");
        }
    }

    #[test]
    fn lang_canonicalization() {
        assert_eq!(canonicalize_lang("en"), "en-us");
        assert_eq!(canonicalize_lang("EN"), "en-us");
        assert_eq!(canonicalize_lang("en-GB"), "en-gb");
        assert_eq!(canonicalize_lang("fr"), "fr");
    }

    #[test]
    fn british_detection() {
        assert!(is_british("en-gb"));
        assert!(is_british("en-uk"));
        assert!(!is_british("en"));
        assert!(!is_british("en-us"));
    }
}
