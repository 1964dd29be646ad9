//! Text Segmenter.
//!
//! Normalizes raw request text, then splits it into ordered [`Segment`]s:
//! a fast-path primer for short text, or a primer-plus-remainder split for
//! longer text, packed on sentence boundaries without ever breaking inside
//! a word.
//!
//! Text normalization (smart quotes, em/en dashes, markdown stripping,
//! currency/ordinal/abbreviation expansion) is distinct from the G2P
//! stage's own narrower sanitization pass (`crate::g2p::normalize`).

use crate::config::SegmenterConfig;

/// One unit of text handed to the pipeline for phonemization and inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Monotonic position within the request, re-indexed from 0.
    pub index: u32,
    /// Normalized substring this segment covers.
    pub source_text: String,
    /// `true` exactly for index 0 when the primer policy fires.
    pub is_primer: bool,
}

impl Segment {
    /// Character count of [`source_text`](Self::source_text).
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.source_text.chars().count()
    }
}

/// Normalize `text`, then split into ordered [`Segment`]s per `config`.
///
/// Rules, first match wins:
/// 1. `len(text) <= short_threshold` → one segment, marked primer.
/// 2. Otherwise, a primer segment sized `clamp(15% of length, 0,
///    primer_max_chars)`, extended to the nearest sentence boundary at or
///    before that size (word boundary, then hard cut, as fallbacks) — the
///    deterministic formula fixed in `DESIGN.md`.
/// 3. The remainder is packed onto sentence terminators (`. ! ? \n`),
///    greedily, never exceeding `segment_max_chars`, never breaking inside
///    a word.
#[must_use]
pub fn segment_text(text: &str, config: &SegmenterConfig) -> Vec<Segment> {
    let normalized = normalize_text(text);
    let char_len = normalized.chars().count();

    if char_len == 0 {
        return Vec::new();
    }

    if char_len <= config.short_threshold {
        return vec![Segment {
            index: 0,
            source_text: normalized,
            is_primer: true,
        }];
    }

    let chars: Vec<char> = normalized.chars().collect();
    let primer_len = primer_split_len(&chars, config.primer_max_chars);
    let (primer_text, rest) = split_at_char(&chars, primer_len);

    let mut segments = vec![Segment {
        index: 0,
        source_text: primer_text,
        is_primer: true,
    }];

    for (i, chunk) in pack_segments(&rest, config.segment_max_chars)
        .into_iter()
        .enumerate()
    {
        segments.push(Segment {
            index: (i + 1) as u32,
            source_text: chunk,
            is_primer: false,
        });
    }

    segments
}

/// Compute the primer's character length: 15% of total length, capped at
/// `primer_max_chars` and at the text's own length, then extended forward
/// to the nearest sentence boundary at or before that point (falling back
/// to a word boundary, then a hard cut).
fn primer_split_len(chars: &[char], primer_max_chars: usize) -> usize {
    let target = (chars.len() * 15 / 100).min(primer_max_chars).min(chars.len());
    if target == chars.len() {
        return target;
    }

    // Search backward from `target` for a sentence terminator.
    for i in (0..target).rev() {
        if is_sentence_terminator(chars[i]) {
            return i + 1;
        }
    }
    // Fall back to a word boundary.
    for i in (0..target).rev() {
        if chars[i].is_whitespace() {
            return i;
        }
    }
    // Hard cut.
    target
}

fn split_at_char(chars: &[char], at: usize) -> (String, Vec<char>) {
    let at = at.min(chars.len());
    let head: String = chars[..at].iter().collect();
    let tail = chars[at..].to_vec();
    (head, tail)
}

fn is_sentence_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n')
}

/// Greedily pack `chars` into segments of at most `segment_max_chars`,
/// breaking only at sentence terminators or, failing that, whitespace.
/// Never breaks inside a word.
fn pack_segments(chars: &[char], segment_max_chars: usize) -> Vec<String> {
    let trimmed_start = chars
        .iter()
        .position(|c| !c.is_whitespace())
        .unwrap_or(chars.len());
    let chars = &chars[trimmed_start..];
    if chars.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= segment_max_chars {
            let s: String = chars[start..].iter().collect();
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_owned());
            }
            break;
        }

        let window_end = start + segment_max_chars;
        let mut cut = None;
        for i in (start..window_end).rev() {
            if is_sentence_terminator(chars[i]) {
                cut = Some(i + 1);
                break;
            }
        }
        let cut = cut.unwrap_or_else(|| {
            (start..window_end)
                .rev()
                .find(|&i| chars[i].is_whitespace())
                .unwrap_or(window_end)
        });
        let cut = cut.max(start + 1);

        let s: String = chars[start..cut].iter().collect();
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_owned());
        }
        start = cut;
    }

    out
}

/// Normalize raw text before segmentation: smart quotes → ASCII, em/en
/// dashes → spaced hyphen, markdown stripping, currency/ordinal/
/// abbreviation expansion. Shared with the G2P text
/// normalization, applied once here rather than per-segment.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let text = normalize_quotes(text);
    let text = strip_markdown(&text);
    let text = expand_currency(&text);
    let text = expand_ordinals(&text);
    expand_abbreviations(&text)
}

fn normalize_quotes(text: &str) -> String {
    text.replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2014}', '\u{2013}'], " - ")
}

fn strip_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim_start();
        let line_content = if trimmed.starts_with('#') {
            trimmed.trim_start_matches('#').trim_start()
        } else {
            line
        };
        for ch in line_content.chars() {
            if ch != '*' {
                result.push(ch);
            }
        }
        result.push('\n');
    }
    if result.ends_with('\n') {
        result.pop();
    }
    result
}

fn expand_currency(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut i = 0;

    while i < len {
        let ch = chars[i];
        let currency_word = match ch {
            '$' => Some("dollars"),
            '£' => Some("pounds"),
            '€' => Some("euros"),
            _ => None,
        };

        if let Some(word) = currency_word {
            let start = i + 1;
            let mut end = start;
            while end < len && chars[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                let digits: String = chars[start..end].iter().collect();
                result.push_str(&digits);
                result.push(' ');
                result.push_str(word);
                i = end;
                continue;
            }
        }

        result.push(ch);
        i += 1;
    }

    result
}

fn expand_ordinals(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut i = 0;

    while i < len {
        if bytes[i].is_ascii_digit() {
            let num_start = i;
            while i < len && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let num_str = &text[num_start..i];

            if i + 1 < len {
                let suffix = &text[i..i + 2];
                let is_ordinal = matches!(
                    suffix.to_ascii_lowercase().as_str(),
                    "st" | "nd" | "rd" | "th"
                );
                let after_suffix = i + 2;
                let suffix_ends_word =
                    after_suffix >= len || !bytes[after_suffix].is_ascii_alphabetic();

                if is_ordinal
                    && suffix_ends_word
                    && let Some(word) = ordinal_word(num_str)
                {
                    result.push_str(word);
                    i += 2;
                    continue;
                }
            }

            result.push_str(num_str);
            continue;
        }

        result.push(bytes[i] as char);
        i += 1;
    }

    result
}

fn ordinal_word(digits: &str) -> Option<&'static str> {
    let n: u32 = digits.parse().ok()?;
    match n {
        1 => Some("first"),
        2 => Some("second"),
        3 => Some("third"),
        4 => Some("fourth"),
        5 => Some("fifth"),
        6 => Some("sixth"),
        7 => Some("seventh"),
        8 => Some("eighth"),
        9 => Some("ninth"),
        10 => Some("tenth"),
        11 => Some("eleventh"),
        12 => Some("twelfth"),
        13 => Some("thirteenth"),
        14 => Some("fourteenth"),
        15 => Some("fifteenth"),
        16 => Some("sixteenth"),
        17 => Some("seventeenth"),
        18 => Some("eighteenth"),
        19 => Some("nineteenth"),
        20 => Some("twentieth"),
        21 => Some("twenty first"),
        22 => Some("twenty second"),
        23 => Some("twenty third"),
        24 => Some("twenty fourth"),
        25 => Some("twenty fifth"),
        26 => Some("twenty sixth"),
        27 => Some("twenty seventh"),
        28 => Some("twenty eighth"),
        29 => Some("twenty ninth"),
        30 => Some("thirtieth"),
        31 => Some("thirty first"),
        _ => None,
    }
}

fn expand_abbreviations(text: &str) -> String {
    const ABBREVS: &[(&str, &str)] = &[
        ("Mrs.", "Missus"),
        ("Mr.", "Mister"),
        ("Ms.", "Miz"),
        ("Dr.", "Doctor"),
        ("St.", "Saint"),
        ("vs.", "versus"),
        ("etc.", "etcetera"),
        ("e.g.", "for example"),
        ("i.e.", "that is"),
    ];

    let mut result = text.to_owned();
    for &(abbrev, expansion) in ABBREVS {
        result = replace_word_boundary(&result, abbrev, expansion);
    }
    result
}

fn replace_word_boundary(text: &str, pattern: &str, replacement: &str) -> String {
    if pattern.is_empty() {
        return text.to_owned();
    }

    let mut result = String::with_capacity(text.len());
    let mut remaining = text;

    while let Some(pos) = remaining.find(pattern) {
        let at_word_start = pos == 0 || {
            let before = remaining.as_bytes()[pos - 1];
            before == b' ' || before == b'\t' || before == b'\n' || before == b'\r'
        };

        let after_pos = pos + pattern.len();
        let at_word_end = after_pos >= remaining.len() || {
            let after = remaining.as_bytes()[after_pos];
            after == b' ' || after == b'\t' || after == b'\n' || after == b'\r'
        };

        if at_word_start && at_word_end {
            result.push_str(&remaining[..pos]);
            result.push_str(replacement);
            remaining = &remaining[after_pos..];
        } else {
            result.push_str(&remaining[..pos + 1]);
            remaining = &remaining[pos + 1..];
        }
    }

    result.push_str(remaining);
    result
}
