//! Turns free-form model output into a [`TranslationResult`].
//!
//! All guessing about what the model meant happens here. Accepted shapes:
//! a JSON object (optionally fenced), or labelled lines such as
//! `Translation: ...` / `Pronunciation: ...` with optional bullets, bold
//! markers and quotes. Anything else is a [`TranslateError::Parse`].

use super::{TranslateError, TranslationResult};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static LABELLED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:[-*•][ \t]+)?(?:\*\*|__)?[ \t]*(translation|translated text|phonetic rendering|phonetic transliteration|phonetic|pronunciation|transliteration|romanized|romanization)[ \t]*(?:\*\*|__)?[ \t]*[:：][ \t]*(?:\*\*|__)?[ \t]*(.*)$",
    )
    .expect("labelled line pattern is valid")
});

/// `(syl-la-ble)` breakdowns the model appends despite instructions
static SYLLABLE_BREAKDOWN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*-[^)]*\)").expect("breakdown pattern is valid"));

const TRANSLATION_KEYS: &[&str] = &["translation", "translated_text", "translatedtext", "translated"];
const PHONETIC_KEYS: &[&str] = &[
    "phonetic",
    "phonetic_rendering",
    "phoneticrendering",
    "pronunciation",
    "transliteration",
    "romanized",
    "romanization",
];

pub fn parse_translation(raw: &str) -> Result<TranslationResult, TranslateError> {
    let body = strip_code_fence(raw.trim());
    if body.is_empty() {
        return Err(TranslateError::Parse("empty response".to_string()));
    }

    let (translation, phonetic) = match parse_json(body) {
        Some((t, p)) if t.is_some() || p.is_some() => (t, p),
        _ => parse_labelled(body),
    };

    let translated_text = translation
        .map(|t| clean_translation(&t))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| TranslateError::Parse(format!("no translation found in: {}", preview(raw))))?;

    let phonetic_rendering = phonetic
        .map(|p| clean_phonetic(&p))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            TranslateError::Parse(format!("no phonetic rendering found in: {}", preview(raw)))
        })?;

    Ok(TranslationResult {
        translated_text,
        phonetic_rendering,
    })
}

fn strip_code_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    // Drop the info string (```json) up to the first newline
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

fn parse_json(body: &str) -> Option<(Option<String>, Option<String>)> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }

    let object: Map<String, Value> = serde_json::from_str(&body[start..=end]).ok()?;
    let lookup = |keys: &[&str]| {
        object.iter().find_map(|(key, value)| {
            let normalized = key.to_lowercase().replace([' ', '-'], "_");
            let matches = keys.contains(&normalized.as_str())
                || keys.contains(&normalized.replace('_', "").as_str());
            match value {
                Value::String(s) if matches => Some(s.clone()),
                _ => None,
            }
        })
    };

    Some((lookup(TRANSLATION_KEYS), lookup(PHONETIC_KEYS)))
}

fn parse_labelled(body: &str) -> (Option<String>, Option<String>) {
    let mut translation = None;
    let mut phonetic = None;

    for caps in LABELLED_LINE.captures_iter(body) {
        let label = caps[1].to_lowercase();
        let value = caps[2].trim().to_string();
        let slot = if label.starts_with("translat") {
            &mut translation
        } else {
            &mut phonetic
        };
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value);
        }
    }

    (translation, phonetic)
}

fn trim_decoration(text: &str) -> &str {
    text.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’' | '*' | '_' | '`'))
        .trim()
}

fn clean_translation(text: &str) -> String {
    trim_decoration(text.lines().next().unwrap_or_default()).to_string()
}

/// Reduce the rendering to a single ASCII line: no breakdowns, no native
/// script, diacritics folded (`vwàhr` -> `vwahr`).
fn clean_phonetic(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    let without_breakdown = SYLLABLE_BREAKDOWN.replace_all(first_line, "");
    let ascii_only: String = without_breakdown
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(char::is_ascii)
        .collect();
    // Parentheses left empty once native script is gone
    let ascii_only = ascii_only.replace("()", "");

    trim_decoration(&ascii_only)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn preview(raw: &str) -> String {
    let flat = raw.replace('\n', " ");
    if flat.chars().count() > 80 {
        format!("{}...", flat.chars().take(80).collect::<String>())
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(raw: &str) -> TranslationResult {
        parse_translation(raw).expect("should parse")
    }

    // ==================== Labelled Lines ====================

    #[test]
    fn test_plain_labels() {
        let result = parsed("Translation: Buenos días\nPhonetic: BWAY-nohs DEE-ahs");
        assert_eq!(result.translated_text, "Buenos días");
        assert_eq!(result.phonetic_rendering, "BWAY-nohs DEE-ahs");
    }

    #[test]
    fn test_alternative_labels_and_case() {
        let result = parsed("TRANSLATION: Merci\npronunciation: mair-SEE");
        assert_eq!(result.translated_text, "Merci");
        assert_eq!(result.phonetic_rendering, "mair-SEE");
    }

    #[test]
    fn test_markdown_bullets_and_bold() {
        let raw = "Sure! Here you go:\n\n- **Translation:** \"Arigatou\"\n- **Romanized:** Ah-ree-gah-toh\n";
        let result = parsed(raw);
        assert_eq!(result.translated_text, "Arigatou");
        assert_eq!(result.phonetic_rendering, "Ah-ree-gah-toh");
    }

    #[test]
    fn test_native_script_removed_from_phonetic() {
        let raw = "Translation: வணக்கம்\nTransliteration: Vanakkam (வணக்கம்)";
        let result = parsed(raw);
        assert_eq!(result.translated_text, "வணக்கம்");
        assert_eq!(result.phonetic_rendering, "Vanakkam");
    }

    #[test]
    fn test_syllable_breakdown_removed() {
        let raw = "Translation: Gracias\nPhonetic: Grah-see-us (grah-see-us)";
        let result = parsed(raw);
        assert_eq!(result.phonetic_rendering, "Grah-see-us");
    }

    #[test]
    fn test_accents_folded_to_ascii() {
        let result = parsed("Translation: Au revoir\nPhonetic: Oh ruh-vwàhr");
        assert_eq!(result.translated_text, "Au revoir");
        assert_eq!(result.phonetic_rendering, "Oh ruh-vwahr");
    }

    #[test]
    fn test_phonetic_is_always_ascii() {
        let result = parsed("Translation: ¿Cómo estás?\nPhonetic: ¿KOH-moh ehs-TÄHS? × ñ");
        assert_eq!(result.phonetic_rendering, "KOH-moh ehs-TAHS? n");
        assert!(result.phonetic_rendering.is_ascii());
    }

    #[test]
    fn test_phonetic_of_only_symbols_fails() {
        let raw = "Translation: Hola\nPhonetic: ¿× ¡";
        assert!(matches!(parse_translation(raw), Err(TranslateError::Parse(_))));
    }

    #[test]
    fn test_first_value_wins() {
        let raw = "Translation: Hola\nPhonetic: OH-lah\nTranslation: Adiós";
        let result = parsed(raw);
        assert_eq!(result.translated_text, "Hola");
    }

    // ==================== JSON ====================

    #[test]
    fn test_json_object() {
        let raw = r#"{"translation": "Bonjour", "phonetic": "bohn-ZHOOR"}"#;
        let result = parsed(raw);
        assert_eq!(result.translated_text, "Bonjour");
        assert_eq!(result.phonetic_rendering, "bohn-ZHOOR");
    }

    #[test]
    fn test_fenced_json_with_alternative_keys() {
        let raw = "```json\n{\"translatedText\": \"Danke\", \"phoneticRendering\": \"DAHN-kuh\"}\n```";
        let result = parsed(raw);
        assert_eq!(result.translated_text, "Danke");
        assert_eq!(result.phonetic_rendering, "DAHN-kuh");
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let raw = "Here is the result: {\"translated_text\": \"Ciao\", \"pronunciation\": \"CHOW\"} Enjoy!";
        let result = parsed(raw);
        assert_eq!(result.translated_text, "Ciao");
        assert_eq!(result.phonetic_rendering, "CHOW");
    }

    // ==================== Malformed Output ====================

    #[test]
    fn test_empty_response_fails() {
        assert!(matches!(parse_translation("   "), Err(TranslateError::Parse(_))));
    }

    #[test]
    fn test_bare_transliteration_fails() {
        // What the old single-field prompt produced: no structure at all
        assert!(matches!(
            parse_translation("Bway-nos dee-ahs"),
            Err(TranslateError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_phonetic_fails() {
        let err = parse_translation("Translation: Buenos días").unwrap_err();
        assert!(err.to_string().contains("no phonetic rendering"));
    }

    #[test]
    fn test_missing_translation_fails() {
        let err = parse_translation("Phonetic: BWAY-nohs").unwrap_err();
        assert!(err.to_string().contains("no translation"));
    }

    #[test]
    fn test_empty_fields_fail() {
        assert!(parse_translation("Translation:\nPhonetic:").is_err());
        assert!(parse_translation(r#"{"translation": "", "phonetic": "x"}"#).is_err());
    }

    #[test]
    fn test_phonetic_that_is_only_native_script_fails() {
        let raw = "Translation: ありがとう\nPhonetic: ありがとう";
        assert!(matches!(parse_translation(raw), Err(TranslateError::Parse(_))));
    }

    #[test]
    fn test_json_with_wrong_types_falls_back_to_failure() {
        let raw = r#"{"translation": 42, "phonetic": ["a"]}"#;
        assert!(parse_translation(raw).is_err());
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(200);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 83);
    }
}
