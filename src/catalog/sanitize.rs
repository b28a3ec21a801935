//! Cleaning applied to user text before it is persisted.

use once_cell::sync::Lazy;
use regex::Regex;

// An unterminated `<` swallows the rest of the input, like a browser would.
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>?").expect("tag pattern"));
static NOT_PLAIN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s\-_.,]").expect("plain text pattern"));
static NOT_PRINTABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\p{P}\p{Zs}]").expect("printable pattern"));

pub const SHORT_MAX: usize = 50;
pub const LONG_MAX: usize = 2000;

/// Strips markup and anything outside letters, digits, whitespace and `-_.,`.
pub fn sanitize_text(value: &str, max: usize) -> String {
    if value.is_empty() {
        return String::new();
    }
    let without_tags = TAG.replace_all(value, "");
    let clean = NOT_PLAIN_TEXT.replace_all(&without_tags, "");
    truncate_chars(&clean, max).trim().to_string()
}

pub fn sanitize_short(value: &str) -> String {
    sanitize_text(value, SHORT_MAX)
}

/// Looser variant that keeps punctuation; used for titles and descriptions.
pub fn sanitize_input(value: &str, max: usize) -> String {
    if value.is_empty() {
        return String::new();
    }
    let without_tags = TAG.replace_all(value, "");
    let clean = NOT_PRINTABLE.replace_all(&without_tags, "");
    truncate_chars(clean.trim(), max).to_string()
}

/// Parses and clamps into `[min, max]`. Blank or non-numeric input is `None`.
pub fn sanitize_number(value: &str, min: f64, max: f64) -> Option<f64> {
    let parsed = value.trim().parse::<f64>().ok().filter(|n| n.is_finite())?;
    Some(parsed.clamp(min, max))
}

fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_symbols() {
        assert_eq!(
            sanitize_text("<b>Trek</b> Marlin 5 — 29\" ¡oferta!", 200),
            "Trek Marlin 5  29 oferta"
        );
    }

    #[test]
    fn unterminated_tag_drops_tail() {
        assert_eq!(sanitize_text("Orbea <script", 200), "Orbea");
    }

    #[test]
    fn keeps_accented_letters_and_allowed_punctuation() {
        assert_eq!(sanitize_short("Bicicleta eléctrica, talla-M_2."), "Bicicleta eléctrica, talla-M_2.");
    }

    #[test]
    fn truncates_by_characters() {
        assert_eq!(sanitize_text("ñññññ", 3), "ñññ");
        assert_eq!(sanitize_short(&"a".repeat(80)).len(), SHORT_MAX);
    }

    #[test]
    fn input_keeps_punctuation_but_not_symbols() {
        assert_eq!(sanitize_input("  ¿Precio? 500€ (negociable) ", 255), "¿Precio? 500 (negociable)");
    }

    #[test]
    fn number_clamps_and_rejects_garbage() {
        assert_eq!(sanitize_number("abc", 0.0, 999_999.0), None);
        assert_eq!(sanitize_number("", 0.0, 999_999.0), None);
        assert_eq!(sanitize_number("NaN", 0.0, 999_999.0), None);
        assert_eq!(sanitize_number("-5", 0.0, 999_999.0), Some(0.0));
        assert_eq!(sanitize_number("1e9", 0.0, 999_999.0), Some(999_999.0));
        assert_eq!(sanitize_number(" 750.5 ", 0.0, 999_999.0), Some(750.5));
    }
}
