//! # Validation helpers
//!
//! Phone number normalization and emoji checks used by several models.

/// Minimum number of digits in an E.164 number.
const MIN_PHONE_DIGITS: usize = 8;

/// Maximum number of digits in an E.164 number.
const MAX_PHONE_DIGITS: usize = 15;

/// Normalize a phone number to E.164 (`+15555550123`).
///
/// Formatting characters (spaces, dashes, dots, parentheses) are dropped.
/// A bare 10-digit number is assumed to be North American. Returns `None`
/// when the input cannot be a valid number.
#[must_use]
pub fn normalize_phone_number(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let has_plus = trimmed.starts_with('+');
    let mut digits = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '0'..='9' => digits.push(c),
            '+' | ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }
    if trimmed.matches('+').count() > usize::from(has_plus) {
        return None;
    }

    let digits = if has_plus {
        digits
    } else if digits.len() == 10 {
        format!("1{digits}")
    } else if digits.len() == 11 && digits.starts_with('1') {
        digits
    } else {
        return None;
    };

    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) || digits.starts_with('0') {
        return None;
    }
    Some(format!("+{digits}"))
}

/// Whether the string is exactly one emoji from the Unicode emoji table.
///
/// Skin tones, ZWJ sequences and keycaps count as one emoji. A symbol
/// written without its emoji presentation selector is still accepted.
#[must_use]
pub fn is_emoji(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    emojis::get(value).is_some()
        || (!value.ends_with('\u{fe0f}') && emojis::get(&format!("{value}\u{fe0f}")).is_some())
}

/// Strip surrounding whitespace, mapping blank strings to `None`.
#[must_use]
pub fn presence(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
