//! Field predicates for the intake stages. Each returns the normalized value or
//! `None`, and the engine turns `None` into a re-prompt.

use crate::domain::lead::{MAX_CURB_WEIGHT, MIN_CURB_WEIGHT};

const MAX_PLATE_LEN: usize = 16;
const MAX_NAME_LEN: usize = 80;
const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;

pub fn parse_plate(input: &str) -> Option<String> {
    let plate = input.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    let well_formed = !plate.is_empty()
        && plate.chars().count() <= MAX_PLATE_LEN
        && plate.chars().any(|ch| ch.is_alphanumeric())
        && plate.chars().all(|ch| ch.is_alphanumeric() || ch == ' ' || ch == '-');

    well_formed.then_some(plate)
}

pub fn parse_owner_name(input: &str) -> Option<String> {
    let name = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let well_formed = !name.is_empty()
        && name.chars().count() <= MAX_NAME_LEN
        && name.chars().any(|ch| ch.is_alphabetic());

    well_formed.then_some(name)
}

/// Accepts a bare integer with an optional `kg` suffix.
pub fn parse_curb_weight(input: &str) -> Option<u32> {
    let trimmed = input.trim().to_lowercase();
    let digits = trimmed.strip_suffix("kg").unwrap_or(&trimmed).trim();
    let weight = digits.parse::<u32>().ok()?;

    (MIN_CURB_WEIGHT..=MAX_CURB_WEIGHT).contains(&weight).then_some(weight)
}

pub fn parse_yes_no(input: &str) -> Option<bool> {
    let word = input.trim().trim_matches(|ch: char| !ch.is_alphanumeric()).to_lowercase();
    match word.as_str() {
        "yes" | "y" | "jah" | "ja" | "да" => Some(true),
        "no" | "n" | "ei" | "нет" => Some(false),
        _ => None,
    }
}

/// Finds a `+digits` prefix anywhere in a button label such as "🇪🇪 +372".
pub fn parse_country_code(input: &str) -> Option<String> {
    let start = input.find('+')?;
    let digits: String =
        input[start + 1..].chars().take_while(|ch| ch.is_ascii_digit()).collect();

    (1..=4).contains(&digits.len()).then(|| format!("+{digits}"))
}

/// Joins a country code and a local number into `+` and 10 to 15 digits.
/// A number already written with `+` or `00` ignores the code.
pub fn normalize_phone(country_code: &str, input: &str) -> Option<String> {
    let compact: String = input.chars().filter(|ch| !ch.is_whitespace() && *ch != '-').collect();
    let full = if let Some(rest) = compact.strip_prefix("00") {
        format!("+{rest}")
    } else if compact.starts_with('+') {
        compact
    } else {
        format!("{country_code}{compact}")
    };

    let digits = full.strip_prefix('+')?;
    let well_formed = (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len())
        && digits.chars().all(|ch| ch.is_ascii_digit());

    well_formed.then_some(full)
}

pub fn is_done_word(input: &str) -> bool {
    let word = input.trim().to_lowercase();
    matches!(word.as_str(), "done" | "valmis" | "готово" | "✅" | "ok")
}
