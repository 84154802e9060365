//! Card and phone input helpers.
//!
//! These are pure functions over strings. The formatters are live-typing masks: they
//! accept partial input and never fail.

use crate::models::payment::{CardBrand, PaymentStatus};

/// Colombian country calling code prepended by [`format_phone_co`].
pub const COLOMBIA_COUNTRY_CODE: &str = "57";

const MAX_CARD_DIGITS: usize = 16;
const MAX_CVC_DIGITS: usize = 4;
const MOBILE_DIGITS: usize = 10;

/// Provider sandbox cards and the outcome the sandbox always produces for them.
pub const TEST_CARDS: [(&str, PaymentStatus); 4] = [
    ("4242424242424242", PaymentStatus::Approved),
    ("4000000000000002", PaymentStatus::Declined),
    ("5555555555554444", PaymentStatus::Approved),
    ("2223003122003222", PaymentStatus::Declined),
];

fn strip_whitespace(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Luhn checksum over the card number. Whitespace is ignored; any other non-digit
/// character (or an empty string) makes the number invalid.
pub fn validate_card_number(raw: &str) -> bool {
    let clean = strip_whitespace(raw);
    if clean.is_empty() || !clean.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let sum: u32 = clean
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();

    sum % 10 == 0
}

pub fn detect_brand(raw: &str) -> CardBrand {
    let clean = strip_whitespace(raw);
    if clean.starts_with('4') {
        return CardBrand::Visa;
    }

    match clean.get(..2).and_then(|prefix| prefix.parse::<u8>().ok()) {
        Some(51..=55) | Some(22..=27) => CardBrand::Mastercard,
        _ => CardBrand::Unknown,
    }
}

/// Groups digits in blocks of four, keeping at most 16 digits.
pub fn format_card_number(raw: &str) -> String {
    let digits: Vec<char> = digits_only(raw).chars().take(MAX_CARD_DIGITS).collect();
    digits
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_cvc(raw: &str) -> String {
    digits_only(raw).chars().take(MAX_CVC_DIGITS).collect()
}

/// Renders a Colombian mobile number as `+57 XXX XXX XXXX`.
///
/// A leading `57` is treated as the country code when more digits follow it, so
/// re-formatting an already formatted value is stable.
pub fn format_phone_co(raw: &str) -> String {
    let mut digits = digits_only(raw);
    if digits.len() > COLOMBIA_COUNTRY_CODE.len() && digits.starts_with(COLOMBIA_COUNTRY_CODE) {
        digits.drain(..COLOMBIA_COUNTRY_CODE.len());
    }
    digits.truncate(MOBILE_DIGITS);

    if digits.is_empty() {
        return String::new();
    }

    let groups: Vec<&str> = [(0, 3), (3, 6), (6, 10)]
        .iter()
        .filter_map(|&(start, end)| digits.get(start..end.min(digits.len())))
        .filter(|group| !group.is_empty())
        .collect();

    format!("+{} {}", COLOMBIA_COUNTRY_CODE, groups.join(" "))
}

/// True when `value` is a complete `+57 XXX XXX XXXX` number.
pub fn is_complete_phone_co(value: &str) -> bool {
    let digits = digits_only(value);
    digits.len() == COLOMBIA_COUNTRY_CODE.len() + MOBILE_DIGITS
        && format_phone_co(&digits) == value
}

pub fn last_four(raw: &str) -> String {
    let clean = strip_whitespace(raw);
    let start = clean.len().saturating_sub(4);
    clean.get(start..).unwrap_or_default().to_string()
}

/// Log-safe rendering of a card number.
pub fn mask_card_number(raw: &str) -> String {
    format!("**** **** **** {}", last_four(raw))
}

/// Outcome the provider sandbox is documented to produce for a known test card.
pub fn sandbox_expectation(raw: &str) -> Option<PaymentStatus> {
    let clean = strip_whitespace(raw);
    TEST_CARDS
        .iter()
        .find(|(number, _)| *number == clean)
        .map(|(_, status)| *status)
}
