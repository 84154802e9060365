use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::payment::CardDetails;
use crate::models::transaction::{
    CustomerSnapshot, DeliverySnapshot, PaymentMethodKind, PaymentMethodSummary,
};
use crate::services::card_validator;

/// Postal code sent to the backend when the customer leaves it blank.
pub const DEFAULT_POSTAL_CODE: &str = "110111";

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

fn validate_card(number: &str) -> Result<(), ValidationError> {
    if card_validator::validate_card_number(number) {
        Ok(())
    } else {
        let mut err = ValidationError::new("card_number");
        err.message = Some("Invalid card number".into());
        Err(err)
    }
}

fn validate_cvc(cvc: &str) -> Result<(), ValidationError> {
    if (3..=4).contains(&cvc.len()) && cvc.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("cvc");
        err.message = Some("CVC must be 3 or 4 digits".into());
        Err(err)
    }
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    if EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        let mut err = ValidationError::new("email");
        err.message = Some("Invalid email".into());
        Err(err)
    }
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if card_validator::is_complete_phone_co(phone) {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone");
        err.message = Some("Phone must use the format +57 XXX XXX XXXX".into());
        Err(err)
    }
}

fn validate_trimmed_min_2(value: &str) -> Result<(), ValidationError> {
    trimmed_min(value, 2)
}

fn validate_trimmed_min_5(value: &str) -> Result<(), ValidationError> {
    trimmed_min(value, 5)
}

fn trimmed_min(value: &str, min: usize) -> Result<(), ValidationError> {
    if value.trim().chars().count() >= min {
        Ok(())
    } else {
        let mut err = ValidationError::new("length");
        err.message = Some(format!("Must be at least {} characters", min).into());
        Err(err)
    }
}

fn serialize_masked_card<S: Serializer>(number: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&card_validator::mask_card_number(number))
}

fn default_installments() -> u32 {
    1
}

/// Everything the customer types into the card form.
///
/// Serializing this type never writes the full card number or the CVC: the number is
/// masked to its last four digits and the CVC is skipped. A deserialized form therefore
/// fails card validation until the card is typed again.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFormData {
    #[validate(custom = "validate_card")]
    #[serde(serialize_with = "serialize_masked_card")]
    pub card_number: String,

    #[validate(custom = "validate_trimmed_min_2")]
    pub holder_name: String,

    #[validate(range(min = 1, max = 12))]
    pub expiry_month: u32,

    pub expiry_year: i32,

    #[validate(custom = "validate_cvc")]
    #[serde(skip_serializing, default)]
    pub cvc: String,

    #[validate(range(min = 1, max = 36))]
    #[serde(default = "default_installments")]
    pub installments: u32,

    #[validate(custom = "validate_trimmed_min_2")]
    pub customer_name: String,

    #[validate(custom = "validate_email")]
    pub email: String,

    #[validate(custom = "validate_phone")]
    pub phone: String,

    #[validate(custom = "validate_trimmed_min_5")]
    pub address: String,

    #[validate(custom = "validate_trimmed_min_2")]
    pub city: String,

    #[validate(custom = "validate_trimmed_min_2")]
    pub department: String,

    #[serde(default)]
    pub postal_code: Option<String>,
}

impl fmt::Debug for PaymentFormData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentFormData")
            .field(
                "card_number",
                &card_validator::mask_card_number(&self.card_number),
            )
            .field("holder_name", &self.holder_name)
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .field("installments", &self.installments)
            .field("customer_name", &self.customer_name)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("city", &self.city)
            .field("department", &self.department)
            .finish_non_exhaustive()
    }
}

impl PaymentFormData {
    /// Field validation plus the checks that depend on the current date.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        if self.expiry_year < now.year() {
            let mut err = ValidationError::new("expiry_year");
            err.message = Some("Card expiry year is in the past".into());
            errors.add("expiry_year", err);
        } else if self.expiry_year == now.year() && self.expiry_month < now.month() {
            let mut err = ValidationError::new("expiry_month");
            err.message = Some("Card has expired".into());
            errors.add("expiry_month", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn customer_snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            name: self.customer_name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.clone(),
        }
    }

    pub fn delivery_snapshot(&self) -> DeliverySnapshot {
        let postal_code = self
            .postal_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(DEFAULT_POSTAL_CODE)
            .to_string();

        DeliverySnapshot {
            address: self.address.trim().to_string(),
            city: self.city.trim().to_string(),
            department: self.department.trim().to_string(),
            postal_code,
            phone: self.phone.clone(),
        }
    }

    pub fn card_summary(&self) -> PaymentMethodSummary {
        PaymentMethodSummary {
            method: PaymentMethodKind::CreditCard,
            card_last_four: card_validator::last_four(&self.card_number),
            card_brand: card_validator::detect_brand(&self.card_number),
        }
    }

    /// Card data normalised the way the provider expects it: digits only, two-digit
    /// month, two-digit year, single-spaced holder name.
    pub fn card_details(&self) -> CardDetails {
        let year = self.expiry_year.to_string();
        let exp_year = year
            .get(year.len().saturating_sub(2)..)
            .unwrap_or_default()
            .to_string();

        CardDetails {
            number: self
                .card_number
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect(),
            cvc: self.cvc.clone(),
            exp_month: format!("{:02}", self.expiry_month),
            exp_year,
            card_holder: self.holder_name.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }
}
