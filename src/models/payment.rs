use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Internal payment status. Everything except `Pending` is terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Approved,
    Pending,
    Declined,
    Error,
    Voided,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn is_success(self) -> bool {
        matches!(self, PaymentStatus::Approved)
    }

    /// Message used when the provider does not send one.
    pub fn default_message(self) -> &'static str {
        match self {
            PaymentStatus::Approved => "Payment approved successfully",
            PaymentStatus::Pending => "Payment is being processed",
            PaymentStatus::Declined => "Payment was declined",
            PaymentStatus::Error => "Payment processing error",
            PaymentStatus::Voided | PaymentStatus::Cancelled => "Payment was cancelled",
            PaymentStatus::Failed => "Payment failed",
        }
    }
}

/// Card network detected from the leading digits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CardBrand {
    Visa,
    Mastercard,
    Unknown,
}

/// Raw card data. Only lives in memory for the duration of one attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct CardDetails {
    pub number: String,
    pub cvc: String,
    pub exp_month: String,
    pub exp_year: String,
    pub card_holder: String,
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field(
                "number",
                &crate::services::card_validator::mask_card_number(&self.number),
            )
            .field("cvc", &"***")
            .field("exp_month", &self.exp_month)
            .field("exp_year", &self.exp_year)
            .field("card_holder", &self.card_holder)
            .finish()
    }
}

/// Input to [`PaymentAdapter::process_payment`](crate::services::payment_adapter::PaymentAdapter::process_payment).
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Backend transaction id the charge belongs to.
    pub transaction_id: String,
    /// Amount in whole currency units.
    pub amount: i64,
    pub currency: String,
    pub customer_email: String,
    pub card: CardDetails,
    pub installments: u32,
}

/// Domain-level outcome of a charge or a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    pub provider_transaction_id: String,
    pub reference: String,
    pub status: PaymentStatus,
    pub message: String,
    pub processed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl PaymentResult {
    /// A failed result that carries no provider transaction.
    pub fn failure(
        status: PaymentStatus,
        message: impl Into<String>,
        reference: impl Into<String>,
        provider_transaction_id: impl Into<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            provider_transaction_id: provider_transaction_id.into(),
            reference: reference.into(),
            status,
            message: message.into(),
            processed_at,
            amount: None,
            currency: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
