//! Card-payment provider integration.
//!
//! [`PaymentProvider`] is the seam between the payment adapter and the provider's REST
//! API. [`WompiClient`] talks to the real service; [`SandboxProvider`] answers in
//! process from the sandbox test-card table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::payment::CardDetails;

pub mod sandbox;
pub mod signature;
pub mod wompi;

pub use sandbox::SandboxProvider;
pub use signature::IntegritySigner;
pub use wompi::WompiClient;

/// Public keys are issued with this prefix.
pub const PUBLIC_KEY_PREFIX: &str = "pub_";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid public key format. Must start with \"pub_\"")]
    InvalidPublicKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned HTTP {status}: {reason}")]
    Api { status: u16, reason: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Card rejected: {0}")]
    CardRejected(String),

    #[error("Integrity signature does not match the charge")]
    SignatureMismatch,

    #[error("Unknown provider transaction: {0}")]
    UnknownTransaction(String),
}

impl ProviderError {
    /// Human-readable reason, as reported by the provider when it sent one.
    pub fn reason(&self) -> String {
        match self {
            Self::Api { reason, .. } | Self::CardRejected(reason) => reason.clone(),
            other => other.to_string(),
        }
    }

    /// True when the failure reads like a card decline rather than a technical error.
    pub fn is_decline(&self) -> bool {
        is_decline_reason(&self.reason())
    }
}

/// Decline keywords the provider uses in error reasons.
const DECLINE_KEYWORDS: [&str; 2] = ["declined", "insufficient"];

pub fn is_decline_reason(reason: &str) -> bool {
    let lower = reason.to_ascii_lowercase();
    DECLINE_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Every provider response wraps its payload in `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Error body, e.g. `{"error": {"type": "...", "reason": "..."}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub messages_key: Option<String>,
}

impl ErrorBody {
    pub fn reason(&self) -> Option<String> {
        let detail = self.error.as_ref()?;
        detail
            .reason
            .clone()
            .or_else(|| detail.messages_key.clone())
            .or_else(|| detail.kind.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedDocument {
    pub acceptance_token: String,
    pub permalink: String,
}

/// `data` of `GET /merchants/{public_key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantData {
    pub presigned_acceptance: PresignedDocument,
    pub presigned_personal_data_auth: PresignedDocument,
}

/// Consent tokens the merchant must present with every charge, plus the documents
/// they stand for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceTokens {
    pub acceptance_token: String,
    pub personal_data_token: String,
    pub terms_and_conditions_url: String,
    pub privacy_policy_url: String,
}

impl From<MerchantData> for AcceptanceTokens {
    fn from(data: MerchantData) -> Self {
        Self {
            acceptance_token: data.presigned_acceptance.acceptance_token,
            personal_data_token: data.presigned_personal_data_auth.acceptance_token,
            terms_and_conditions_url: data.presigned_acceptance.permalink,
            privacy_policy_url: data.presigned_personal_data_auth.permalink,
        }
    }
}

/// Body of `POST /tokens/cards`.
#[derive(Clone, Serialize)]
pub struct TokenizeCardRequest {
    pub number: String,
    pub cvc: String,
    pub exp_month: String,
    pub exp_year: String,
    pub card_holder: String,
}

impl TokenizeCardRequest {
    pub fn from_card(card: &CardDetails) -> Self {
        let month = card.exp_month.trim();
        Self {
            number: card.number.chars().filter(|c| !c.is_whitespace()).collect(),
            cvc: card.cvc.clone(),
            exp_month: format!("{:0>2}", month),
            exp_year: card.exp_year.trim().to_string(),
            card_holder: card.card_holder.trim().to_string(),
        }
    }
}

impl std::fmt::Debug for TokenizeCardRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizeCardRequest")
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

/// `data` of `POST /tokens/cards`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardToken {
    pub id: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub last_four: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargePaymentMethod {
    #[serde(rename = "type")]
    pub kind: String,
    pub installments: u32,
    pub token: String,
}

/// Body of `POST /transactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub amount_in_cents: i64,
    pub currency: String,
    pub customer_email: String,
    pub reference: String,
    pub acceptance_token: String,
    pub accept_personal_auth: String,
    pub signature: String,
    pub payment_method: ChargePaymentMethod,
}

/// Provider-side transaction as returned by charge and status endpoints.
///
/// `status` stays a raw string here; the payment adapter owns the mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTransaction {
    #[serde(default)]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount_in_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// `GET /merchants/{public_key}`
    async fn merchant_acceptance(&self) -> Result<AcceptanceTokens, ProviderError>;

    /// `POST /tokens/cards`
    async fn tokenize_card(&self, card: &TokenizeCardRequest) -> Result<CardToken, ProviderError>;

    /// `POST /transactions`
    async fn create_charge(
        &self,
        charge: &ChargeRequest,
    ) -> Result<ProviderTransaction, ProviderError>;

    /// `GET /transactions/{id}`
    async fn transaction_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ProviderTransaction, ProviderError>;
}
