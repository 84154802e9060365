use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::models::payment::{CardBrand, PaymentResult, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySnapshot {
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub department: String,
    pub postal_code: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethodKind {
    CreditCard,
}

/// Card summary sent to the backend: brand and last four digits only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodSummary {
    pub method: PaymentMethodKind,
    pub card_last_four: String,
    pub card_brand: CardBrand,
}

/// Body of `POST /transactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub customer: CustomerSnapshot,
    pub product_id: String,
    pub quantity: u32,
    pub payment: PaymentMethodSummary,
    pub delivery: DeliverySnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Declined,
    Error,
    Voided,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    /// Reads a status string as the backend and the provider report it.
    /// `COMPLETED` counts as approved and `REJECTED` as declined.
    pub fn from_backend(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "APPROVED" | "COMPLETED" => Some(Self::Approved),
            "DECLINED" | "REJECTED" => Some(Self::Declined),
            "ERROR" => Some(Self::Error),
            "VOIDED" => Some(Self::Voided),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_final(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl From<PaymentStatus> for TransactionStatus {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Approved => TransactionStatus::Approved,
            PaymentStatus::Pending => TransactionStatus::Pending,
            PaymentStatus::Declined => TransactionStatus::Declined,
            PaymentStatus::Error => TransactionStatus::Error,
            PaymentStatus::Voided => TransactionStatus::Voided,
            PaymentStatus::Failed => TransactionStatus::Failed,
            PaymentStatus::Cancelled => TransactionStatus::Cancelled,
        }
    }
}

/// Backend transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(deserialize_with = "crate::models::wire_id::deserialize")]
    pub id: String,
    #[serde(default, deserialize_with = "crate::models::wire_id::deserialize_option")]
    pub product_id: Option<String>,
    #[serde(default)]
    pub customer: Option<CustomerSnapshot>,
    #[serde(default)]
    pub payment: Option<PaymentMethodSummary>,
    #[serde(default)]
    pub delivery: Option<DeliverySnapshot>,
    pub status: TransactionStatus,
}

/// Body of `POST /payment/{id}/update-with-provider-result`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResultUpdate {
    pub status: TransactionStatus,
    pub provider_transaction_id: String,
    pub reference: String,
    pub message: String,
    pub processed_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl From<&PaymentResult> for PaymentResultUpdate {
    fn from(result: &PaymentResult) -> Self {
        Self {
            status: result.status.into(),
            provider_transaction_id: result.provider_transaction_id.clone(),
            reference: result.reference.clone(),
            message: result.message.clone(),
            processed_at: result.processed_at,
            amount: result.amount,
            currency: result.currency.clone(),
        }
    }
}
