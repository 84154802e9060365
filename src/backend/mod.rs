//! Storefront backend REST API: products and transaction records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::product::{Product, ProductPageData};
use crate::models::transaction::{CreateTransactionRequest, PaymentResultUpdate, TransactionStatus};
use crate::models::wire_id;

pub mod rest;

pub use rest::RestBackendClient;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    #[error("Backend response did not include a transaction id")]
    MissingTransactionId,

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// `{ success, data, message }` wrapper used by every backend response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_data(self) -> Result<T, BackendError> {
        if !self.success {
            return Err(BackendError::Rejected(
                self.message
                    .unwrap_or_else(|| "The operation failed".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| BackendError::MalformedResponse("missing data".to_string()))
    }
}

/// Status of a transaction as the backend last recorded it.
///
/// Decodes both the flat `{ transactionId, status }` record and the nested
/// `{ transaction, paymentStatus: { currentStatus, providerInfo } }` report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PaymentStatusWire")]
pub struct BackendPaymentStatus {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub provider_transaction_id: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentStatusWire {
    #[serde(default, alias = "id", deserialize_with = "wire_id::deserialize_option")]
    transaction_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    provider_transaction_id: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    transaction: Option<TransactionWire>,
    #[serde(default)]
    payment_status: Option<PaymentProgressWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionWire {
    #[serde(default, deserialize_with = "wire_id::deserialize_option")]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    provider_transaction_id: Option<String>,
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentProgressWire {
    #[serde(default)]
    current_status: Option<String>,
    #[serde(default)]
    provider_info: Option<ProviderInfoWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderInfoWire {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "id", deserialize_with = "wire_id::deserialize_option")]
    transaction_id: Option<String>,
}

impl TryFrom<PaymentStatusWire> for BackendPaymentStatus {
    type Error = String;

    fn try_from(wire: PaymentStatusWire) -> Result<Self, Self::Error> {
        let transaction = wire.transaction.unwrap_or_default();
        let progress = wire.payment_status.unwrap_or_default();
        let provider = progress.provider_info.unwrap_or_default();

        // Record first, then the payment progress, then the provider's own view.
        let reported: Vec<TransactionStatus> = [
            transaction.status.as_deref(),
            wire.status.as_deref(),
            progress.current_status.as_deref(),
            provider.status.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter_map(TransactionStatus::from_backend)
        .collect();

        let status = reported
            .iter()
            .copied()
            .find(|status| status.is_final())
            .or_else(|| reported.first().copied())
            .ok_or_else(|| "no recognizable payment status".to_string())?;

        Ok(Self {
            transaction_id: transaction
                .id
                .or(wire.transaction_id)
                .unwrap_or_default(),
            status,
            provider_transaction_id: transaction
                .provider_transaction_id
                .or(wire.provider_transaction_id)
                .or(provider.transaction_id),
            reference: transaction.reference.or(wire.reference),
        })
    }
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// `GET /products?limit&offset&availableOnly`
    async fn list_products(
        &self,
        limit: u32,
        offset: u64,
        available_only: bool,
    ) -> Result<ProductPageData, BackendError>;

    /// `GET /products/{id}`
    async fn get_product(&self, product_id: &str) -> Result<Product, BackendError>;

    /// `PATCH /products/{id}/stock`
    async fn update_stock(&self, product_id: &str, stock: i64) -> Result<(), BackendError>;

    /// `POST /transactions`; returns the new transaction id.
    async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> Result<String, BackendError>;

    /// `POST /payment/{id}/update-with-provider-result`
    async fn update_payment_result(
        &self,
        transaction_id: &str,
        update: &PaymentResultUpdate,
    ) -> Result<(), BackendError>;

    /// `GET /payment/{id}/status`
    async fn payment_status(&self, transaction_id: &str)
        -> Result<BackendPaymentStatus, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn failed_envelope_carries_message() {
        let envelope: ApiEnvelope<serde_json::Value> =
            serde_json::from_str(r#"{"success":false,"message":"Product out of stock"}"#).unwrap();
        assert_matches!(envelope.into_data(), Err(BackendError::Rejected(ref m)) if m == "Product out of stock");
    }

    #[test]
    fn successful_envelope_without_data_is_malformed() {
        let envelope: ApiEnvelope<serde_json::Value> =
            serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_matches!(envelope.into_data(), Err(BackendError::MalformedResponse(_)));
    }

    #[test]
    fn payment_status_accepts_id_alias() {
        let status: BackendPaymentStatus =
            serde_json::from_str(r#"{"id":"TX1","status":"APPROVED"}"#).unwrap();
        assert_eq!(status.transaction_id, "TX1");
        assert_eq!(status.status, TransactionStatus::Approved);
    }

    #[test]
    fn nested_payment_status_reads_the_transaction_record() {
        let status: BackendPaymentStatus = serde_json::from_str(
            r#"{
                "transaction": {"id": 7, "status": "APPROVED", "reference": "TXN-7-1"},
                "paymentStatus": {"currentStatus": "APPROVED", "providerInfo": {"id": "prov-7", "status": "APPROVED"}}
            }"#,
        )
        .unwrap();
        assert_eq!(status.transaction_id, "7");
        assert_eq!(status.status, TransactionStatus::Approved);
        assert_eq!(status.provider_transaction_id.as_deref(), Some("prov-7"));
        assert_eq!(status.reference.as_deref(), Some("TXN-7-1"));
    }

    #[test]
    fn provider_verdict_wins_over_a_pending_record() {
        let status: BackendPaymentStatus = serde_json::from_str(
            r#"{
                "transaction": {"id": "TX1", "status": "PENDING"},
                "paymentStatus": {"currentStatus": "PENDING", "providerInfo": {"status": "REJECTED"}}
            }"#,
        )
        .unwrap();
        assert_eq!(status.status, TransactionStatus::Declined);
    }

    #[test]
    fn payment_status_without_any_known_status_is_an_error() {
        let err = serde_json::from_str::<BackendPaymentStatus>(
            r#"{"transaction": {"id": "TX1"}, "paymentStatus": {"currentStatus": "IN_REVIEW"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no recognizable payment status"));
    }

    #[test]
    fn payment_status_serializes_flat() {
        let status = BackendPaymentStatus {
            transaction_id: "TX1".into(),
            status: TransactionStatus::Pending,
            provider_transaction_id: None,
            reference: None,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["transactionId"], "TX1");
        assert_eq!(value["status"], "PENDING");
    }
}
