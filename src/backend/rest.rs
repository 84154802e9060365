use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use super::{ApiEnvelope, BackendApi, BackendError, BackendPaymentStatus};
use crate::models::product::{Product, ProductPageData};
use crate::models::transaction::{CreateTransactionRequest, PaymentResultUpdate};

#[derive(Debug, Deserialize)]
struct ProductData {
    product: Product,
}

#[derive(Debug, Deserialize)]
struct CreatedTransactionData {
    #[serde(default)]
    transaction: Option<CreatedTransaction>,
}

#[derive(Debug, Deserialize)]
struct CreatedTransaction {
    #[serde(default, deserialize_with = "crate::models::wire_id::deserialize_option")]
    id: Option<String>,
}

/// reqwest client for the storefront backend.
#[derive(Debug, Clone)]
pub struct RestBackendClient {
    client: Client,
    base_url: String,
}

impl RestBackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("storefront-checkout/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, BackendError> {
        self.send_envelope(request, operation).await?.into_data()
    }

    /// For endpoints whose `data` carries nothing the caller needs.
    async fn send_ack(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<(), BackendError> {
        let envelope: ApiEnvelope<serde_json::Value> =
            self.send_envelope(request, operation).await?;
        if envelope.success {
            Ok(())
        } else {
            Err(BackendError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "The operation failed".to_string()),
            ))
        }
    }

    async fn send_envelope<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<ApiEnvelope<T>, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
            error!(operation, status = status.as_u16(), %message, "Backend request failed");
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(operation, error = %e, "Could not decode backend response");
            BackendError::MalformedResponse(format!("{}: {}", operation, e))
        })
    }
}

#[async_trait]
impl BackendApi for RestBackendClient {
    #[instrument(skip(self))]
    async fn list_products(
        &self,
        limit: u32,
        offset: u64,
        available_only: bool,
    ) -> Result<ProductPageData, BackendError> {
        let request = self.client.get(self.url("/products")).query(&[
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("availableOnly", available_only.to_string()),
        ]);
        let page: ProductPageData = self.send(request, "list_products").await?;
        debug!(count = page.products.len(), total = page.pagination.total, "Products fetched");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn get_product(&self, product_id: &str) -> Result<Product, BackendError> {
        let request = self.client.get(self.url(&format!("/products/{}", product_id)));
        let data: ProductData = self.send(request, "get_product").await?;
        Ok(data.product)
    }

    #[instrument(skip(self))]
    async fn update_stock(&self, product_id: &str, stock: i64) -> Result<(), BackendError> {
        let request = self
            .client
            .patch(self.url(&format!("/products/{}/stock", product_id)))
            .json(&json!({ "stock": stock }));
        self.send_ack(request, "update_stock").await?;
        info!(product_id, stock, "Stock updated");
        Ok(())
    }

    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> Result<String, BackendError> {
        let http = self.client.post(self.url("/transactions")).json(request);
        let data: CreatedTransactionData = self.send(http, "create_transaction").await?;

        let id = data
            .transaction
            .and_then(|t| t.id)
            .filter(|id| !id.trim().is_empty())
            .ok_or(BackendError::MissingTransactionId)?;

        info!(transaction_id = %id, "Transaction created");
        Ok(id)
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn update_payment_result(
        &self,
        transaction_id: &str,
        update: &PaymentResultUpdate,
    ) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.url(&format!(
                "/payment/{}/update-with-provider-result",
                transaction_id
            )))
            .json(update);
        self.send_ack(request, "update_payment_result").await?;
        info!(transaction_id, "Transaction updated with provider result");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn payment_status(
        &self,
        transaction_id: &str,
    ) -> Result<BackendPaymentStatus, BackendError> {
        let request = self
            .client
            .get(self.url(&format!("/payment/{}/status", transaction_id)));
        let mut status: BackendPaymentStatus = self.send(request, "payment_status").await?;
        if status.transaction_id.is_empty() {
            status.transaction_id = transaction_id.to_string();
        }
        debug!(status = %status.status, "Backend payment status read");
        Ok(status)
    }
}
