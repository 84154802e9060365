use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use super::{
    AcceptanceTokens, CardToken, ChargeRequest, Envelope, ErrorBody, MerchantData,
    PaymentProvider, ProviderError, ProviderTransaction, TokenizeCardRequest, PUBLIC_KEY_PREFIX,
};
use crate::config::ProviderConfig;
use crate::services::card_validator::mask_card_number;

/// REST client for the Wompi payments API.
#[derive(Clone)]
pub struct WompiClient {
    client: Client,
    base_url: String,
    public_key: String,
    private_key: String,
}

impl WompiClient {
    pub fn new(
        base_url: impl Into<String>,
        public_key: impl Into<String>,
        private_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("storefront-checkout/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            public_key: public_key.into(),
            private_key: private_key.into(),
        })
    }

    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        Self::new(
            config.base_url.clone(),
            config.public_key.clone(),
            config.private_key.clone(),
            timeout,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn checked_public_key(&self) -> Result<&str, ProviderError> {
        if self.public_key.starts_with(PUBLIC_KEY_PREFIX) {
            Ok(&self.public_key)
        } else {
            Err(ProviderError::InvalidPublicKey)
        }
    }

    fn key_hint(key: &str) -> String {
        key.chars().take(12).collect::<String>() + "..."
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, ProviderError> {
        let response = request.send().await?;
        Self::decode(response, operation).await
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        operation: &'static str,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let reason = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|parsed| parsed.reason())
                .unwrap_or_else(|| body.clone());
            error!(operation, status = status.as_u16(), %reason, "Provider request failed");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                reason,
            });
        }

        serde_json::from_str::<Envelope<T>>(&body)
            .map(|envelope| envelope.data)
            .map_err(|e| {
                error!(operation, error = %e, "Could not decode provider response");
                ProviderError::MalformedResponse(format!("{}: {}", operation, e))
            })
    }
}

impl std::fmt::Debug for WompiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WompiClient")
            .field("base_url", &self.base_url)
            .field("public_key", &Self::key_hint(&self.public_key))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PaymentProvider for WompiClient {
    #[instrument(skip(self))]
    async fn merchant_acceptance(&self) -> Result<AcceptanceTokens, ProviderError> {
        let public_key = self.checked_public_key()?;
        debug!(public_key = %Self::key_hint(public_key), "Fetching merchant acceptance tokens");

        // Merchant lookup is unauthenticated; the key travels in the path.
        let request = self.client.get(self.url(&format!("/merchants/{}", public_key)));
        let merchant: MerchantData = self.send(request, "merchant_acceptance").await?;

        info!("Acceptance token retrieved");
        Ok(merchant.into())
    }

    #[instrument(skip(self, card))]
    async fn tokenize_card(&self, card: &TokenizeCardRequest) -> Result<CardToken, ProviderError> {
        let public_key = self.checked_public_key()?;
        debug!(card = %mask_card_number(&card.number), "Tokenizing card");

        let request = self
            .client
            .post(self.url("/tokens/cards"))
            .bearer_auth(public_key)
            .json(card);
        let token: CardToken = self.send(request, "tokenize_card").await?;

        if token.id.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "tokenize_card: empty token id".to_string(),
            ));
        }
        info!("Card token created");
        Ok(token)
    }

    #[instrument(skip(self, charge), fields(reference = %charge.reference))]
    async fn create_charge(
        &self,
        charge: &ChargeRequest,
    ) -> Result<ProviderTransaction, ProviderError> {
        let request = self
            .client
            .post(self.url("/transactions"))
            .bearer_auth(&self.private_key)
            .json(charge);
        let transaction: ProviderTransaction = self.send(request, "create_charge").await?;

        info!(
            provider_transaction_id = %transaction.id,
            status = %transaction.status,
            "Charge submitted"
        );
        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn transaction_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ProviderTransaction, ProviderError> {
        let request = self
            .client
            .get(self.url(&format!("/transactions/{}", provider_transaction_id)))
            .bearer_auth(&self.private_key);
        let transaction: ProviderTransaction = self.send(request, "transaction_status").await?;

        debug!(status = %transaction.status, "Transaction status retrieved");
        Ok(transaction)
    }
}
