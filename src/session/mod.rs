//! Typed checkout session storage with expiry.
//!
//! The orchestrator and the views talk to [`CheckoutSession`]; where the bytes live is
//! up to the [`SessionBackend`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::payment::PaymentResult;
use crate::models::payment_form::PaymentFormData;
use crate::state::CheckoutStep;

pub mod file;
pub mod memory;

pub use file::FileSessionStore;
pub use memory::InMemorySessionStore;

pub const PAYMENT_FORM_KEY: &str = "payment_form_data";
pub const PAYMENT_RESULT_KEY: &str = "payment_result";
pub const PURCHASE_PROGRESS_KEY: &str = "purchase_progress";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored value and when it stops being readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub value: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionEntry {
    pub fn new(value: String, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Raw string key/value storage. Expired entries read as absent.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), SessionError>;
    async fn delete(&self, key: &str) -> Result<(), SessionError>;
    async fn clear(&self) -> Result<(), SessionError>;
}

/// Where the customer is in the purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseProgress {
    pub current_step: CheckoutStep,
    #[serde(default)]
    pub selected_product_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Last attempt's outcome, kept for the result screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPaymentResult {
    pub transaction_id: String,
    #[serde(flatten)]
    pub result: PaymentResult,
}

/// Typed view over a [`SessionBackend`].
#[derive(Clone)]
pub struct CheckoutSession {
    backend: Arc<dyn SessionBackend>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl std::fmt::Debug for CheckoutSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutSession")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CheckoutSession {
    pub fn new(backend: Arc<dyn SessionBackend>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            backend,
            clock,
            ttl,
        }
    }

    /// Session kept in process memory.
    pub fn in_memory(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let backend = InMemorySessionStore::new(clock.clone());
        Self::new(Arc::new(backend), clock, ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Unreadable blobs are discarded rather than wedging the flow.
                warn!(key, error = %e, "Discarding unreadable session entry");
                self.backend.delete(key).await?;
                Ok(None)
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SessionError> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(key, &raw, Some(self.ttl)).await
    }

    /// Replaces the saved form. The card number is stored masked and the CVC is dropped.
    pub async fn save_form(&self, form: &PaymentFormData) -> Result<(), SessionError> {
        self.store(PAYMENT_FORM_KEY, form).await?;
        debug!("Payment form saved");
        Ok(())
    }

    pub async fn load_form(&self) -> Result<Option<PaymentFormData>, SessionError> {
        self.load(PAYMENT_FORM_KEY).await
    }

    pub async fn clear_form(&self) -> Result<(), SessionError> {
        self.backend.delete(PAYMENT_FORM_KEY).await
    }

    pub async fn save_result(
        &self,
        transaction_id: &str,
        result: &PaymentResult,
    ) -> Result<(), SessionError> {
        let stored = StoredPaymentResult {
            transaction_id: transaction_id.to_string(),
            result: result.clone(),
        };
        self.store(PAYMENT_RESULT_KEY, &stored).await
    }

    pub async fn load_result(&self) -> Result<Option<StoredPaymentResult>, SessionError> {
        self.load(PAYMENT_RESULT_KEY).await
    }

    pub async fn clear_result(&self) -> Result<(), SessionError> {
        self.backend.delete(PAYMENT_RESULT_KEY).await
    }

    /// Records the current step, stamped with the current time.
    pub async fn save_progress(
        &self,
        current_step: CheckoutStep,
        selected_product_id: Option<&str>,
    ) -> Result<PurchaseProgress, SessionError> {
        let progress = PurchaseProgress {
            current_step,
            selected_product_id: selected_product_id.map(str::to_string),
            timestamp: self.clock.now(),
        };
        self.store(PURCHASE_PROGRESS_KEY, &progress).await?;
        Ok(progress)
    }

    /// Saved progress, if it is younger than the session TTL.
    pub async fn load_progress(&self) -> Result<Option<PurchaseProgress>, SessionError> {
        let progress: Option<PurchaseProgress> = self.load(PURCHASE_PROGRESS_KEY).await?;
        match progress {
            Some(progress) if self.clock.now() - progress.timestamp < self.ttl => Ok(Some(progress)),
            Some(_) => {
                debug!("Saved purchase progress is stale");
                self.backend.delete(PURCHASE_PROGRESS_KEY).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Moves the session to a product. Form data saved for a different product is dropped.
    pub async fn select_product(&self, product_id: &str) -> Result<PurchaseProgress, SessionError> {
        let previous = self
            .load_progress()
            .await?
            .and_then(|progress| progress.selected_product_id);

        if previous.as_deref().is_some_and(|id| id != product_id) {
            info!(product_id, "Different product selected, clearing saved payment data");
            self.clear_form().await?;
            self.clear_result().await?;
        }
        self.save_progress(CheckoutStep::Payment, Some(product_id)).await
    }

    pub async fn clear_all(&self) -> Result<(), SessionError> {
        self.backend.delete(PAYMENT_FORM_KEY).await?;
        self.backend.delete(PAYMENT_RESULT_KEY).await?;
        self.backend.delete(PURCHASE_PROGRESS_KEY).await?;
        info!("Checkout session cleared");
        Ok(())
    }
}
