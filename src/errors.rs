use thiserror::Error;

use crate::backend::BackendError;
use crate::session::SessionError;

/// Errors surfaced to the customer by a checkout attempt.
///
/// Provider failures are not listed here: the payment adapter turns them into a
/// [`PaymentResult`](crate::models::payment::PaymentResult) so the attempt always ends
/// with something the result screen can render.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transaction creation failed: {0}")]
    TransactionCreation(String),

    #[error(
        "Payment {transaction_id} (provider {provider_transaction_id}) still pending after {attempts} status checks"
    )]
    Timeout {
        transaction_id: String,
        provider_transaction_id: String,
        attempts: u32,
    },

    #[error("Status polling for {transaction_id} (provider {provider_transaction_id}) was cancelled")]
    Cancelled {
        transaction_id: String,
        provider_transaction_id: String,
    },

    #[error("A checkout attempt is already in progress")]
    AttemptInProgress,

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl From<validator::ValidationErrors> for CheckoutError {
    fn from(err: validator::ValidationErrors) -> Self {
        CheckoutError::Validation(err.to_string())
    }
}

impl From<BackendError> for CheckoutError {
    fn from(err: BackendError) -> Self {
        CheckoutError::TransactionCreation(err.to_string())
    }
}

impl CheckoutError {
    /// Message shown to the customer. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(_) => "Please review the highlighted fields and try again".to_string(),
            Self::TransactionCreation(_) => {
                "We could not start your order. Please try again".to_string()
            }
            Self::Timeout { .. } => {
                "Your payment is still being processed. Please check back later".to_string()
            }
            Self::Cancelled { .. } => "Payment status checks were stopped".to_string(),
            Self::AttemptInProgress => "A payment is already being processed".to_string(),
            Self::Session(_) => "We could not save your checkout progress".to_string(),
        }
    }

    /// Backend transaction the error belongs to, when one had been created.
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::Timeout { transaction_id, .. } | Self::Cancelled { transaction_id, .. } => {
                Some(transaction_id.as_str())
            }
            _ => None,
        }
    }

    /// Provider charge left unsettled, so it can still be looked up later.
    pub fn provider_transaction_id(&self) -> Option<&str> {
        match self {
            Self::Timeout {
                provider_transaction_id,
                ..
            }
            | Self::Cancelled {
                provider_transaction_id,
                ..
            } if !provider_transaction_id.is_empty() => Some(provider_transaction_id.as_str()),
            _ => None,
        }
    }

    /// The charge was submitted but its outcome is not known yet.
    pub fn is_payment_pending(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the result screen should offer the manual retry action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransactionCreation(_) | Self::Session(_) | Self::Cancelled { .. } => true,
            // The charge may still settle; retrying would risk a second charge.
            Self::Timeout { .. } => false,
            Self::Validation(_) | Self::AttemptInProgress => false,
        }
    }
}

/// Failure to push a final payment outcome back to the backend. Logged, never surfaced.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("Failed to update transaction {transaction_id}: {source}")]
    Update {
        transaction_id: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to update stock for product {product_id}: {source}")]
    Stock {
        product_id: String,
        #[source]
        source: BackendError,
    },
}

impl ReconciliationError {
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::Update { transaction_id, .. } => Some(transaction_id),
            Self::Stock { .. } => None,
        }
    }
}
