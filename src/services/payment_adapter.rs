use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::config::PaymentMode;
use crate::models::payment::{PaymentRequest, PaymentResult, PaymentStatus};
use crate::providers::{
    AcceptanceTokens, ChargePaymentMethod, ChargeRequest, IntegritySigner, PaymentProvider,
    ProviderError, ProviderTransaction, TokenizeCardRequest,
};
use crate::services::card_validator;

const PAYMENT_METHOD_CARD: &str = "CARD";

/// Where the current attempt is. Finished is absorbing until the next attempt starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPhase {
    Init,
    Tokenizing,
    Charging,
    Pending,
    Finished(PaymentStatus),
}

impl fmt::Display for PaymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentPhase::Init => f.write_str("INIT"),
            PaymentPhase::Tokenizing => f.write_str("TOKENIZING"),
            PaymentPhase::Charging => f.write_str("CHARGING"),
            PaymentPhase::Pending => f.write_str("PENDING"),
            PaymentPhase::Finished(status) => write!(f, "{}", status),
        }
    }
}

impl PaymentPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, PaymentPhase::Finished(_))
    }
}

/// Converts a whole-unit amount to the provider's cents.
pub fn to_cents(amount: i64) -> i64 {
    amount * 100
}

/// Provider status string to internal status. `None` for anything unrecognised.
pub fn map_provider_status(raw: &str) -> Option<PaymentStatus> {
    PaymentStatus::from_str(raw).ok()
}

/// Translates a provider transaction into the domain result.
///
/// Unknown statuses become `ERROR` with a message naming the raw value.
pub fn map_provider_transaction(
    transaction: &ProviderTransaction,
    fallback_reference: &str,
    now: DateTime<Utc>,
) -> PaymentResult {
    let (status, message) = match map_provider_status(&transaction.status) {
        Some(status) => {
            let message = transaction
                .status_message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| status.default_message().to_string());
            (status, message)
        }
        None => {
            warn!(raw_status = %transaction.status, "Unknown payment status received");
            (
                PaymentStatus::Error,
                format!("Unknown payment status: {}", transaction.status),
            )
        }
    };

    PaymentResult {
        success: status.is_success(),
        provider_transaction_id: transaction.id.clone(),
        reference: transaction
            .reference
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| fallback_reference.to_string()),
        status,
        message,
        processed_at: transaction.created_at.unwrap_or(now),
        amount: transaction.amount_in_cents.map(|cents| cents / 100),
        currency: transaction.currency.clone(),
    }
}

/// Talks to the card-payment provider and speaks [`PaymentResult`] to everyone else.
pub struct PaymentAdapter {
    provider: Arc<dyn PaymentProvider>,
    signer: IntegritySigner,
    clock: Arc<dyn Clock>,
    mode: PaymentMode,
    phase: watch::Sender<PaymentPhase>,
}

impl PaymentAdapter {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        signer: IntegritySigner,
        clock: Arc<dyn Clock>,
        mode: PaymentMode,
    ) -> Self {
        let (phase, _rx) = watch::channel(PaymentPhase::Init);
        Self {
            provider,
            signer,
            clock,
            mode,
            phase,
        }
    }

    /// Receiver that follows the phase of the current attempt.
    pub fn subscribe_phase(&self) -> watch::Receiver<PaymentPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> PaymentPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: PaymentPhase) {
        self.phase.send_replace(phase);
    }

    /// `TXN-{transaction_id}-{unix millis}`. Not an idempotency key: two calls for the
    /// same transaction normally differ.
    pub fn generate_reference(&self, transaction_id: &str) -> String {
        format!(
            "TXN-{}-{}",
            transaction_id,
            self.clock.now().timestamp_millis()
        )
    }

    /// Acceptance and personal-data tokens with the documents they refer to.
    #[instrument(skip(self))]
    pub async fn acceptance_token_info(&self) -> Result<AcceptanceTokens, ProviderError> {
        self.provider.merchant_acceptance().await.map_err(|e| {
            error!(error = %e, "Failed to get acceptance token info");
            e
        })
    }

    /// Runs acceptance lookup, tokenization, signing and the charge.
    ///
    /// Never fails: every provider error is folded into a non-success result so the
    /// caller can always render an outcome.
    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    pub async fn process_payment(&self, request: &PaymentRequest) -> PaymentResult {
        self.set_phase(PaymentPhase::Init);
        let reference = self.generate_reference(&request.transaction_id);
        let expected = self.sandbox_expectation(&request.card.number);
        info!(
            amount = request.amount,
            currency = %request.currency,
            card = %card_validator::mask_card_number(&request.card.number),
            "Starting payment"
        );

        let result = match self.charge(request, &reference).await {
            Ok(transaction) => map_provider_transaction(&transaction, &reference, self.clock.now()),
            Err(err) => self.failure_result(&err, &reference),
        };

        if let Some(expected) = expected {
            self.check_sandbox_expectation(expected, &result);
        }

        self.set_phase(if result.is_terminal() {
            PaymentPhase::Finished(result.status)
        } else {
            PaymentPhase::Pending
        });

        info!(
            status = %result.status,
            provider_transaction_id = %result.provider_transaction_id,
            "Payment submitted"
        );
        result
    }

    async fn charge(
        &self,
        request: &PaymentRequest,
        reference: &str,
    ) -> Result<ProviderTransaction, ProviderError> {
        let acceptance = self.provider.merchant_acceptance().await?;
        debug!("Step 1: acceptance token retrieved");

        self.set_phase(PaymentPhase::Tokenizing);
        let token = self
            .provider
            .tokenize_card(&TokenizeCardRequest::from_card(&request.card))
            .await?;
        debug!("Step 2: card tokenized");

        let amount_in_cents = to_cents(request.amount);
        let signature = self
            .signer
            .sign(reference, amount_in_cents, &request.currency);
        debug!("Step 3: integrity signature generated");

        self.set_phase(PaymentPhase::Charging);
        let charge = ChargeRequest {
            amount_in_cents,
            currency: request.currency.clone(),
            customer_email: request.customer_email.clone(),
            reference: reference.to_string(),
            acceptance_token: acceptance.acceptance_token,
            accept_personal_auth: acceptance.personal_data_token,
            signature,
            payment_method: ChargePaymentMethod {
                kind: PAYMENT_METHOD_CARD.to_string(),
                installments: request.installments.max(1),
                token: token.id,
            },
        };
        self.provider.create_charge(&charge).await
    }

    fn failure_result(&self, err: &ProviderError, reference: &str) -> PaymentResult {
        let status = if err.is_decline() {
            PaymentStatus::Declined
        } else {
            PaymentStatus::Error
        };
        error!(error = %err, status = %status, "Payment processing failed");

        let message = match err {
            ProviderError::Api { reason, .. } | ProviderError::CardRejected(reason) => {
                reason.clone()
            }
            _ => PaymentStatus::Error.default_message().to_string(),
        };

        PaymentResult::failure(status, message, reference, "", self.clock.now())
    }

    /// Current provider status, with transport failures reported as errors.
    #[instrument(skip(self))]
    pub async fn query_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<PaymentResult, ProviderError> {
        let transaction = self
            .provider
            .transaction_status(provider_transaction_id)
            .await?;
        let result = map_provider_transaction(&transaction, "", self.clock.now());
        if result.is_terminal() {
            self.set_phase(PaymentPhase::Finished(result.status));
        }
        Ok(result)
    }

    /// Current provider status. Failures become an `ERROR` result.
    pub async fn get_payment_status(&self, provider_transaction_id: &str) -> PaymentResult {
        match self.query_status(provider_transaction_id).await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, provider_transaction_id, "Failed to get payment status");
                PaymentResult::failure(
                    PaymentStatus::Error,
                    format!("Failed to get payment status: {}", err),
                    "",
                    provider_transaction_id,
                    self.clock.now(),
                )
            }
        }
    }

    /// Sandbox test cards have documented outcomes. Only consulted in sandbox mode, and
    /// only to flag surprises in the logs.
    fn sandbox_expectation(&self, card_number: &str) -> Option<PaymentStatus> {
        match self.mode {
            PaymentMode::Sandbox => {
                let expected = card_validator::sandbox_expectation(card_number);
                if let Some(expected) = expected {
                    debug!(expected = %expected, "Sandbox test card detected");
                }
                expected
            }
            PaymentMode::Production => None,
        }
    }

    fn check_sandbox_expectation(&self, expected: PaymentStatus, result: &PaymentResult) {
        if result.is_terminal() && result.status != expected {
            warn!(
                expected = %expected,
                actual = %result.status,
                "Sandbox test card produced an unexpected outcome"
            );
        }
    }
}
