use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AcceptanceTokens, CardToken, ChargeRequest, IntegritySigner, PaymentProvider, ProviderError,
    ProviderTransaction, TokenizeCardRequest,
};
use crate::clock::Clock;
use crate::models::payment::PaymentStatus;
use crate::services::card_validator::{self, last_four};

const ACCEPTANCE_TOKEN: &str = "sandbox_acceptance_token";
const PERSONAL_DATA_TOKEN: &str = "sandbox_personal_data_token";

#[derive(Debug, Clone)]
struct SandboxCharge {
    transaction: ProviderTransaction,
    outcome: PaymentStatus,
    status_queries: u32,
}

#[derive(Debug, Default)]
struct SandboxState {
    tokens: HashMap<String, String>,
    charges: HashMap<String, SandboxCharge>,
}

/// In-process provider for demos and tests.
///
/// Outcomes come from the sandbox test-card table. Cards outside the table approve
/// when they pass the Luhn check and decline otherwise. A charge starts `PENDING` and
/// reports its outcome once it has been queried `pending_polls` times.
#[derive(Clone)]
pub struct SandboxProvider {
    signer: IntegritySigner,
    clock: Arc<dyn Clock>,
    pending_polls: u32,
    state: Arc<Mutex<SandboxState>>,
}

impl SandboxProvider {
    pub fn new(integrity_key: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            signer: IntegritySigner::new(integrity_key),
            clock,
            pending_polls: 0,
            state: Arc::new(Mutex::new(SandboxState::default())),
        }
    }

    /// Number of status queries that still answer `PENDING` before the outcome shows.
    pub fn with_pending_polls(mut self, pending_polls: u32) -> Self {
        self.pending_polls = pending_polls;
        self
    }

    pub fn outcome_for(card_number: &str) -> PaymentStatus {
        card_validator::sandbox_expectation(card_number).unwrap_or_else(|| {
            if card_validator::validate_card_number(card_number) {
                PaymentStatus::Approved
            } else {
                PaymentStatus::Declined
            }
        })
    }

    pub fn charge_count(&self) -> usize {
        self.lock().charges.len()
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Sandbox provider state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl std::fmt::Debug for SandboxProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxProvider")
            .field("pending_polls", &self.pending_polls)
            .finish_non_exhaustive()
    }
}

fn status_message(status: PaymentStatus) -> Option<String> {
    match status {
        PaymentStatus::Declined => Some("Transaction declined by the issuing bank".to_string()),
        _ => None,
    }
}

#[async_trait]
impl PaymentProvider for SandboxProvider {
    async fn merchant_acceptance(&self) -> Result<AcceptanceTokens, ProviderError> {
        Ok(AcceptanceTokens {
            acceptance_token: ACCEPTANCE_TOKEN.to_string(),
            personal_data_token: PERSONAL_DATA_TOKEN.to_string(),
            terms_and_conditions_url: "https://sandbox.invalid/terms.pdf".to_string(),
            privacy_policy_url: "https://sandbox.invalid/privacy.pdf".to_string(),
        })
    }

    async fn tokenize_card(&self, card: &TokenizeCardRequest) -> Result<CardToken, ProviderError> {
        if card.cvc.len() < 3 {
            return Err(ProviderError::Api {
                status: 422,
                reason: "cvc is invalid".to_string(),
            });
        }

        let id = format!("tok_sandbox_{}", Uuid::new_v4().simple());
        self.lock().tokens.insert(id.clone(), card.number.clone());
        debug!(card = %card_validator::mask_card_number(&card.number), "Sandbox card tokenized");

        Ok(CardToken {
            id,
            brand: Some(card_validator::detect_brand(&card.number).to_string()),
            last_four: Some(last_four(&card.number)),
        })
    }

    async fn create_charge(
        &self,
        charge: &ChargeRequest,
    ) -> Result<ProviderTransaction, ProviderError> {
        if charge.acceptance_token != ACCEPTANCE_TOKEN {
            return Err(ProviderError::Api {
                status: 422,
                reason: "acceptance_token is invalid".to_string(),
            });
        }
        if !self.signer.verify(
            &charge.signature,
            &charge.reference,
            charge.amount_in_cents,
            &charge.currency,
        ) {
            return Err(ProviderError::SignatureMismatch);
        }

        let mut state = self.lock();
        let card_number = state
            .tokens
            .get(&charge.payment_method.token)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                status: 422,
                reason: "payment_method.token is invalid".to_string(),
            })?;

        let outcome = Self::outcome_for(&card_number);
        let transaction = ProviderTransaction {
            id: format!("sbx-{}", Uuid::new_v4().simple()),
            status: PaymentStatus::Pending.to_string(),
            status_message: None,
            reference: Some(charge.reference.clone()),
            amount_in_cents: Some(charge.amount_in_cents),
            currency: Some(charge.currency.clone()),
            created_at: Some(self.clock.now()),
        };

        state.charges.insert(
            transaction.id.clone(),
            SandboxCharge {
                transaction: transaction.clone(),
                outcome,
                status_queries: 0,
            },
        );
        info!(
            provider_transaction_id = %transaction.id,
            expected = %outcome,
            "Sandbox charge accepted"
        );

        Ok(transaction)
    }

    async fn transaction_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ProviderTransaction, ProviderError> {
        let mut state = self.lock();
        let charge = state
            .charges
            .get_mut(provider_transaction_id)
            .ok_or_else(|| ProviderError::UnknownTransaction(provider_transaction_id.to_string()))?;

        charge.status_queries += 1;
        if charge.status_queries > self.pending_polls {
            charge.transaction.status = charge.outcome.to_string();
            charge.transaction.status_message = status_message(charge.outcome);
        }

        Ok(charge.transaction.clone())
    }
}
