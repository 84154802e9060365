//! Drives one checkout attempt: record, charge, poll, reconcile, persist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn, Span};

use crate::clock::Clock;
use crate::errors::{CheckoutError, ReconciliationError};
use crate::models::payment::{PaymentRequest, PaymentResult, PaymentStatus};
use crate::models::payment_form::PaymentFormData;
use crate::models::product::Product;
use crate::services::payment_adapter::PaymentAdapter;
use crate::services::polling::{
    poll_until, CancellationFlag, PollError, PollPolicy, Sleeper, TokioSleeper,
};
use crate::services::pricing::{MoneyBreakdown, PriceCalculator};
use crate::services::reconciler::TransactionReconciler;
use crate::session::CheckoutSession;
use crate::state::CheckoutStep;

/// Background reconciliation of a finished attempt.
#[derive(Debug)]
pub struct ReconciliationTask(JoinHandle<Result<(), ReconciliationError>>);

impl ReconciliationTask {
    /// Waits for the backend update. Mostly useful in tests and short-lived processes.
    pub async fn wait(self) -> Result<(), ReconciliationError> {
        match self.0.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Reconciliation task did not complete");
                Ok(())
            }
        }
    }
}

/// What a finished attempt hands back to the UI.
#[derive(Debug)]
pub struct CheckoutOutcome {
    pub transaction_id: String,
    pub result: PaymentResult,
    pub breakdown: MoneyBreakdown,
    /// Status queries issued after the charge.
    pub polls: u32,
    pub reconciliation: ReconciliationTask,
}

/// Clears the in-flight flag however the attempt ends.
#[derive(Debug)]
struct AttemptGuard<'a>(&'a AtomicBool);

impl<'a> AttemptGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, CheckoutError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| CheckoutError::AttemptInProgress)
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CheckoutOrchestrator {
    adapter: Arc<PaymentAdapter>,
    reconciler: TransactionReconciler,
    session: CheckoutSession,
    clock: Arc<dyn Clock>,
    pricing: PriceCalculator,
    policy: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
    currency: String,
    client_stock_update: bool,
    in_flight: AtomicBool,
}

impl std::fmt::Debug for CheckoutOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutOrchestrator")
            .field("policy", &self.policy)
            .field("currency", &self.currency)
            .field("client_stock_update", &self.client_stock_update)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl CheckoutOrchestrator {
    pub fn new(
        adapter: Arc<PaymentAdapter>,
        reconciler: TransactionReconciler,
        session: CheckoutSession,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            adapter,
            reconciler,
            session,
            clock,
            pricing: PriceCalculator::default(),
            policy: PollPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            currency: "COP".to_string(),
            client_stock_update: false,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_pricing(mut self, pricing: PriceCalculator) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_client_stock_update(mut self, enabled: bool) -> Self {
        self.client_stock_update = enabled;
        self
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn session(&self) -> &CheckoutSession {
        &self.session
    }

    pub fn adapter(&self) -> &PaymentAdapter {
        &self.adapter
    }

    pub fn quote(&self, product: &Product) -> MoneyBreakdown {
        self.pricing.breakdown(product)
    }

    /// Runs one attempt end to end.
    ///
    /// Only one attempt runs at a time. Cancelling `cancel` stops status polling but
    /// not a charge that has already been submitted.
    #[instrument(
        skip_all,
        fields(product_id = %product.id, transaction_id = tracing::field::Empty)
    )]
    pub async fn checkout(
        &self,
        product: &Product,
        form: &PaymentFormData,
        cancel: &CancellationFlag,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let _guard = AttemptGuard::acquire(&self.in_flight)?;

        form.validate_at(self.clock.now())?;
        if !product.is_purchasable() {
            return Err(CheckoutError::Validation(format!(
                "Product {} is not available",
                product.id
            )));
        }
        self.session.save_form(form).await?;

        let breakdown = self.pricing.breakdown(product);
        let transaction_id = self
            .reconciler
            .create_transaction(
                &form.customer_snapshot(),
                product,
                &form.card_summary(),
                &form.delivery_snapshot(),
            )
            .await?;
        Span::current().record("transaction_id", transaction_id.as_str());

        let request = PaymentRequest {
            transaction_id: transaction_id.clone(),
            amount: breakdown.total,
            currency: self.currency.clone(),
            customer_email: form.email.trim().to_string(),
            card: form.card_details(),
            installments: form.installments,
        };
        let submitted = self.adapter.process_payment(&request).await;

        let (result, polls) = if submitted.is_terminal() {
            (submitted, 0)
        } else {
            match self.wait_for_terminal(&transaction_id, &submitted, cancel).await {
                Ok(settled) => settled,
                Err(e) => {
                    // Keep the pending charge so the provider id can still be looked up.
                    self.persist_outcome(&transaction_id, product, &submitted).await;
                    return Err(e);
                }
            }
        };

        info!(status = %result.status, polls, "Checkout attempt finished");

        let reconciliation = self.spawn_reconciliation(&transaction_id, product, &result);
        self.persist_outcome(&transaction_id, product, &result).await;

        Ok(CheckoutOutcome {
            transaction_id,
            result,
            breakdown,
            polls,
            reconciliation,
        })
    }

    async fn wait_for_terminal(
        &self,
        transaction_id: &str,
        submitted: &PaymentResult,
        cancel: &CancellationFlag,
    ) -> Result<(PaymentResult, u32), CheckoutError> {
        let provider_transaction_id = submitted.provider_transaction_id.clone();
        if provider_transaction_id.is_empty() {
            warn!("Pending charge has no provider transaction id to poll");
            return Err(CheckoutError::Timeout {
                transaction_id: transaction_id.to_string(),
                provider_transaction_id,
                attempts: 0,
            });
        }

        let polled = poll_until(
            &self.policy,
            self.sleeper.as_ref(),
            cancel,
            |_| self.adapter.query_status(&provider_transaction_id),
            |result: &PaymentResult| result.is_terminal(),
        )
        .await;

        match polled {
            Ok(polled) => {
                let mut result = polled.value;
                if result.reference.is_empty() {
                    result.reference = submitted.reference.clone();
                }
                Ok((result, polled.attempts))
            }
            Err(PollError::Exhausted {
                attempts,
                last_error,
            }) => {
                warn!(
                    attempts,
                    last_error = ?last_error.map(|e| e.to_string()),
                    "Payment still pending after polling budget"
                );
                Err(CheckoutError::Timeout {
                    transaction_id: transaction_id.to_string(),
                    provider_transaction_id,
                    attempts,
                })
            }
            Err(PollError::Cancelled { attempts }) => {
                info!(attempts, "Status polling cancelled");
                Err(CheckoutError::Cancelled {
                    transaction_id: transaction_id.to_string(),
                    provider_transaction_id,
                })
            }
        }
    }

    fn spawn_reconciliation(
        &self,
        transaction_id: &str,
        product: &Product,
        result: &PaymentResult,
    ) -> ReconciliationTask {
        let reconciler = self.reconciler.clone();
        let transaction_id = transaction_id.to_string();
        let product = product.clone();
        let result = result.clone();
        let update_stock = self.client_stock_update && result.status == PaymentStatus::Approved;

        ReconciliationTask(tokio::spawn(async move {
            let outcome: Result<(), ReconciliationError> = async {
                reconciler
                    .update_transaction_with_payment_result(&transaction_id, &result)
                    .await?;
                if update_stock {
                    reconciler.record_sale(&product).await?;
                }
                Ok(())
            }
            .await;

            if let Err(e) = &outcome {
                error!(
                    error = %e,
                    transaction_id = e.transaction_id().unwrap_or(&transaction_id),
                    "Reconciliation failed; backend record needs manual follow-up"
                );
            }
            outcome
        }))
    }

    async fn persist_outcome(&self, transaction_id: &str, product: &Product, result: &PaymentResult) {
        if let Err(e) = self.session.save_result(transaction_id, result).await {
            warn!(error = %e, "Could not save payment result to the session");
        }
        if let Err(e) = self
            .session
            .save_progress(CheckoutStep::Result, Some(&product.id))
            .await
        {
            warn!(error = %e, "Could not save purchase progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendApi, BackendError, BackendPaymentStatus};
    use crate::clock::ManualClock;
    use crate::config::PaymentMode;
    use crate::models::payment_form::tests::sample_form;
    use crate::models::product::ProductPageData;
    use crate::models::transaction::{CreateTransactionRequest, PaymentResultUpdate};
    use crate::providers::{IntegritySigner, SandboxProvider};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingBackend {
        fail_create: bool,
        updates: Mutex<Vec<(String, PaymentResultUpdate)>>,
        stock: Mutex<Vec<(String, i64)>>,
    }

    #[async_trait]
    impl BackendApi for RecordingBackend {
        async fn list_products(&self, _: u32, _: u64, _: bool) -> Result<ProductPageData, BackendError> {
            unreachable!()
        }

        async fn get_product(&self, _: &str) -> Result<Product, BackendError> {
            unreachable!()
        }

        async fn update_stock(&self, product_id: &str, stock: i64) -> Result<(), BackendError> {
            self.stock.lock().unwrap().push((product_id.to_string(), stock));
            Ok(())
        }

        async fn create_transaction(&self, _: &CreateTransactionRequest) -> Result<String, BackendError> {
            if self.fail_create {
                Err(BackendError::MissingTransactionId)
            } else {
                Ok("TX1".to_string())
            }
        }

        async fn update_payment_result(
            &self,
            transaction_id: &str,
            update: &PaymentResultUpdate,
        ) -> Result<(), BackendError> {
            self.updates
                .lock()
                .unwrap()
                .push((transaction_id.to_string(), update.clone()));
            Ok(())
        }

        async fn payment_status(&self, _: &str) -> Result<BackendPaymentStatus, BackendError> {
            unreachable!()
        }
    }

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _: Duration) {}
    }

    fn product() -> Product {
        Product {
            id: "p-1".into(),
            name: "Headphones".into(),
            description: String::new(),
            price: 100_000,
            base_fee: Some(2000),
            stock: 3,
            is_active: true,
            is_available: true,
            image_url: None,
        }
    }

    fn orchestrator(
        backend: Arc<RecordingBackend>,
        pending_polls: u32,
    ) -> CheckoutOrchestrator {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap(),
        ));
        let provider = SandboxProvider::new("integrity", clock.clone()).with_pending_polls(pending_polls);
        let adapter = PaymentAdapter::new(
            Arc::new(provider),
            IntegritySigner::new("integrity"),
            clock.clone(),
            PaymentMode::Sandbox,
        );
        CheckoutOrchestrator::new(
            Arc::new(adapter),
            TransactionReconciler::new(backend),
            CheckoutSession::in_memory(clock.clone(), ChronoDuration::hours(24)),
            clock,
        )
        .with_sleeper(Arc::new(NoSleep))
        .with_poll_policy(PollPolicy::fixed(Duration::from_secs(2), 5))
    }

    #[tokio::test]
    async fn approved_checkout_reconciles_and_persists() {
        let backend = Arc::new(RecordingBackend::default());
        let orchestrator = orchestrator(backend.clone(), 0).with_client_stock_update(true);

        let outcome = orchestrator
            .checkout(&product(), &sample_form(), &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(outcome.transaction_id, "TX1");
        assert_eq!(outcome.result.status, PaymentStatus::Approved);
        assert_eq!(outcome.result.amount, Some(126_000));
        assert_eq!(outcome.polls, 1);
        outcome.reconciliation.wait().await.unwrap();

        let updates = backend.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "TX1");
        assert_eq!(backend.stock.lock().unwrap().as_slice(), &[("p-1".to_string(), 2)]);

        let stored = orchestrator.session().load_result().await.unwrap().unwrap();
        assert_eq!(stored.transaction_id, "TX1");
        assert!(!orchestrator.is_processing());
    }

    #[tokio::test]
    async fn invalid_form_never_reaches_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let orchestrator = orchestrator(backend.clone(), 0);
        let mut form = sample_form();
        form.card_number = "4242424242424241".into();

        let err = orchestrator
            .checkout(&product(), &form, &CancellationFlag::new())
            .await
            .unwrap_err();
        assert_matches!(err, CheckoutError::Validation(_));
        assert!(backend.updates.lock().unwrap().is_empty());
        assert!(!orchestrator.is_processing());
    }

    #[tokio::test]
    async fn creation_failure_aborts_before_charging() {
        let backend = Arc::new(RecordingBackend {
            fail_create: true,
            ..Default::default()
        });
        let orchestrator = orchestrator(backend, 0);

        let err = orchestrator
            .checkout(&product(), &sample_form(), &CancellationFlag::new())
            .await
            .unwrap_err();
        assert_matches!(err, CheckoutError::TransactionCreation(_));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn exhausted_polling_is_a_timeout_without_reconciliation() {
        let backend = Arc::new(RecordingBackend::default());
        let orchestrator = orchestrator(backend.clone(), 10);

        let err = orchestrator
            .checkout(&product(), &sample_form(), &CancellationFlag::new())
            .await
            .unwrap_err();
        assert_matches!(err, CheckoutError::Timeout { ref transaction_id, attempts: 5, .. } if transaction_id == "TX1");
        assert!(backend.updates.lock().unwrap().is_empty());

        let provider_id = err.provider_transaction_id().unwrap().to_string();
        let stored = orchestrator.session().load_result().await.unwrap().unwrap();
        assert_eq!(stored.transaction_id, "TX1");
        assert_eq!(stored.result.status, PaymentStatus::Pending);
        assert_eq!(stored.result.provider_transaction_id, provider_id);
    }

    #[tokio::test]
    async fn cancelled_flag_stops_polling() {
        let backend = Arc::new(RecordingBackend::default());
        let orchestrator = orchestrator(backend, 10);
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let err = orchestrator
            .checkout(&product(), &sample_form(), &cancel)
            .await
            .unwrap_err();
        assert_matches!(err, CheckoutError::Cancelled { ref transaction_id, .. } if transaction_id == "TX1");
        assert!(err.provider_transaction_id().is_some());

        let stored = orchestrator.session().load_result().await.unwrap().unwrap();
        assert_eq!(stored.result.status, PaymentStatus::Pending);
        assert_eq!(
            Some(stored.result.provider_transaction_id.as_str()),
            err.provider_transaction_id()
        );
    }

    #[test]
    fn second_attempt_is_rejected_while_one_runs() {
        let flag = AtomicBool::new(false);
        let first = AttemptGuard::acquire(&flag).unwrap();
        assert_matches!(
            AttemptGuard::acquire(&flag),
            Err(CheckoutError::AttemptInProgress)
        );
        drop(first);
        assert!(AttemptGuard::acquire(&flag).is_ok());
    }
}
