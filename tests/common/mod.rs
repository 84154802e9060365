#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use storefront_checkout::{
    backend::{BackendApi, BackendError, BackendPaymentStatus},
    models::product::{Pagination, ProductPageData},
    models::transaction::{CreateTransactionRequest, PaymentResultUpdate},
    providers::{
        AcceptanceTokens, CardToken, ChargeRequest, IntegritySigner, PaymentProvider,
        ProviderError, ProviderTransaction, TokenizeCardRequest,
    },
    services::polling::Sleeper,
    CheckoutOrchestrator, CheckoutSession, Clock, ManualClock, PaymentAdapter, PaymentFormData,
    PaymentMode, PollPolicy, Product, TransactionReconciler,
};

pub const INTEGRITY_KEY: &str = "test_integrity_key";

pub fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap())
}

pub fn product() -> Product {
    Product {
        id: "p-1".into(),
        name: "Wireless headphones".into(),
        description: "Over-ear, noise cancelling".into(),
        price: 100_000,
        base_fee: Some(2000),
        stock: 3,
        is_active: true,
        is_available: true,
        image_url: None,
    }
}

pub fn form(card_number: &str) -> PaymentFormData {
    PaymentFormData {
        card_number: card_number.into(),
        holder_name: "Ana Gomez".into(),
        expiry_month: 8,
        expiry_year: 2029,
        cvc: "123".into(),
        installments: 1,
        customer_name: "Ana Gomez".into(),
        email: "ana@example.com".into(),
        phone: "+57 300 123 4567".into(),
        address: "Calle 10 # 5-20".into(),
        city: "Bogota".into(),
        department: "Cundinamarca".into(),
        postal_code: None,
    }
}

/// Backend fake that hands out `TX1` and records every call.
#[derive(Default)]
pub struct StubBackend {
    pub products: Vec<Product>,
    pub fail_updates: bool,
    pub created: Mutex<Vec<CreateTransactionRequest>>,
    pub updates: Mutex<Vec<(String, PaymentResultUpdate)>>,
    pub stock_updates: Mutex<Vec<(String, i64)>>,
}

impl StubBackend {
    pub fn updates(&self) -> Vec<(String, PaymentResultUpdate)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendApi for StubBackend {
    async fn list_products(
        &self,
        limit: u32,
        offset: u64,
        _available_only: bool,
    ) -> Result<ProductPageData, BackendError> {
        let products: Vec<Product> = self
            .products
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(ProductPageData {
            pagination: Pagination {
                total: self.products.len() as u64,
                has_more: offset + (products.len() as u64) < self.products.len() as u64,
                limit: Some(limit),
                offset: Some(offset),
            },
            products,
        })
    }

    async fn get_product(&self, product_id: &str) -> Result<Product, BackendError> {
        self.products
            .iter()
            .find(|p| p.id == product_id)
            .cloned()
            .ok_or(BackendError::Status {
                status: 404,
                message: "Product not found".into(),
            })
    }

    async fn update_stock(&self, product_id: &str, stock: i64) -> Result<(), BackendError> {
        self.stock_updates
            .lock()
            .unwrap()
            .push((product_id.to_string(), stock));
        Ok(())
    }

    async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> Result<String, BackendError> {
        self.created.lock().unwrap().push(request.clone());
        Ok("TX1".to_string())
    }

    async fn update_payment_result(
        &self,
        transaction_id: &str,
        update: &PaymentResultUpdate,
    ) -> Result<(), BackendError> {
        if self.fail_updates {
            return Err(BackendError::Status {
                status: 503,
                message: "HTTP error! status: 503".into(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((transaction_id.to_string(), update.clone()));
        Ok(())
    }

    async fn payment_status(&self, transaction_id: &str) -> Result<BackendPaymentStatus, BackendError> {
        Err(BackendError::Status {
            status: 404,
            message: format!("Transaction {} not found", transaction_id),
        })
    }
}

/// Provider fake whose status endpoint replays a fixed script.
///
/// The charge always comes back `PENDING`; each status query takes the next scripted
/// status, repeating the last one once the script runs out.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<&'static str>>,
    last: Mutex<&'static str>,
    pub charges: Mutex<Vec<ChargeRequest>>,
    pub status_calls: Mutex<u32>,
}

impl ScriptedProvider {
    pub fn new(script: &[&'static str]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            last: Mutex::new("PENDING"),
            charges: Mutex::new(Vec::new()),
            status_calls: Mutex::new(0),
        }
    }

    pub fn status_calls(&self) -> u32 {
        *self.status_calls.lock().unwrap()
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    async fn merchant_acceptance(&self) -> Result<AcceptanceTokens, ProviderError> {
        Ok(AcceptanceTokens {
            acceptance_token: "acc_token".into(),
            personal_data_token: "pd_token".into(),
            terms_and_conditions_url: "https://example.com/terms.pdf".into(),
            privacy_policy_url: "https://example.com/privacy.pdf".into(),
        })
    }

    async fn tokenize_card(&self, card: &TokenizeCardRequest) -> Result<CardToken, ProviderError> {
        Ok(CardToken {
            id: "tok_test_1".into(),
            brand: Some("VISA".into()),
            last_four: Some(card.number[card.number.len() - 4..].to_string()),
        })
    }

    async fn create_charge(
        &self,
        charge: &ChargeRequest,
    ) -> Result<ProviderTransaction, ProviderError> {
        let signer = IntegritySigner::new(INTEGRITY_KEY);
        if !signer.verify(
            &charge.signature,
            &charge.reference,
            charge.amount_in_cents,
            &charge.currency,
        ) {
            return Err(ProviderError::SignatureMismatch);
        }
        self.charges.lock().unwrap().push(charge.clone());
        Ok(ProviderTransaction {
            id: "prov-1".into(),
            status: "PENDING".into(),
            status_message: None,
            reference: Some(charge.reference.clone()),
            amount_in_cents: Some(charge.amount_in_cents),
            currency: Some(charge.currency.clone()),
            created_at: None,
        })
    }

    async fn transaction_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ProviderTransaction, ProviderError> {
        *self.status_calls.lock().unwrap() += 1;
        let status = {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                *last = next;
            }
            *last
        };
        Ok(ProviderTransaction {
            id: provider_transaction_id.to_string(),
            status: status.to_string(),
            status_message: None,
            reference: None,
            amount_in_cents: Some(12_600_000),
            currency: Some("COP".into()),
            created_at: None,
        })
    }
}

/// Records requested delays without waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Never wakes up on its own; only cancellation ends the wait.
pub struct StalledSleeper;

#[async_trait]
impl Sleeper for StalledSleeper {
    async fn sleep(&self, _duration: Duration) {
        std::future::pending::<()>().await
    }
}

pub struct Harness {
    pub orchestrator: CheckoutOrchestrator,
    pub clock: ManualClock,
}

pub fn orchestrator(
    provider: Arc<dyn PaymentProvider>,
    backend: Arc<dyn BackendApi>,
    sleeper: Arc<dyn Sleeper>,
) -> Harness {
    let clock = clock();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let adapter = PaymentAdapter::new(
        provider,
        IntegritySigner::new(INTEGRITY_KEY),
        shared.clone(),
        PaymentMode::Sandbox,
    );
    let orchestrator = CheckoutOrchestrator::new(
        Arc::new(adapter),
        TransactionReconciler::new(backend),
        CheckoutSession::in_memory(shared.clone(), ChronoDuration::hours(24)),
        shared,
    )
    .with_poll_policy(PollPolicy::standard())
    .with_sleeper(sleeper);

    Harness {
        orchestrator,
        clock,
    }
}
