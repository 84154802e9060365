//! Storefront checkout
//!
//! Payment orchestration for a small storefront: card validation, provider
//! tokenization and charge, status polling, backend reconciliation and the session
//! and UI state that carry a purchase from product selection to the result screen.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod backend;
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
pub mod session;
pub mod state;

use std::sync::Arc;

pub use backend::{BackendApi, BackendError, RestBackendClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, PaymentMode};
pub use errors::{CheckoutError, ReconciliationError};
pub use models::payment::{PaymentRequest, PaymentResult, PaymentStatus};
pub use models::payment_form::PaymentFormData;
pub use models::product::{Product, ProductPage};
pub use providers::{PaymentProvider, ProviderError, SandboxProvider, WompiClient};
pub use services::checkout_orchestrator::{CheckoutOrchestrator, CheckoutOutcome};
pub use services::payment_adapter::PaymentAdapter;
pub use services::polling::{CancellationFlag, PollPolicy};
pub use services::pricing::{MoneyBreakdown, PriceCalculator};
pub use services::product_catalog::ProductCatalog;
pub use services::reconciler::TransactionReconciler;
pub use session::{CheckoutSession, FileSessionStore, InMemorySessionStore, SessionBackend};
pub use state::{reduce, CheckoutAction, CheckoutState, CheckoutStep, FinalStatusView};

/// Everything a front end needs, wired from configuration.
#[derive(Clone, Debug)]
pub struct CheckoutServices {
    pub catalog: ProductCatalog,
    pub orchestrator: Arc<CheckoutOrchestrator>,
}

impl CheckoutServices {
    /// Wires the services against the given provider and backend.
    pub fn build(
        config: &AppConfig,
        provider: Arc<dyn PaymentProvider>,
        backend: Arc<dyn BackendApi>,
        session: CheckoutSession,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let adapter = PaymentAdapter::new(
            provider,
            providers::IntegritySigner::new(config.provider.integrity_key.clone()),
            clock.clone(),
            config.provider.mode,
        );
        let orchestrator = CheckoutOrchestrator::new(
            Arc::new(adapter),
            TransactionReconciler::new(backend.clone()),
            session,
            clock,
        )
        .with_pricing(PriceCalculator::from_config(config))
        .with_poll_policy(config.poll_policy())
        .with_currency(config.currency.clone())
        .with_client_stock_update(config.client_stock_update);

        Self {
            catalog: ProductCatalog::new(backend, config.pagination.clone()),
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Wires the services with the live REST clients and the configured session store.
    pub fn from_config(config: &AppConfig) -> Result<Self, anyhow::Error> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let provider = WompiClient::from_config(&config.provider, config.request_timeout())?;
        let backend = RestBackendClient::new(config.api_base_url.clone(), config.request_timeout())?;
        let session = session_from_config(config, clock.clone());
        Ok(Self::build(
            config,
            Arc::new(provider),
            Arc::new(backend),
            session,
            clock,
        ))
    }
}

/// File-backed session when `session_file` is set, in-memory otherwise.
pub fn session_from_config(config: &AppConfig, clock: Arc<dyn Clock>) -> CheckoutSession {
    match &config.session_file {
        Some(path) => CheckoutSession::new(
            Arc::new(FileSessionStore::new(path.clone(), clock.clone())),
            clock,
            config.session_ttl(),
        ),
        None => CheckoutSession::in_memory(clock, config.session_ttl()),
    }
}
