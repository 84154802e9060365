use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::backend::BackendApi;
use crate::errors::{CheckoutError, ReconciliationError};
use crate::models::payment::PaymentResult;
use crate::models::product::Product;
use crate::models::transaction::{
    CreateTransactionRequest, CustomerSnapshot, DeliverySnapshot, PaymentMethodSummary,
    PaymentResultUpdate,
};

/// Keeps the backend's transaction record in step with the provider.
#[derive(Clone)]
pub struct TransactionReconciler {
    backend: Arc<dyn BackendApi>,
}

impl TransactionReconciler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }

    /// Records a PENDING transaction before any money moves.
    ///
    /// The returned id is required to continue, so every failure is propagated.
    #[instrument(skip_all, fields(product_id = %product.id))]
    pub async fn create_transaction(
        &self,
        customer: &CustomerSnapshot,
        product: &Product,
        payment: &PaymentMethodSummary,
        delivery: &DeliverySnapshot,
    ) -> Result<String, CheckoutError> {
        let request = CreateTransactionRequest {
            customer: customer.clone(),
            product_id: product.id.clone(),
            quantity: 1,
            payment: payment.clone(),
            delivery: delivery.clone(),
        };

        let transaction_id = self.backend.create_transaction(&request).await.map_err(|e| {
            error!(error = %e, "Transaction creation failed");
            CheckoutError::TransactionCreation(e.to_string())
        })?;

        info!(transaction_id = %transaction_id, "Pending transaction recorded");
        Ok(transaction_id)
    }

    /// Pushes the provider's final outcome to the backend, which decrements stock on
    /// success.
    #[instrument(skip(self, result), fields(status = %result.status))]
    pub async fn update_transaction_with_payment_result(
        &self,
        transaction_id: &str,
        result: &PaymentResult,
    ) -> Result<(), ReconciliationError> {
        let update = PaymentResultUpdate::from(result);
        self.backend
            .update_payment_result(transaction_id, &update)
            .await
            .map_err(|source| ReconciliationError::Update {
                transaction_id: transaction_id.to_string(),
                source,
            })?;

        info!("Backend transaction reconciled");
        Ok(())
    }

    /// Decrements stock for one sold unit. Returns the new stock level.
    #[instrument(skip_all, fields(product_id = %product.id))]
    pub async fn record_sale(&self, product: &Product) -> Result<i64, ReconciliationError> {
        let stock = product.stock_after_sale();
        self.backend
            .update_stock(&product.id, stock)
            .await
            .map_err(|source| ReconciliationError::Stock {
                product_id: product.id.clone(),
                source,
            })?;
        Ok(stock)
    }
}
