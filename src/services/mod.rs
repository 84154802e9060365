// Checkout pipeline
pub mod checkout_orchestrator;
pub mod payment_adapter;
pub mod reconciler;

// Building blocks
pub mod card_validator;
pub mod polling;
pub mod pricing;

// Catalog
pub mod product_catalog;
