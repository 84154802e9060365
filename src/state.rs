//! Checkout UI state: the step machine, product paging and the result screen model.
//!
//! Everything here is plain data plus pure transitions. Views hold a `CheckoutState`
//! and replace it with `reduce(state, action)`.

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::errors::CheckoutError;
use crate::models::payment::{PaymentResult, PaymentStatus};
use crate::models::payment_form::PaymentFormData;
use crate::models::product::{Product, ProductPage};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid checkout step: {0}")]
pub struct InvalidStep(pub u8);

/// The five screens of a purchase. Stored as its number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum CheckoutStep {
    #[default]
    Products = 1,
    Payment = 2,
    Summary = 3,
    Result = 4,
    Complete = 5,
}

impl CheckoutStep {
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Following step, staying on `Complete`.
    pub fn next(self) -> Self {
        Self::try_from(self.number() + 1).unwrap_or(Self::Complete)
    }

    /// Previous step, staying on `Products`.
    pub fn prev(self) -> Self {
        Self::try_from(self.number().saturating_sub(1)).unwrap_or(Self::Products)
    }
}

impl TryFrom<u8> for CheckoutStep {
    type Error = InvalidStep;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Products),
            2 => Ok(Self::Payment),
            3 => Ok(Self::Summary),
            4 => Ok(Self::Result),
            5 => Ok(Self::Complete),
            other => Err(InvalidStep(other)),
        }
    }
}

impl From<CheckoutStep> for u8 {
    fn from(step: CheckoutStep) -> Self {
        step.number()
    }
}

/// The state shared by every checkout view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckoutState {
    pub current_step: CheckoutStep,
    pub selected_product: Option<Product>,
    pub payment_form: Option<PaymentFormData>,
    pub show_summary: bool,
    pub processing: bool,
    pub transaction_id: Option<String>,
    pub payment_result: Option<PaymentResult>,
    pub error: Option<String>,
    pub retryable: bool,
    /// The charge went out but its outcome is still unknown.
    pub payment_pending: bool,
}

impl CheckoutState {
    pub fn payment_succeeded(&self) -> bool {
        self.payment_result
            .as_ref()
            .map(|result| result.success)
            .unwrap_or(false)
    }

    /// Only one attempt may run, and only once a product and a form are in place.
    pub fn can_start_payment(&self) -> bool {
        !self.processing && self.selected_product.is_some() && self.payment_form.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutAction {
    NextStep,
    PrevStep,
    GoTo(CheckoutStep),
    SelectProduct(Product),
    SubmitForm(PaymentFormData),
    CloseSummary,
    StartProcessing,
    PaymentCompleted {
        transaction_id: String,
        result: PaymentResult,
    },
    PaymentFailed {
        transaction_id: Option<String>,
        message: String,
        retryable: bool,
        pending: bool,
    },
    ContinueAfterResult,
    Restart,
}

impl CheckoutAction {
    /// Maps the outcome of an orchestrated attempt onto the matching action.
    pub fn from_outcome(
        outcome: Result<(String, PaymentResult), (Option<String>, &CheckoutError)>,
    ) -> Self {
        match outcome {
            Ok((transaction_id, result)) => Self::PaymentCompleted {
                transaction_id,
                result,
            },
            Err((transaction_id, err)) => {
                let transaction_id =
                    transaction_id.or_else(|| err.transaction_id().map(str::to_string));
                Self::PaymentFailed {
                    transaction_id,
                    message: err.user_message(),
                    retryable: err.is_retryable(),
                    pending: err.is_payment_pending(),
                }
            }
        }
    }
}

/// Pure transition function for the checkout flow.
pub fn reduce(mut state: CheckoutState, action: CheckoutAction) -> CheckoutState {
    match action {
        CheckoutAction::NextStep => state.current_step = state.current_step.next(),
        CheckoutAction::PrevStep => state.current_step = state.current_step.prev(),
        CheckoutAction::GoTo(step) => state.current_step = step,
        CheckoutAction::SelectProduct(product) => {
            let changed = state
                .selected_product
                .as_ref()
                .map(|current| current.id != product.id)
                .unwrap_or(false);
            if changed {
                state.payment_form = None;
            }
            state.selected_product = Some(product);
            state.payment_result = None;
            state.transaction_id = None;
            state.error = None;
            state.current_step = CheckoutStep::Payment;
        }
        CheckoutAction::SubmitForm(form) => {
            state.payment_form = Some(form);
            state.show_summary = true;
            state.current_step = CheckoutStep::Summary;
        }
        CheckoutAction::CloseSummary => {
            state.show_summary = false;
            if state.current_step == CheckoutStep::Summary {
                state.current_step = CheckoutStep::Payment;
            }
        }
        CheckoutAction::StartProcessing => {
            if !state.processing {
                state.processing = true;
                state.error = None;
            }
        }
        CheckoutAction::PaymentCompleted {
            transaction_id,
            result,
        } => {
            state.processing = false;
            state.show_summary = false;
            state.transaction_id = Some(transaction_id);
            state.retryable = !result.success && result.is_terminal();
            state.payment_pending = false;
            state.payment_result = Some(result);
            state.error = None;
            state.current_step = CheckoutStep::Result;
        }
        CheckoutAction::PaymentFailed {
            transaction_id,
            message,
            retryable,
            pending,
        } => {
            state.processing = false;
            state.show_summary = false;
            state.transaction_id = transaction_id;
            state.payment_result = None;
            state.error = Some(message);
            state.retryable = retryable;
            state.payment_pending = pending;
            state.current_step = CheckoutStep::Result;
        }
        CheckoutAction::ContinueAfterResult => {
            if state.payment_succeeded() {
                state.current_step = CheckoutStep::Complete;
            } else {
                state.payment_result = None;
                state.transaction_id = None;
                state.error = None;
                state.retryable = false;
                state.payment_pending = false;
                state.current_step = CheckoutStep::Payment;
            }
        }
        CheckoutAction::Restart => state = CheckoutState::default(),
    }
    state
}

/// Paging state of the product grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductListState {
    pub items: Vec<Product>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub has_more: bool,
    pub items_per_page: u32,
    pub loading: bool,
    pub error: Option<String>,
}

impl ProductListState {
    pub fn new(items_per_page: u32) -> Self {
        Self {
            items: Vec::new(),
            current_page: 1,
            total_pages: 1,
            total_items: 0,
            has_more: false,
            items_per_page: items_per_page.max(1),
            loading: false,
            error: None,
        }
    }

    pub fn loading(&mut self) {
        self.loading = true;
        self.error = None;
    }

    pub fn loaded(&mut self, page: ProductPage) {
        self.loading = false;
        self.items = page.products;
        self.current_page = page.page;
        self.total_items = page.total;
        self.total_pages = page.total_pages;
        self.has_more = page.has_more;
        self.items_per_page = page.limit;
    }

    pub fn failed(&mut self, message: impl Into<String>) {
        self.loading = false;
        self.error = Some(message.into());
    }

    /// Changes the page size and falls back to page 1 if the current page no longer exists.
    pub fn set_items_per_page(&mut self, items_per_page: u32) {
        self.items_per_page = items_per_page.max(1);
        self.total_pages = total_pages(self.total_items, self.items_per_page);
        if self.current_page > self.total_pages {
            self.current_page = 1;
        }
    }

    /// Mirrors a stock change locally after a sale.
    pub fn update_stock(&mut self, product_id: &str, stock: i64) {
        if let Some(product) = self.items.iter_mut().find(|p| p.id == product_id) {
            product.stock = stock;
        }
    }

    pub fn next_page(&self) -> Option<u32> {
        (self.current_page < self.total_pages).then(|| self.current_page + 1)
    }

    pub fn prev_page(&self) -> Option<u32> {
        (self.current_page > 1).then(|| self.current_page - 1)
    }
}

/// `ceil(total / limit)`, at least 1.
pub fn total_pages(total: u64, limit: u32) -> u32 {
    if total == 0 || limit == 0 {
        return 1;
    }
    let pages = total.div_ceil(u64::from(limit));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FinalStatusKind {
    Success,
    Rejected,
    Pending,
    Error,
    Other,
}

/// What the result screen renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalStatusView {
    pub kind: FinalStatusKind,
    pub title: String,
    pub message: String,
    pub transaction_id: Option<String>,
    pub show_retry: bool,
}

impl FinalStatusView {
    pub fn from_result(transaction_id: Option<&str>, result: &PaymentResult) -> Self {
        let (kind, title, message) = match result.status {
            PaymentStatus::Approved => (
                FinalStatusKind::Success,
                "Payment successful!".to_string(),
                "Your payment was processed successfully".to_string(),
            ),
            PaymentStatus::Declined | PaymentStatus::Failed => (
                FinalStatusKind::Rejected,
                "Payment declined".to_string(),
                "Your payment could not be processed".to_string(),
            ),
            PaymentStatus::Pending => (
                FinalStatusKind::Pending,
                "Payment pending".to_string(),
                "Your payment is being processed".to_string(),
            ),
            PaymentStatus::Error => (
                FinalStatusKind::Error,
                "Something went wrong".to_string(),
                if result.message.is_empty() {
                    "An error occurred while processing your payment".to_string()
                } else {
                    result.message.clone()
                },
            ),
            PaymentStatus::Voided | PaymentStatus::Cancelled => (
                FinalStatusKind::Other,
                "Unknown status".to_string(),
                format!("Status: {}", result.status),
            ),
        };

        Self {
            kind,
            title,
            message,
            transaction_id: transaction_id.map(str::to_string),
            show_retry: !matches!(kind, FinalStatusKind::Success | FinalStatusKind::Pending),
        }
    }

    pub fn from_error(transaction_id: Option<&str>, err: &CheckoutError) -> Self {
        Self::failure(
            transaction_id,
            err.is_payment_pending(),
            err.user_message(),
            err.is_retryable(),
        )
    }

    /// Builds the view straight from the reducer state.
    pub fn from_state(state: &CheckoutState) -> Option<Self> {
        let transaction_id = state.transaction_id.as_deref();
        match (&state.payment_result, &state.error) {
            (Some(result), _) => Some(Self::from_result(transaction_id, result)),
            (None, Some(message)) => Some(Self::failure(
                transaction_id,
                state.payment_pending,
                message.clone(),
                state.retryable,
            )),
            (None, None) => None,
        }
    }

    fn failure(transaction_id: Option<&str>, pending: bool, message: String, show_retry: bool) -> Self {
        let (kind, title) = if pending {
            (FinalStatusKind::Pending, "Payment pending")
        } else {
            (FinalStatusKind::Error, "Something went wrong")
        };
        Self {
            kind,
            title: title.to_string(),
            message,
            transaction_id: transaction_id.map(str::to_string),
            show_retry,
        }
    }
}
