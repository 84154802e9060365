use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::config::AppConfig;
use crate::models::product::Product;

/// Derived amounts for a single-unit purchase, in whole currency units.
///
/// Always recomputed from the product and the fee settings; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyBreakdown {
    pub product_amount: i64,
    pub base_fee: i64,
    pub delivery_fee: i64,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
}

impl MoneyBreakdown {
    pub fn total_in_cents(&self) -> i64 {
        self.total * 100
    }
}

/// Computes [`MoneyBreakdown`]s from the configured fees and tax rate.
#[derive(Debug, Clone)]
pub struct PriceCalculator {
    tax_rate: Decimal,
    delivery_fee: i64,
    default_base_fee: i64,
}

impl PriceCalculator {
    pub fn new(tax_rate: Decimal, delivery_fee: i64, default_base_fee: i64) -> Self {
        Self {
            tax_rate,
            delivery_fee,
            default_base_fee,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let tax_rate = Decimal::from_f64(config.tax_rate).unwrap_or(Decimal::ZERO);
        Self::new(tax_rate, config.delivery_fee, config.default_base_fee)
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn breakdown(&self, product: &Product) -> MoneyBreakdown {
        self.breakdown_for(product.price, product.base_fee)
    }

    /// Tax is charged on the product amount only, rounded half away from zero.
    pub fn breakdown_for(&self, product_amount: i64, base_fee: Option<i64>) -> MoneyBreakdown {
        let base_fee = base_fee.unwrap_or(self.default_base_fee);
        let subtotal = product_amount + base_fee + self.delivery_fee;
        let tax = (Decimal::from(product_amount) * self.tax_rate)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or_default();

        MoneyBreakdown {
            product_amount,
            base_fee,
            delivery_fee: self.delivery_fee,
            subtotal,
            tax,
            total: subtotal + tax,
        }
    }
}

impl Default for PriceCalculator {
    fn default() -> Self {
        Self::new(rust_decimal_macros::dec!(0.19), 5000, 2000)
    }
}
