//! Order totals.

use serde::{Deserialize, Serialize};

use crate::domain::aggregates::AppliedCoupon;
use crate::domain::value_objects::Money;

pub const FREE_SHIPPING_THRESHOLD: i64 = 5_000_000;
pub const BASE_SHIPPING_FEE: i64 = 30_000;

/// Flat shipping fee, waived once the pre-discount subtotal passes the threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingRule {
    pub free_threshold: Money,
    pub base_fee: Money,
}

impl Default for ShippingRule {
    fn default() -> Self {
        Self { free_threshold: Money::vnd(FREE_SHIPPING_THRESHOLD), base_fee: Money::vnd(BASE_SHIPPING_FEE) }
    }
}

impl ShippingRule {
    pub fn fee_for(&self, subtotal: Money) -> Money {
        if subtotal > self.free_threshold { Money::ZERO } else { self.base_fee }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub discount: Money,
    /// Always zero in this market.
    pub tax: Money,
    pub total: Money,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OrderTotalsCalculator {
    shipping: ShippingRule,
}

impl OrderTotalsCalculator {
    pub fn new(shipping: ShippingRule) -> Self { Self { shipping } }

    pub fn shipping_rule(&self) -> &ShippingRule { &self.shipping }

    /// Shipping is decided on the pre-discount subtotal, so a large discount never
    /// brings back a fee that was already waived.
    pub fn compute(&self, subtotal: Money, applied: Option<&AppliedCoupon>) -> OrderTotals {
        let subtotal = subtotal.max(Money::ZERO);
        let shipping_fee = self.shipping.fee_for(subtotal);
        let discount = applied.map_or(Money::ZERO, |c| c.discount_amount).clamp_to(subtotal);
        let total = (subtotal - discount + shipping_fee).max(Money::ZERO);
        OrderTotals { subtotal, shipping_fee, discount, tax: Money::ZERO, total }
    }
}
