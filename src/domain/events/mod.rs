//! Domain events
use serde::Serialize;

use crate::domain::aggregates::CouponSource;
use crate::domain::value_objects::{CouponCode, Money};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutEvent {
    CouponApplied { session_id: String, code: CouponCode, discount: Money, source: CouponSource },
    CouponDropped { session_id: String, code: CouponCode, reason: String },
    OrderPlaced { session_id: String, order_id: String, order_number: String, total: Money, coupon_code: Option<CouponCode> },
    SubmissionFailed { session_id: String, reason: String },
}

impl CheckoutEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::CouponApplied { .. } => "storefront.coupons.applied",
            Self::CouponDropped { .. } => "storefront.coupons.dropped",
            Self::OrderPlaced { .. } => "storefront.orders.placed",
            Self::SubmissionFailed { .. } => "storefront.orders.failed",
        }
    }
}
