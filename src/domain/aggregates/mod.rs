//! Aggregates module
pub mod cart;
pub mod coupon;
pub mod order;

pub use cart::{CartError, CartItem, CartLedger, LineKey, Variant};
pub use coupon::{AppliedCoupon, Coupon, CouponDefinitionError, CouponSource, DiscountType, TargetType};
pub use order::{
    CreatedOrder, OrderLine, OrderStatus, OrderSubmission, PaymentMethod, Region, ResolvedAddress,
    ShippingAddressInput, ShippingAddressPayload,
};
