//! Remote collaborators: the Coupon, Address Resolution and Order services.

pub mod address;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::domain::aggregates::{CartItem, Coupon, CreatedOrder, OrderSubmission, Region};
use crate::domain::value_objects::{AddressCode, CouponCode, Money};
use crate::Result;

pub use address::{AddressDirectory, FallbackTable};
pub use http::ApiClient;

/// Cart line as the Coupon service expects it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLinePayload {
    pub product_id: String,
    pub price: Money,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

impl From<&CartItem> for CartLinePayload {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            price: item.effective_price(),
            quantity: item.quantity,
            category_id: item.category_id.clone(),
        }
    }
}

/// Coupon service answer to a validation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteCouponVerdict {
    pub valid: bool,
    pub code: CouponCode,
    #[serde(default)]
    pub discount_amount: Money,
    #[serde(default)]
    pub description: Option<String>,
}

/// Coupon service's pick for automatic application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteAutoApply {
    pub code: CouponCode,
    pub discount_amount: Money,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CouponService: Send + Sync {
    /// Coupons currently offered to shoppers.
    async fn active_coupons(&self) -> Result<Vec<Coupon>>;

    /// Server-side eligibility check, the source of truth at submission time.
    async fn validate_code(&self, code: &CouponCode, order_total: Money, items: &[CartItem]) -> Result<RemoteCouponVerdict>;

    async fn auto_apply(&self, order_total: Money, items: &[CartItem]) -> Result<Option<RemoteAutoApply>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddressService: Send + Sync {
    async fn provinces(&self) -> Result<Vec<Region>>;
    async fn districts(&self, province: &AddressCode) -> Result<Vec<Region>>;
    async fn wards(&self, district: &AddressCode) -> Result<Vec<Region>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderService: Send + Sync {
    async fn create_order(&self, submission: &OrderSubmission) -> Result<CreatedOrder>;
}
