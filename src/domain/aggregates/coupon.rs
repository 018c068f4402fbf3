//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::CartItem;
use crate::domain::value_objects::{CouponCode, Money};

/// Largest fixed discount an admin may author.
pub const MAX_FIXED_DISCOUNT: i64 = 10_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType { Percentage, Fixed, Freeship }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType { #[default] All, Category, Product }

/// Coupon definition as published by the Coupon service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: CouponCode,
    #[serde(default)]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub min_order_value: Money,
    /// Cap for percentage coupons.
    #[serde(default)]
    pub max_discount: Option<Money>,
    #[serde(default)]
    pub target_type: TargetType,
    #[serde(default)]
    pub target_ids: Vec<String>,
    #[serde(with = "lenient_utc")]
    pub valid_from: DateTime<Utc>,
    #[serde(with = "lenient_utc")]
    pub valid_to: DateTime<Utc>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    /// Enforced by the Coupon service, which knows the user's order history.
    #[serde(default)]
    pub usage_per_user: Option<u32>,
    #[serde(default)]
    pub used_count: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_auto_apply: bool,
    #[serde(default)]
    pub priority: i32,
    /// Carried through but never combined: one coupon per cart.
    #[serde(default)]
    pub stackable: bool,
}

fn default_true() -> bool { true }

impl Coupon {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool { now >= self.valid_from }
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now > self.valid_to }
    pub fn usage_exhausted(&self) -> bool { self.usage_limit.is_some_and(|limit| self.used_count >= limit) }

    /// Whether the coupon restricts itself to a subset of the catalog.
    pub fn is_scoped(&self) -> bool { self.target_type != TargetType::All && !self.target_ids.is_empty() }

    pub fn matches_item(&self, item: &CartItem) -> bool {
        if !self.is_scoped() { return true; }
        let id = match self.target_type {
            TargetType::All => return true,
            TargetType::Category => match &item.category_id { Some(id) => id, None => return false },
            TargetType::Product => &item.product_id,
        };
        self.target_ids.iter().any(|t| t == id)
    }

    /// Admin authoring rules a coupon must satisfy before it is published.
    pub fn check_definition(&self) -> Result<(), CouponDefinitionError> {
        if self.valid_to <= self.valid_from { return Err(CouponDefinitionError::InvalidWindow); }
        match self.discount_type {
            DiscountType::Percentage => {
                if self.discount_value <= Decimal::ZERO || self.discount_value > Decimal::ONE_HUNDRED {
                    return Err(CouponDefinitionError::PercentageOutOfRange);
                }
                if self.discount_value >= Decimal::from(50) && self.max_discount.is_none() {
                    return Err(CouponDefinitionError::UncappedSteepPercentage);
                }
            }
            DiscountType::Fixed => {
                if self.discount_value <= Decimal::ZERO { return Err(CouponDefinitionError::NonPositiveAmount); }
                if self.discount_value > Decimal::from(MAX_FIXED_DISCOUNT) { return Err(CouponDefinitionError::AmountTooLarge); }
            }
            DiscountType::Freeship => {}
        }
        if self.min_order_value < Money::ZERO { return Err(CouponDefinitionError::NegativeMinimum); }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponDefinitionError {
    #[error("valid_to must be after valid_from")]
    InvalidWindow,
    #[error("percentage discount must be within 1-100%")]
    PercentageOutOfRange,
    #[error("percentage discounts of 50% or more need a max_discount cap")]
    UncappedSteepPercentage,
    #[error("fixed discount must be greater than zero")]
    NonPositiveAmount,
    #[error("fixed discount exceeds 10,000,000")]
    AmountTooLarge,
    #[error("minimum order value cannot be negative")]
    NegativeMinimum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponSource { Auto, Manual }

/// The one coupon currently discounting a cart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: CouponCode,
    pub discount_amount: Money,
    #[serde(default)]
    pub description: Option<String>,
    pub source: CouponSource,
}

/// Accepts RFC 3339 timestamps and the offset-less ISO timestamps the Coupon
/// service emits, which are UTC.
mod lenient_utc {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn coupon(discount_type: DiscountType, value: i64) -> Coupon {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Coupon {
            code: CouponCode::new("SAVE10").unwrap(), description: None, discount_type,
            discount_value: Decimal::from(value), min_order_value: Money::ZERO, max_discount: None,
            target_type: TargetType::All, target_ids: vec![], valid_from: start, valid_to: start + Duration::days(30),
            usage_limit: None, usage_per_user: None, used_count: 0, is_active: true, is_auto_apply: false,
            priority: 0, stackable: false,
        }
    }

    #[test]
    fn test_definition_rules() {
        assert!(coupon(DiscountType::Percentage, 10).check_definition().is_ok());
        assert_eq!(coupon(DiscountType::Percentage, 0).check_definition(), Err(CouponDefinitionError::PercentageOutOfRange));
        assert_eq!(coupon(DiscountType::Percentage, 60).check_definition(), Err(CouponDefinitionError::UncappedSteepPercentage));
        let mut capped = coupon(DiscountType::Percentage, 60);
        capped.max_discount = Some(Money::vnd(200_000));
        assert!(capped.check_definition().is_ok());
        assert_eq!(coupon(DiscountType::Fixed, 20_000_000).check_definition(), Err(CouponDefinitionError::AmountTooLarge));
        let mut backwards = coupon(DiscountType::Freeship, 0);
        backwards.valid_to = backwards.valid_from;
        assert_eq!(backwards.check_definition(), Err(CouponDefinitionError::InvalidWindow));
    }

    #[test]
    fn test_usage_exhausted() {
        let mut c = coupon(DiscountType::Fixed, 50_000);
        assert!(!c.usage_exhausted());
        c.usage_limit = Some(3);
        c.used_count = 3;
        assert!(c.usage_exhausted());
    }

    #[test]
    fn test_deserializes_service_payload() {
        let json = r#"{
            "code": "freeship", "discount_type": "freeship", "discount_value": 0,
            "valid_from": "2024-01-01T00:00:00", "valid_to": "2024-12-31T23:59:59.500000",
            "is_auto_apply": true, "priority": 5
        }"#;
        let c: Coupon = serde_json::from_str(json).unwrap();
        assert_eq!(c.code.as_str(), "FREESHIP");
        assert!(c.is_active);
        assert_eq!(c.target_type, TargetType::All);
        assert_eq!(c.valid_from, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }
}
