//! Coupon eligibility and discount computation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::aggregates::{CartItem, Coupon, DiscountType};
use crate::domain::value_objects::Money;
use crate::pricing::{PricingRules, ShippingRule};

/// What a category- or product-scoped coupon discounts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopedDiscountBasis {
    /// Only the subtotal of the lines the coupon targets.
    #[default]
    MatchingItems,
    /// The whole cart subtotal, as the Coupon service computes it today.
    WholeCart,
}

impl FromStr for ScopedDiscountBasis {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "matching_items" => Ok(Self::MatchingItems),
            "whole_cart" => Ok(Self::WholeCart),
            other => Err(format!("unknown scoped discount basis `{other}`")),
        }
    }
}

/// Why a coupon does not apply to a cart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Ineligibility {
    Inactive,
    NotYetActive,
    Expired,
    UsageLimitExceeded,
    EmptyCart,
    BelowMinOrder { minimum: Money },
    ScopeMismatch,
    /// The Coupon service refused the code; carries its explanation.
    Rejected { message: String },
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "coupon is disabled"),
            Self::NotYetActive => write!(f, "coupon is not active yet"),
            Self::Expired => write!(f, "coupon has expired"),
            Self::UsageLimitExceeded => write!(f, "coupon has been fully redeemed"),
            Self::EmptyCart => write!(f, "cart is empty"),
            Self::BelowMinOrder { minimum } => write!(f, "order must be at least {minimum}"),
            Self::ScopeMismatch => write!(f, "no item in the cart qualifies for this coupon"),
            Self::Rejected { message } => write!(f, "{message}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Eligible { discount: Money },
    Ineligible(Ineligibility),
}

impl Verdict {
    pub fn is_eligible(&self) -> bool { matches!(self, Self::Eligible { .. }) }
    pub fn discount(&self) -> Option<Money> {
        match self { Self::Eligible { discount } => Some(*discount), Self::Ineligible(_) => None }
    }
}

/// Everything about the cart a coupon decision depends on.
#[derive(Clone, Copy, Debug)]
pub struct PricingContext<'a> {
    pub subtotal: Money,
    pub items: &'a [CartItem],
    pub now: DateTime<Utc>,
}

impl<'a> PricingContext<'a> {
    pub fn new(subtotal: Money, items: &'a [CartItem], now: DateTime<Utc>) -> Self {
        Self { subtotal, items, now }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CouponValidator {
    shipping: ShippingRule,
    scoped_basis: ScopedDiscountBasis,
}

impl CouponValidator {
    pub fn new(rules: PricingRules) -> Self {
        Self { shipping: rules.shipping, scoped_basis: rules.scoped_basis }
    }

    /// Runs the eligibility checks in order and stops at the first failure.
    pub fn validate(&self, coupon: &Coupon, ctx: &PricingContext<'_>) -> Verdict {
        match self.checks(coupon, ctx).next() {
            Some(reason) => Verdict::Ineligible(reason),
            None => Verdict::Eligible { discount: self.discount_for(coupon, ctx) },
        }
    }

    /// Every failing check, for explaining why a coupon is unavailable.
    pub fn diagnose(&self, coupon: &Coupon, ctx: &PricingContext<'_>) -> Vec<Ineligibility> {
        self.checks(coupon, ctx).collect()
    }

    fn checks(&self, coupon: &Coupon, ctx: &PricingContext<'_>) -> impl Iterator<Item = Ineligibility> {
        let window = if !coupon.has_started(ctx.now) {
            Some(Ineligibility::NotYetActive)
        } else if coupon.is_expired(ctx.now) {
            Some(Ineligibility::Expired)
        } else {
            None
        };
        let empty = ctx.items.is_empty() || ctx.subtotal.is_zero();
        [
            (!coupon.is_active).then_some(Ineligibility::Inactive),
            window,
            coupon.usage_exhausted().then_some(Ineligibility::UsageLimitExceeded),
            empty.then_some(Ineligibility::EmptyCart),
            (ctx.subtotal < coupon.min_order_value)
                .then_some(Ineligibility::BelowMinOrder { minimum: coupon.min_order_value }),
            (coupon.is_scoped() && !ctx.items.iter().any(|i| coupon.matches_item(i)))
                .then_some(Ineligibility::ScopeMismatch),
        ]
        .into_iter()
        .flatten()
    }

    fn discount_for(&self, coupon: &Coupon, ctx: &PricingContext<'_>) -> Money {
        let basis = self.basis(coupon, ctx);
        let discount = match coupon.discount_type {
            DiscountType::Percentage => {
                let rate = coupon.discount_value.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
                let raw = basis.percent(rate);
                coupon.max_discount.map_or(raw, |cap| raw.min(cap))
            }
            DiscountType::Fixed => Money::new(coupon.discount_value).min(basis),
            DiscountType::Freeship => self.shipping.fee_for(ctx.subtotal),
        };
        discount.clamp_to(ctx.subtotal)
    }

    fn basis(&self, coupon: &Coupon, ctx: &PricingContext<'_>) -> Money {
        if !coupon.is_scoped() || self.scoped_basis == ScopedDiscountBasis::WholeCart {
            return ctx.subtotal;
        }
        ctx.items.iter().filter(|i| coupon.matches_item(i)).map(CartItem::line_total).sum()
    }
}

/// Whether the coupon belongs in the list offered to shoppers.
pub fn is_displayable(coupon: &Coupon, now: DateTime<Utc>) -> bool {
    coupon.is_active && coupon.has_started(now) && !coupon.is_expired(now) && !coupon.usage_exhausted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::TargetType;
    use crate::domain::value_objects::CouponCode;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() }

    fn coupon(code: &str, discount_type: DiscountType, value: i64) -> Coupon {
        Coupon {
            code: CouponCode::new(code).unwrap(), description: None, discount_type,
            discount_value: Decimal::from(value), min_order_value: Money::ZERO, max_discount: None,
            target_type: TargetType::All, target_ids: vec![], valid_from: now() - Duration::days(1),
            valid_to: now() + Duration::days(1), usage_limit: None, usage_per_user: None, used_count: 0,
            is_active: true, is_auto_apply: false, priority: 0, stackable: false,
        }
    }

    fn item(product_id: &str, category: &str, price: i64, quantity: u32) -> CartItem {
        CartItem {
            product_id: product_id.into(), name: product_id.into(), unit_price: Money::vnd(price), sale_price: None,
            quantity, variant: None, stock: None, category_id: Some(category.into()), image: None,
        }
    }

    fn subtotal(items: &[CartItem]) -> Money { items.iter().map(CartItem::line_total).sum() }

    fn verdict(validator: &CouponValidator, c: &Coupon, items: &[CartItem]) -> Verdict {
        validator.validate(c, &PricingContext::new(subtotal(items), items, now()))
    }

    #[test]
    fn test_percentage_uncapped() {
        let items = vec![item("P1", "fashion", 3_000_000, 2)];
        let v = verdict(&CouponValidator::default(), &coupon("SAVE10", DiscountType::Percentage, 10), &items);
        assert_eq!(v, Verdict::Eligible { discount: Money::vnd(600_000) });
    }

    #[test]
    fn test_percentage_capped() {
        let mut c = coupon("SAVE20", DiscountType::Percentage, 20);
        c.max_discount = Some(Money::vnd(100_000));
        let items = vec![item("P1", "fashion", 1_000_000, 1)];
        assert_eq!(verdict(&CouponValidator::default(), &c, &items).discount(), Some(Money::vnd(100_000)));
        let small = vec![item("P1", "fashion", 200_000, 1)];
        assert_eq!(verdict(&CouponValidator::default(), &c, &small).discount(), Some(Money::vnd(40_000)));
    }

    #[test]
    fn test_fixed_is_clamped_to_subtotal() {
        let items = vec![item("P1", "books", 30_000, 1)];
        let v = verdict(&CouponValidator::default(), &coupon("GIAM50K", DiscountType::Fixed, 50_000), &items);
        assert_eq!(v.discount(), Some(Money::vnd(30_000)));
    }

    #[test]
    fn test_freeship_cancels_shipping_only() {
        let validator = CouponValidator::default();
        let c = coupon("FREESHIP", DiscountType::Freeship, 0);
        let items = vec![item("P1", "books", 200_000, 1)];
        assert_eq!(verdict(&validator, &c, &items).discount(), Some(Money::vnd(30_000)));
        let cheap = vec![item("P1", "books", 20_000, 1)];
        assert_eq!(verdict(&validator, &c, &cheap).discount(), Some(Money::vnd(20_000)));
        let big = vec![item("P1", "books", 6_000_000, 1)];
        assert_eq!(verdict(&validator, &c, &big).discount(), Some(Money::ZERO));
    }

    #[test]
    fn test_check_order_short_circuits() {
        let validator = CouponValidator::default();
        let mut c = coupon("OLD", DiscountType::Fixed, 10_000);
        c.is_active = false;
        c.valid_to = now() - Duration::hours(1);
        c.min_order_value = Money::vnd(1_000_000);
        assert_eq!(verdict(&validator, &c, &[]), Verdict::Ineligible(Ineligibility::Inactive));
        let all = validator.diagnose(&c, &PricingContext::new(Money::ZERO, &[], now()));
        assert_eq!(all, vec![
            Ineligibility::Inactive,
            Ineligibility::Expired,
            Ineligibility::EmptyCart,
            Ineligibility::BelowMinOrder { minimum: Money::vnd(1_000_000) },
        ]);
    }

    #[test]
    fn test_expired_and_not_yet_active() {
        let validator = CouponValidator::default();
        let items = vec![item("P1", "books", 100_000, 1)];
        let mut expired = coupon("PAST", DiscountType::Fixed, 10_000);
        expired.valid_to = now() - Duration::seconds(1);
        assert_eq!(verdict(&validator, &expired, &items), Verdict::Ineligible(Ineligibility::Expired));
        let mut future = coupon("SOON", DiscountType::Fixed, 10_000);
        future.valid_from = now() + Duration::seconds(1);
        assert_eq!(verdict(&validator, &future, &items), Verdict::Ineligible(Ineligibility::NotYetActive));
    }

    #[test]
    fn test_usage_limit_and_minimum() {
        let validator = CouponValidator::default();
        let items = vec![item("P1", "books", 100_000, 1)];
        let mut used = coupon("USED", DiscountType::Fixed, 10_000);
        used.usage_limit = Some(5);
        used.used_count = 5;
        assert_eq!(verdict(&validator, &used, &items), Verdict::Ineligible(Ineligibility::UsageLimitExceeded));
        let mut min = coupon("MIN", DiscountType::Fixed, 10_000);
        min.min_order_value = Money::vnd(500_000);
        assert_eq!(
            verdict(&validator, &min, &items),
            Verdict::Ineligible(Ineligibility::BelowMinOrder { minimum: Money::vnd(500_000) })
        );
    }

    #[test]
    fn test_scoped_coupon_basis() {
        let items = vec![item("P1", "fashion", 400_000, 1), item("P2", "books", 600_000, 1)];
        let mut c = coupon("FASHION10", DiscountType::Percentage, 10);
        c.target_type = TargetType::Category;
        c.target_ids = vec!["fashion".into()];

        let matching = CouponValidator::default();
        assert_eq!(verdict(&matching, &c, &items).discount(), Some(Money::vnd(40_000)));

        let whole = CouponValidator::new(PricingRules { scoped_basis: ScopedDiscountBasis::WholeCart, ..Default::default() });
        assert_eq!(verdict(&whole, &c, &items).discount(), Some(Money::vnd(100_000)));

        let books_only = vec![item("P2", "books", 600_000, 1)];
        assert_eq!(verdict(&matching, &c, &books_only), Verdict::Ineligible(Ineligibility::ScopeMismatch));

        let mut product = coupon("P2ONLY", DiscountType::Fixed, 700_000);
        product.target_type = TargetType::Product;
        product.target_ids = vec!["P2".into()];
        assert_eq!(verdict(&matching, &product, &items).discount(), Some(Money::vnd(600_000)));
    }

    #[test]
    fn test_discount_bounds_hold_across_carts() {
        let validator = CouponValidator::default();
        let coupons = [
            coupon("PCT", DiscountType::Percentage, 35),
            coupon("FIX", DiscountType::Fixed, 250_000),
            coupon("SHIP", DiscountType::Freeship, 0),
        ];
        for price in [1_000, 25_000, 180_000, 999_999, 5_000_000] {
            for qty in 1..=4 {
                let items = vec![item("P1", "home", price, qty)];
                for c in &coupons {
                    let d = verdict(&validator, c, &items).discount().unwrap();
                    assert!(d >= Money::ZERO && d <= subtotal(&items), "{} on {price}x{qty}", c.code);
                }
            }
        }
    }

    #[test]
    fn test_displayable() {
        let c = coupon("SHOW", DiscountType::Fixed, 10_000);
        assert!(is_displayable(&c, now()));
        assert!(!is_displayable(&c, now() + Duration::days(2)));
    }
}
