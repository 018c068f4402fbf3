//! Auto-apply selection.

use std::cmp::Ordering;

use crate::domain::aggregates::{AppliedCoupon, Coupon, CouponSource};
use crate::domain::value_objects::{CouponCode, Money};
use crate::pricing::{CouponValidator, PricingContext};

/// Picks the single best auto-apply coupon for a cart.
#[derive(Clone, Debug, Default)]
pub struct AutoApplyResolver {
    validator: CouponValidator,
}

impl AutoApplyResolver {
    pub fn new(validator: CouponValidator) -> Self { Self { validator } }

    /// Returns `None` whenever the shopper picked a code themselves, and otherwise
    /// the eligible auto-apply coupon with the largest positive discount. Ties go
    /// to the higher priority, then the earlier `valid_from`, then the code.
    pub fn resolve(
        &self,
        catalog: &[Coupon],
        ctx: &PricingContext<'_>,
        user_selected: Option<&CouponCode>,
    ) -> Option<AppliedCoupon> {
        if user_selected.is_some() { return None; }

        catalog
            .iter()
            .filter(|c| c.is_auto_apply)
            .filter_map(|c| {
                let discount = self.validator.validate(c, ctx).discount()?;
                discount.is_positive().then_some((c, discount))
            })
            .max_by(|a, b| rank(a, b))
            .map(|(coupon, discount)| {
                tracing::debug!(code = %coupon.code, %discount, "auto-apply candidate selected");
                AppliedCoupon {
                    code: coupon.code.clone(),
                    discount_amount: discount,
                    description: coupon.description.clone(),
                    source: CouponSource::Auto,
                }
            })
    }
}

/// Greater means better.
fn rank((a, a_discount): &(&Coupon, Money), (b, b_discount): &(&Coupon, Money)) -> Ordering {
    a_discount
        .cmp(b_discount)
        .then_with(|| a.priority.cmp(&b.priority))
        .then_with(|| b.valid_from.cmp(&a.valid_from))
        .then_with(|| b.code.cmp(&a.code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{CartItem, DiscountType, TargetType};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() }

    fn auto_fixed(code: &str, value: i64) -> Coupon {
        Coupon {
            code: CouponCode::new(code).unwrap(), description: Some(format!("{code} off")), discount_type: DiscountType::Fixed,
            discount_value: Decimal::from(value), min_order_value: Money::ZERO, max_discount: None,
            target_type: TargetType::All, target_ids: vec![], valid_from: now() - Duration::days(3),
            valid_to: now() + Duration::days(3), usage_limit: None, usage_per_user: None, used_count: 0,
            is_active: true, is_auto_apply: true, priority: 0, stackable: false,
        }
    }

    fn cart() -> Vec<CartItem> {
        vec![CartItem {
            product_id: "P1".into(), name: "Áo khoác".into(), unit_price: Money::vnd(1_000_000), sale_price: None,
            quantity: 1, variant: None, stock: None, category_id: None, image: None,
        }]
    }

    fn resolve(catalog: &[Coupon], selected: Option<&CouponCode>) -> Option<AppliedCoupon> {
        let items = cart();
        let ctx = PricingContext::new(Money::vnd(1_000_000), &items, now());
        AutoApplyResolver::default().resolve(catalog, &ctx, selected)
    }

    #[test]
    fn test_picks_largest_discount() {
        let best = resolve(&[auto_fixed("GIAM50K", 50_000), auto_fixed("GIAM80K", 80_000)], None).unwrap();
        assert_eq!(best.code.as_str(), "GIAM80K");
        assert_eq!(best.discount_amount, Money::vnd(80_000));
        assert_eq!(best.source, CouponSource::Auto);
    }

    #[test]
    fn test_defers_to_manual_selection() {
        let manual = CouponCode::new("MYCODE").unwrap();
        assert!(resolve(&[auto_fixed("GIAM80K", 80_000)], Some(&manual)).is_none());
    }

    #[test]
    fn test_ignores_non_auto_expired_and_zero_discounts() {
        let mut manual_only = auto_fixed("MANUAL", 90_000);
        manual_only.is_auto_apply = false;
        let mut expired = auto_fixed("PAST", 95_000);
        expired.valid_to = now() - Duration::days(1);
        let mut shipless = auto_fixed("SHIP", 0);
        shipless.discount_type = DiscountType::Freeship;
        shipless.min_order_value = Money::vnd(2_000_000);
        assert!(resolve(&[manual_only, expired, shipless], None).is_none());
    }

    #[test]
    fn test_ties_break_on_priority_then_start_then_code() {
        let mut low = auto_fixed("LOW", 50_000);
        low.priority = 1;
        let mut high = auto_fixed("HIGH", 50_000);
        high.priority = 9;
        assert_eq!(resolve(&[low.clone(), high.clone()], None).unwrap().code.as_str(), "HIGH");
        assert_eq!(resolve(&[high, low], None).unwrap().code.as_str(), "HIGH");

        let mut older = auto_fixed("OLDER", 50_000);
        older.valid_from = now() - Duration::days(10);
        let newer = auto_fixed("NEWER", 50_000);
        assert_eq!(resolve(&[newer.clone(), older.clone()], None).unwrap().code.as_str(), "OLDER");

        let twin_a = auto_fixed("AAA", 50_000);
        let twin_b = auto_fixed("BBB", 50_000);
        assert_eq!(resolve(&[twin_b.clone(), twin_a.clone()], None).unwrap().code.as_str(), "AAA");
        assert_eq!(resolve(&[twin_a, twin_b], None).unwrap().code.as_str(), "AAA");
    }
}
