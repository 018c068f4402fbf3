//! Cached view of the coupon definitions published by the Coupon service.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::domain::aggregates::Coupon;
use crate::domain::value_objects::CouponCode;
use crate::pricing::is_displayable;
use crate::services::CouponService;
use crate::Result;

#[derive(Debug, Default)]
struct CatalogState {
    coupons: Arc<Vec<Coupon>>,
    fetched_at: Option<DateTime<Utc>>,
}

/// Read-only coupon catalog shared by every session. Readers get an immutable
/// snapshot; a refresh swaps the whole list at once.
#[derive(Clone, Debug, Default)]
pub struct CouponCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl CouponCatalog {
    pub fn new() -> Self { Self::default() }

    pub fn with_coupons(coupons: Vec<Coupon>, at: DateTime<Utc>) -> Self {
        let catalog = Self::new();
        catalog.replace(coupons, at);
        catalog
    }

    pub fn snapshot(&self) -> Arc<Vec<Coupon>> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner).coupons)
    }

    pub fn find(&self, code: &CouponCode) -> Option<Coupon> {
        self.snapshot().iter().find(|c| &c.code == code).cloned()
    }

    /// Coupons a shopper may currently pick from.
    pub fn displayable(&self, now: DateTime<Utc>) -> Vec<Coupon> {
        self.snapshot().iter().filter(|c| is_displayable(c, now)).cloned().collect()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).fetched_at
    }

    pub fn len(&self) -> usize { self.snapshot().len() }
    pub fn is_empty(&self) -> bool { self.snapshot().is_empty() }

    /// Swaps in a new list. Later duplicates of a code are dropped.
    pub fn replace(&self, coupons: Vec<Coupon>, at: DateTime<Utc>) {
        let mut unique: Vec<Coupon> = Vec::with_capacity(coupons.len());
        for coupon in coupons {
            if unique.iter().any(|c| c.code == coupon.code) {
                tracing::warn!(code = %coupon.code, "duplicate coupon code in catalog, keeping the first");
                continue;
            }
            if let Err(e) = coupon.check_definition() {
                tracing::warn!(code = %coupon.code, error = %e, "coupon definition breaks authoring rules");
            }
            unique.push(coupon);
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.coupons = Arc::new(unique);
        state.fetched_at = Some(at);
    }

    /// Fetches the active list. On failure the previous snapshot stays in place.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, service: &dyn CouponService, at: DateTime<Utc>) -> Result<usize> {
        let coupons = service.active_coupons().await?;
        let count = coupons.len();
        self.replace(coupons, at);
        tracing::debug!(count, "coupon catalog refreshed");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{DiscountType, TargetType};
    use crate::domain::value_objects::Money;
    use crate::services::MockCouponService;
    use crate::StorefrontError;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() }

    fn coupon(code: &str, value: i64) -> Coupon {
        Coupon {
            code: CouponCode::new(code).unwrap(), description: None, discount_type: DiscountType::Fixed,
            discount_value: Decimal::from(value), min_order_value: Money::ZERO, max_discount: None,
            target_type: TargetType::All, target_ids: vec![], valid_from: now() - Duration::days(1),
            valid_to: now() + Duration::days(1), usage_limit: None, usage_per_user: None, used_count: 0,
            is_active: true, is_auto_apply: false, priority: 0, stackable: false,
        }
    }

    #[test]
    fn test_replace_and_find() {
        let catalog = CouponCatalog::new();
        assert!(catalog.is_empty());
        catalog.replace(vec![coupon("A", 1_000), coupon("B", 2_000), coupon("A", 3_000)], now());
        assert_eq!(catalog.len(), 2);
        let a = catalog.find(&CouponCode::new("a").unwrap()).unwrap();
        assert_eq!(a.discount_value, Decimal::from(1_000));
        assert_eq!(catalog.fetched_at(), Some(now()));
    }

    #[test]
    fn test_snapshot_is_stable_across_replace() {
        let catalog = CouponCatalog::with_coupons(vec![coupon("A", 1_000)], now());
        let before = catalog.snapshot();
        catalog.replace(vec![], now());
        assert_eq!(before.len(), 1);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_displayable_hides_expired() {
        let mut old = coupon("OLD", 1_000);
        old.valid_to = now() - Duration::hours(1);
        let catalog = CouponCatalog::with_coupons(vec![old, coupon("NEW", 1_000)], now());
        let shown: Vec<_> = catalog.displayable(now()).into_iter().map(|c| c.code.to_string()).collect();
        assert_eq!(shown, vec!["NEW"]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_on_error() {
        let catalog = CouponCatalog::with_coupons(vec![coupon("KEEP", 1_000)], now());
        let mut service = MockCouponService::new();
        service.expect_active_coupons().times(1).returning(|| Err(StorefrontError::Network("down".into())));
        assert!(catalog.refresh(&service, now()).await.is_err());
        assert_eq!(catalog.len(), 1);

        let mut service = MockCouponService::new();
        service.expect_active_coupons().returning(|| Ok(vec![coupon("X", 1), coupon("Y", 2)]));
        assert_eq!(catalog.refresh(&service, now()).await.unwrap(), 2);
        assert!(catalog.find(&CouponCode::new("KEEP").unwrap()).is_none());
    }
}
