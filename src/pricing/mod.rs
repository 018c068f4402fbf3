//! Pure pricing core: coupon eligibility, auto-apply selection and order totals.
//!
//! Nothing in here performs I/O or reads the clock; callers pass `now` in.

pub mod resolver;
pub mod totals;
pub mod validator;

pub use resolver::AutoApplyResolver;
pub use totals::{OrderTotals, OrderTotalsCalculator, ShippingRule};
pub use validator::{is_displayable, CouponValidator, Ineligibility, PricingContext, ScopedDiscountBasis, Verdict};

/// Pricing policy shared by every component of the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PricingRules {
    pub shipping: ShippingRule,
    pub scoped_basis: ScopedDiscountBasis,
}

/// The validator, resolver and calculator wired to one set of rules.
#[derive(Clone, Debug)]
pub struct PricingEngine {
    validator: CouponValidator,
    resolver: AutoApplyResolver,
    calculator: OrderTotalsCalculator,
}

impl PricingEngine {
    pub fn new(rules: PricingRules) -> Self {
        let validator = CouponValidator::new(rules);
        Self {
            resolver: AutoApplyResolver::new(validator.clone()),
            calculator: OrderTotalsCalculator::new(rules.shipping),
            validator,
        }
    }

    pub fn validator(&self) -> &CouponValidator { &self.validator }
    pub fn resolver(&self) -> &AutoApplyResolver { &self.resolver }
    pub fn calculator(&self) -> &OrderTotalsCalculator { &self.calculator }
}

impl Default for PricingEngine {
    fn default() -> Self { Self::new(PricingRules::default()) }
}
