//! Per-shopper storefront state: the cart, the one applied coupon and the
//! manual-selection marker.
//!
//! Every cart mutation bumps the cart version and reprices the session. Remote
//! coupon decisions are requested against a [`CartTicket`] and only accepted
//! while the ticket's version is still current.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::aggregates::{AppliedCoupon, CartError, CartItem, CartLedger, Coupon, CouponSource, LineKey};
use crate::domain::events::CheckoutEvent;
use crate::domain::value_objects::{CouponCode, Money};
use crate::pricing::{OrderTotals, PricingContext, PricingEngine, Verdict};
use crate::services::{RemoteAutoApply, RemoteCouponVerdict};

/// Cart state captured when a remote coupon request is issued.
#[derive(Clone, Debug, PartialEq)]
pub struct CartTicket {
    pub version: u64,
    pub subtotal: Money,
    pub items: Vec<CartItem>,
}

/// Read model returned to callers after every operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub version: u64,
    pub items: Vec<CartItem>,
    pub item_count: u32,
    pub applied_coupon: Option<AppliedCoupon>,
    /// The applied coupon waits for the Coupon service to price the new cart.
    pub coupon_pending: bool,
    pub totals: OrderTotals,
}

#[derive(Debug)]
pub struct StorefrontSession {
    id: String,
    cart: CartLedger,
    applied: Option<AppliedCoupon>,
    selected_code: Option<CouponCode>,
    pending: bool,
    version: u64,
    events: Vec<CheckoutEvent>,
}

impl StorefrontSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self::restore(id, CartLedger::new())
    }

    pub fn restore(id: impl Into<String>, cart: CartLedger) -> Self {
        Self { id: id.into(), cart, applied: None, selected_code: None, pending: false, version: 0, events: vec![] }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn cart(&self) -> &CartLedger { &self.cart }
    pub fn applied_coupon(&self) -> Option<&AppliedCoupon> { self.applied.as_ref() }
    pub fn selected_code(&self) -> Option<&CouponCode> { self.selected_code.as_ref() }
    pub fn version(&self) -> u64 { self.version }

    /// Code of an applied coupon the local catalog cannot price, once the cart
    /// has moved past the amount the Coupon service confirmed.
    pub fn unconfirmed_coupon(&self) -> Option<&CouponCode> {
        self.applied.as_ref().filter(|_| self.pending).map(|a| &a.code)
    }

    pub fn totals(&self, engine: &PricingEngine) -> OrderTotals {
        engine.calculator().compute(self.cart.subtotal(), self.applied.as_ref())
    }

    pub fn view(&self, engine: &PricingEngine) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            version: self.version,
            items: self.cart.items().to_vec(),
            item_count: self.cart.item_count(),
            applied_coupon: self.applied.clone(),
            coupon_pending: self.unconfirmed_coupon().is_some(),
            totals: self.totals(engine),
        }
    }

    pub fn ticket(&self) -> CartTicket {
        CartTicket { version: self.version, subtotal: self.cart.subtotal(), items: self.cart.items().to_vec() }
    }

    pub fn take_events(&mut self) -> Vec<CheckoutEvent> { std::mem::take(&mut self.events) }

    // ---------------------------------------------------------------------
    // Cart mutations
    // ---------------------------------------------------------------------

    pub fn add_item(&mut self, item: CartItem, engine: &PricingEngine, catalog: &[Coupon], now: DateTime<Utc>) -> Result<(), CartError> {
        self.cart.add_item(item)?;
        self.cart_changed(engine, catalog, now);
        Ok(())
    }

    pub fn update_quantity(
        &mut self,
        key: &LineKey,
        quantity: u32,
        engine: &PricingEngine,
        catalog: &[Coupon],
        now: DateTime<Utc>,
    ) -> Result<(), CartError> {
        self.cart.update_quantity(key, quantity)?;
        self.cart_changed(engine, catalog, now);
        Ok(())
    }

    pub fn remove_item(&mut self, key: &LineKey, engine: &PricingEngine, catalog: &[Coupon], now: DateTime<Utc>) -> Result<(), CartError> {
        self.cart.remove_item(key)?;
        self.cart_changed(engine, catalog, now);
        Ok(())
    }

    pub fn clear_cart(&mut self) {
        self.cart.clear();
        self.version += 1;
        self.drop_applied("cart is empty");
        self.selected_code = None;
    }

    /// Forgets the cart and coupon after an order went through.
    pub fn reset_after_order(&mut self) {
        self.cart.clear();
        self.version += 1;
        self.applied = None;
        self.selected_code = None;
        self.pending = false;
    }

    fn cart_changed(&mut self, engine: &PricingEngine, catalog: &[Coupon], now: DateTime<Utc>) {
        self.version += 1;
        self.reprice(engine, catalog, now);
    }

    /// Revalidates the applied coupon against the current cart and, when none is
    /// applied and the shopper has not picked one, asks the resolver for one.
    pub fn reprice(&mut self, engine: &PricingEngine, catalog: &[Coupon], now: DateTime<Utc>) {
        if self.cart.is_empty() {
            self.drop_applied("cart is empty");
            self.selected_code = None;
            return;
        }

        let ctx = PricingContext::new(self.cart.subtotal(), self.cart.items(), now);
        if let Some(applied) = self.applied.take() {
            match catalog.iter().find(|c| c.code == applied.code) {
                Some(coupon) => match engine.validator().validate(coupon, &ctx) {
                    Verdict::Eligible { discount } => {
                        self.applied = Some(AppliedCoupon { discount_amount: discount, ..applied });
                    }
                    Verdict::Ineligible(reason) => {
                        tracing::info!(session = %self.id, code = %applied.code, %reason, "applied coupon no longer eligible");
                        if applied.source == CouponSource::Manual {
                            self.selected_code = None;
                        }
                        self.events.push(CheckoutEvent::CouponDropped {
                            session_id: self.id.clone(),
                            code: applied.code,
                            reason: reason.to_string(),
                        });
                    }
                },
                // Not in the local catalog: no discount until the Coupon service reprices it.
                None => {
                    tracing::debug!(session = %self.id, code = %applied.code, "applied coupon awaits confirmation");
                    self.pending = true;
                    self.applied = Some(AppliedCoupon { discount_amount: Money::ZERO, ..applied });
                }
            }
        }

        if self.applied.is_none() {
            if let Some(best) = engine.resolver().resolve(catalog, &ctx, self.selected_code.as_ref()) {
                self.record_applied(&best);
                self.applied = Some(best);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Coupon selection
    // ---------------------------------------------------------------------

    /// Applies a code the Coupon service accepted for `ticket`. Returns `None`
    /// when the cart changed while the request was in flight.
    pub fn accept_manual(&mut self, ticket: &CartTicket, verdict: RemoteCouponVerdict) -> Option<AppliedCoupon> {
        if !self.is_current(ticket, "manual coupon") || !verdict.valid {
            return None;
        }
        let applied = AppliedCoupon {
            code: verdict.code,
            discount_amount: verdict.discount_amount.clamp_to(self.cart.subtotal()),
            description: verdict.description,
            source: CouponSource::Manual,
        };
        self.selected_code = Some(applied.code.clone());
        self.pending = false;
        self.record_applied(&applied);
        self.applied = Some(applied.clone());
        Some(applied)
    }

    /// Applies the Coupon service's auto-apply pick, unless a coupon is already
    /// applied, the shopper picked one, or the cart moved on.
    pub fn accept_auto(&mut self, ticket: &CartTicket, pick: Option<RemoteAutoApply>) -> Option<AppliedCoupon> {
        if !self.is_current(ticket, "auto-apply") || self.applied.is_some() || self.selected_code.is_some() {
            return None;
        }
        let pick = pick?;
        let discount_amount = pick.discount_amount.clamp_to(self.cart.subtotal());
        if !discount_amount.is_positive() {
            return None;
        }
        let applied = AppliedCoupon {
            code: pick.code,
            discount_amount,
            description: pick.description,
            source: CouponSource::Auto,
        };
        self.pending = false;
        self.record_applied(&applied);
        self.applied = Some(applied.clone());
        Some(applied)
    }

    /// Updates the applied coupon from a fresh server-side verdict. A rejected
    /// coupon is dropped.
    pub fn confirm_applied(&mut self, ticket: &CartTicket, verdict: Option<RemoteCouponVerdict>, reason: &str) {
        if !self.is_current(ticket, "coupon confirmation") {
            return;
        }
        match verdict {
            Some(v) if v.valid => {
                let ceiling = self.cart.subtotal();
                if let Some(applied) = self.applied.as_mut().filter(|a| a.code == v.code) {
                    applied.discount_amount = v.discount_amount.clamp_to(ceiling);
                    self.pending = false;
                }
            }
            _ => {
                self.drop_applied(reason);
                self.selected_code = None;
            }
        }
    }

    /// Removes the applied coupon. The resolver stays quiet until the cart changes.
    pub fn remove_coupon(&mut self) -> Option<AppliedCoupon> {
        self.selected_code = None;
        self.pending = false;
        self.applied.take()
    }

    fn is_current(&self, ticket: &CartTicket, what: &str) -> bool {
        let current = ticket.version == self.version;
        if !current {
            tracing::debug!(session = %self.id, what, requested = ticket.version, current = self.version, "ignoring stale coupon result");
        }
        current
    }

    fn drop_applied(&mut self, reason: &str) {
        self.pending = false;
        if let Some(applied) = self.applied.take() {
            self.events.push(CheckoutEvent::CouponDropped {
                session_id: self.id.clone(),
                code: applied.code,
                reason: reason.to_string(),
            });
        }
    }

    fn record_applied(&mut self, applied: &AppliedCoupon) {
        tracing::info!(session = %self.id, code = %applied.code, discount = %applied.discount_amount, source = ?applied.source, "coupon applied");
        self.events.push(CheckoutEvent::CouponApplied {
            session_id: self.id.clone(),
            code: applied.code.clone(),
            discount: applied.discount_amount,
            source: applied.source,
        });
    }
}
