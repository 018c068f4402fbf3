//! Storefront application service: owns the sessions and wires the pricing
//! engine to the remote collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::catalog::CouponCatalog;
use crate::checkout::{CheckoutError, CheckoutOrchestrator, CheckoutView};
use crate::clock::Clock;
use crate::domain::aggregates::{
    CartError, CartItem, CartLedger, Coupon, CreatedOrder, DiscountType, LineKey, PaymentMethod, ShippingAddressInput,
};
use crate::domain::events::CheckoutEvent;
use crate::domain::value_objects::{CouponCode, Money};
use crate::pricing::{Ineligibility, OrderTotals, PricingContext, PricingEngine, PricingRules, Verdict};
use crate::services::{AddressDirectory, AddressService, CouponService, OrderService};
use crate::session::{CartTicket, SessionView, StorefrontSession};
use crate::store::CartStore;
use crate::{Result, StorefrontError};

const EVENT_BUFFER: usize = 256;
const MAX_SESSION_ID_LEN: usize = 128;

/// A session and its checkout, locked together.
#[derive(Debug)]
pub struct SessionSlot {
    pub session: StorefrontSession,
    pub checkout: CheckoutOrchestrator,
}

/// A slot in the session map and when it was last asked for.
struct SessionEntry {
    slot: Arc<Mutex<SessionSlot>>,
    last_seen: DateTime<Utc>,
}

/// Remote collaborators and infrastructure the storefront runs against.
pub struct Collaborators {
    pub coupons: Arc<dyn CouponService>,
    pub addresses: Arc<dyn AddressService>,
    pub orders: Arc<dyn OrderService>,
    pub store: Arc<dyn CartStore>,
    pub clock: Arc<dyn Clock>,
}

/// A displayable coupon with its preview against the current cart.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CouponOffer {
    pub code: CouponCode,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub is_auto_apply: bool,
    pub eligible: bool,
    pub discount: Option<Money>,
    /// Every rule the coupon currently fails, empty when eligible.
    pub reasons: Vec<Ineligibility>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReviewView {
    pub cart: SessionView,
    pub checkout: CheckoutView,
    pub totals: OrderTotals,
}

struct Inner {
    engine: PricingEngine,
    catalog: CouponCatalog,
    coupons: Arc<dyn CouponService>,
    orders: Arc<dyn OrderService>,
    addresses: AddressDirectory,
    store: Arc<dyn CartStore>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<CheckoutEvent>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

#[derive(Clone)]
pub struct Storefront {
    inner: Arc<Inner>,
}

impl Storefront {
    pub fn new(rules: PricingRules, catalog: CouponCatalog, deps: Collaborators) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                engine: PricingEngine::new(rules),
                catalog,
                coupons: deps.coupons,
                orders: deps.orders,
                addresses: AddressDirectory::new(deps.addresses),
                store: deps.store,
                clock: deps.clock,
                events,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn engine(&self) -> &PricingEngine { &self.inner.engine }
    pub fn addresses(&self) -> &AddressDirectory { &self.inner.addresses }

    /// Receives every checkout event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CheckoutEvent> { self.inner.events.subscribe() }

    /// Refreshes the coupon catalog and reprices nothing; sessions pick the new
    /// list up on their next cart change.
    pub async fn refresh_catalog(&self) -> Result<usize> {
        self.inner.catalog.refresh(self.inner.coupons.as_ref(), self.inner.clock.now()).await
    }

    // ---------------------------------------------------------------------
    // Cart
    // ---------------------------------------------------------------------

    /// Starts a session under a fresh time-ordered id.
    pub async fn open_session(&self) -> Result<SessionView> {
        self.cart(&Uuid::now_v7().to_string()).await
    }

    pub async fn cart(&self, session_id: &str) -> Result<SessionView> {
        let slot = self.slot(session_id).await?;
        let slot = slot.lock().await;
        Ok(slot.session.view(&self.inner.engine))
    }

    #[tracing::instrument(skip(self, item), fields(product_id = %item.product_id))]
    pub async fn add_item(&self, session_id: &str, item: CartItem) -> Result<SessionView> {
        self.mutate_cart(session_id, |session, engine, catalog, now| session.add_item(item, engine, catalog, now)).await
    }

    pub async fn update_quantity(&self, session_id: &str, key: &LineKey, quantity: u32) -> Result<SessionView> {
        self.mutate_cart(session_id, |session, engine, catalog, now| session.update_quantity(key, quantity, engine, catalog, now))
            .await
    }

    pub async fn remove_item(&self, session_id: &str, key: &LineKey) -> Result<SessionView> {
        self.mutate_cart(session_id, |session, engine, catalog, now| session.remove_item(key, engine, catalog, now)).await
    }

    pub async fn clear_cart(&self, session_id: &str) -> Result<SessionView> {
        self.mutate_cart(session_id, |session, _, _, _| {
            session.clear_cart();
            Ok(())
        })
        .await
    }

    async fn mutate_cart<F>(&self, session_id: &str, mutate: F) -> Result<SessionView>
    where
        F: FnOnce(&mut StorefrontSession, &PricingEngine, &[Coupon], DateTime<Utc>) -> std::result::Result<(), CartError>,
    {
        let slot = self.slot(session_id).await?;
        let (ticket, code) = {
            let mut guard = slot.lock().await;
            ensure_not_submitting(&guard.checkout)?;
            let catalog = self.inner.catalog.snapshot();
            mutate(&mut guard.session, &self.inner.engine, catalog.as_slice(), self.inner.clock.now())?;
            self.persist(&guard.session).await;
            self.publish(&mut guard);
            match guard.session.unconfirmed_coupon() {
                Some(code) => (guard.session.ticket(), code.clone()),
                None => return Ok(guard.session.view(&self.inner.engine)),
            }
        };

        if let Err(e) = self.reconfirm(&slot, &ticket, &code).await {
            tracing::warn!(session = session_id, %code, error = %e, "could not reprice applied coupon");
        }
        let guard = slot.lock().await;
        Ok(guard.session.view(&self.inner.engine))
    }

    // ---------------------------------------------------------------------
    // Coupons
    // ---------------------------------------------------------------------

    /// Checks a code with the Coupon service and applies it as the shopper's choice.
    #[tracing::instrument(skip(self))]
    pub async fn apply_coupon(&self, session_id: &str, raw_code: &str) -> Result<SessionView> {
        let code = CouponCode::new(raw_code).map_err(|e| StorefrontError::Validation(e.to_string()))?;
        let slot = self.slot(session_id).await?;

        let ticket = {
            let slot = slot.lock().await;
            ensure_not_submitting(&slot.checkout)?;
            if slot.session.cart().is_empty() {
                return Err(StorefrontError::CouponIneligible { code, reason: Ineligibility::EmptyCart });
            }
            slot.session.ticket()
        };

        let verdict = self.inner.coupons.validate_code(&code, ticket.subtotal, &ticket.items).await?;
        if !verdict.valid {
            return Err(StorefrontError::CouponIneligible {
                code,
                reason: Ineligibility::Rejected { message: "coupon was not accepted".into() },
            });
        }

        let mut slot = slot.lock().await;
        if slot.session.accept_manual(&ticket, verdict).is_none() {
            return Err(StorefrontError::Conflict("cart changed while the coupon was being checked".into()));
        }
        self.publish(&mut slot);
        Ok(slot.session.view(&self.inner.engine))
    }

    pub async fn remove_coupon(&self, session_id: &str) -> Result<SessionView> {
        let slot = self.slot(session_id).await?;
        let mut slot = slot.lock().await;
        ensure_not_submitting(&slot.checkout)?;
        if let Some(removed) = slot.session.remove_coupon() {
            tracing::info!(session = session_id, code = %removed.code, "coupon removed by shopper");
        }
        Ok(slot.session.view(&self.inner.engine))
    }

    /// Asks the Coupon service for its auto-apply pick. Ignored if the cart moved
    /// on, a coupon is already applied or the shopper chose one.
    pub async fn auto_apply_remote(&self, session_id: &str) -> Result<SessionView> {
        let slot = self.slot(session_id).await?;
        let ticket = {
            let slot = slot.lock().await;
            ensure_not_submitting(&slot.checkout)?;
            if slot.session.cart().is_empty() || slot.session.applied_coupon().is_some() || slot.session.selected_code().is_some() {
                return Ok(slot.session.view(&self.inner.engine));
            }
            slot.session.ticket()
        };

        let pick = self.inner.coupons.auto_apply(ticket.subtotal, &ticket.items).await?;

        let mut slot = slot.lock().await;
        ensure_not_submitting(&slot.checkout)?;
        slot.session.accept_auto(&ticket, pick);
        self.publish(&mut slot);
        Ok(slot.session.view(&self.inner.engine))
    }

    /// Coupons currently on offer, without a cart preview.
    pub fn displayable_coupons(&self) -> Vec<Coupon> {
        self.inner.catalog.displayable(self.inner.clock.now())
    }

    /// Displayable coupons with a local preview against the session's cart.
    pub async fn coupon_offers(&self, session_id: &str) -> Result<Vec<CouponOffer>> {
        let slot = self.slot(session_id).await?;
        let slot = slot.lock().await;
        let now = self.inner.clock.now();
        let cart = slot.session.cart();
        let ctx = PricingContext::new(cart.subtotal(), cart.items(), now);
        let validator = self.inner.engine.validator();
        Ok(self
            .inner
            .catalog
            .displayable(now)
            .into_iter()
            .map(|coupon| {
                let (eligible, discount, reasons) = match validator.validate(&coupon, &ctx) {
                    Verdict::Eligible { discount } => (true, Some(discount), Vec::new()),
                    Verdict::Ineligible(_) => (false, None, validator.diagnose(&coupon, &ctx)),
                };
                CouponOffer {
                    code: coupon.code,
                    description: coupon.description,
                    discount_type: coupon.discount_type,
                    is_auto_apply: coupon.is_auto_apply,
                    eligible,
                    discount,
                    reasons,
                }
            })
            .collect())
    }

    // ---------------------------------------------------------------------
    // Checkout
    // ---------------------------------------------------------------------

    pub async fn checkout(&self, session_id: &str) -> Result<CheckoutView> {
        let slot = self.slot(session_id).await?;
        let slot = slot.lock().await;
        Ok(slot.checkout.view())
    }

    #[tracing::instrument(skip(self, input))]
    pub async fn checkout_address(&self, session_id: &str, input: &ShippingAddressInput) -> Result<CheckoutView> {
        let slot = self.slot(session_id).await?;
        {
            let slot = slot.lock().await;
            ensure_not_submitting(&slot.checkout)?;
        }
        let resolved = self.inner.addresses.resolve(input).await?;
        let mut slot = slot.lock().await;
        slot.checkout.provide_address(resolved)?;
        Ok(slot.checkout.view())
    }

    pub async fn checkout_payment(&self, session_id: &str, method: PaymentMethod) -> Result<CheckoutView> {
        let slot = self.slot(session_id).await?;
        let mut slot = slot.lock().await;
        slot.checkout.select_payment(method)?;
        Ok(slot.checkout.view())
    }

    /// Confirms the applied coupon with the Coupon service, then recomputes the
    /// totals the shopper is about to accept.
    #[tracing::instrument(skip(self))]
    pub async fn checkout_review(&self, session_id: &str) -> Result<ReviewView> {
        let slot = self.slot(session_id).await?;
        let (ticket, applied) = {
            let slot = slot.lock().await;
            ensure_not_submitting(&slot.checkout)?;
            (slot.session.ticket(), slot.session.applied_coupon().map(|c| c.code.clone()))
        };

        if let Some(code) = applied {
            self.reconfirm(&slot, &ticket, &code).await?;
        }

        let mut slot = slot.lock().await;
        let SessionSlot { session, checkout } = &mut *slot;
        let totals = checkout.review(session, &self.inner.engine)?;
        Ok(ReviewView { cart: session.view(&self.inner.engine), checkout: checkout.view(), totals })
    }

    pub async fn checkout_back(&self, session_id: &str) -> Result<CheckoutView> {
        let slot = self.slot(session_id).await?;
        let mut slot = slot.lock().await;
        slot.checkout.back()?;
        Ok(slot.checkout.view())
    }

    pub async fn checkout_abandon(&self, session_id: &str) -> Result<CheckoutView> {
        let slot = self.slot(session_id).await?;
        let mut slot = slot.lock().await;
        slot.checkout.abandon()?;
        Ok(slot.checkout.view())
    }

    /// Posts the order snapshot. The session is unlocked while the Order service
    /// works; a second submit in that window is refused.
    #[tracing::instrument(skip(self))]
    pub async fn submit_order(&self, session_id: &str) -> Result<CreatedOrder> {
        let slot = self.slot(session_id).await?;
        let submission = {
            let mut slot = slot.lock().await;
            let SessionSlot { session, checkout } = &mut *slot;
            checkout.begin_submission(session, &self.inner.engine)?
        };

        let outcome = self.inner.orders.create_order(&submission).await;

        let mut slot = slot.lock().await;
        let SessionSlot { session, checkout } = &mut *slot;
        let result = checkout.complete(session, outcome);
        if result.is_ok() {
            self.persist(session).await;
        }
        self.publish(&mut slot);
        result
    }

    // ---------------------------------------------------------------------
    // Housekeeping
    // ---------------------------------------------------------------------

    pub async fn session_count(&self) -> usize { self.inner.sessions.lock().await.len() }

    /// Drops sessions idle for longer than `idle_ttl`, and at once those with an
    /// empty cart and no checkout progress. Busy or submitting sessions stay.
    /// Carts are already in the store, so a dropped session reloads on next use.
    pub async fn evict_idle(&self, idle_ttl: chrono::Duration) -> usize {
        let now = self.inner.clock.now();
        let mut sessions = self.inner.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            // A request between lock phases still holds a handle.
            if Arc::strong_count(&entry.slot) > 1 {
                return true;
            }
            let Ok(slot) = entry.slot.try_lock() else { return true };
            if slot.checkout.is_submitting() {
                return true;
            }
            let idle = now - entry.last_seen > idle_ttl;
            let settled = slot.session.cart().is_empty() && slot.checkout.is_settled();
            !(idle || settled)
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "evicted idle sessions");
        }
        evicted
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    async fn slot(&self, session_id: &str) -> Result<Arc<Mutex<SessionSlot>>> {
        validate_session_id(session_id)?;
        if let Some(entry) = self.inner.sessions.lock().await.get_mut(session_id) {
            entry.last_seen = self.inner.clock.now();
            return Ok(Arc::clone(&entry.slot));
        }

        let cart = match self.inner.store.load(session_id).await {
            Ok(Some(items)) => CartLedger::from_items(items),
            Ok(None) => CartLedger::new(),
            Err(e) => {
                tracing::warn!(session = session_id, error = %e, "could not load persisted cart, starting empty");
                CartLedger::new()
            }
        };
        let mut session = StorefrontSession::restore(session_id, cart);
        if !session.cart().is_empty() {
            let catalog = self.inner.catalog.snapshot();
            session.reprice(&self.inner.engine, &catalog, self.inner.clock.now());
        }

        let now = self.inner.clock.now();
        let mut sessions = self.inner.sessions.lock().await;
        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| SessionEntry {
            slot: Arc::new(Mutex::new(SessionSlot { session, checkout: CheckoutOrchestrator::new() })),
            last_seen: now,
        });
        entry.last_seen = now;
        Ok(Arc::clone(&entry.slot))
    }

    /// Asks the Coupon service about the applied code again and folds the answer in.
    async fn reconfirm(&self, slot: &Mutex<SessionSlot>, ticket: &CartTicket, code: &CouponCode) -> Result<()> {
        let confirmed = match self.inner.coupons.validate_code(code, ticket.subtotal, &ticket.items).await {
            Ok(verdict) => Ok(Some(verdict)),
            Err(StorefrontError::CouponIneligible { reason, .. }) => Err(reason.to_string()),
            Err(e) => return Err(e),
        };
        let mut slot = slot.lock().await;
        match confirmed {
            Ok(verdict) => slot.session.confirm_applied(ticket, verdict, "coupon was not accepted"),
            Err(reason) => slot.session.confirm_applied(ticket, None, &reason),
        }
        self.publish(&mut slot);
        Ok(())
    }

    async fn persist(&self, session: &StorefrontSession) {
        let items = session.cart().items();
        let saved = if items.is_empty() {
            self.inner.store.remove(session.id()).await
        } else {
            self.inner.store.save(session.id(), items).await
        };
        if let Err(e) = saved {
            tracing::warn!(session = session.id(), error = %e, "failed to persist cart");
        }
    }

    fn publish(&self, slot: &mut SessionSlot) {
        let mut events = slot.session.take_events();
        events.extend(slot.checkout.take_events());
        for event in events {
            tracing::debug!(subject = event.subject(), "checkout event");
            // No subscribers is fine.
            let _ = self.inner.events.send(event);
        }
    }
}

fn ensure_not_submitting(checkout: &CheckoutOrchestrator) -> std::result::Result<(), CheckoutError> {
    if checkout.is_submitting() { Err(CheckoutError::AlreadySubmitting) } else { Ok(()) }
}

fn validate_session_id(session_id: &str) -> Result<()> {
    let ok = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok { Ok(()) } else { Err(StorefrontError::Validation(format!("invalid session id `{session_id}`"))) }
}

/// Forwards checkout events to NATS until the channel closes.
pub async fn forward_events(mut events: broadcast::Receiver<CheckoutEvent>, nats: async_nats::Client) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let payload = match serde_json::to_vec(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode checkout event");
                        continue;
                    }
                };
                if let Err(e) = nats.publish(event.subject().to_string(), payload.into()).await {
                    tracing::warn!(subject = event.subject(), error = %e, "failed to publish checkout event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event forwarder fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
