//! Checkout step machine.

use serde::Serialize;
use thiserror::Error;

use crate::domain::aggregates::{CreatedOrder, OrderSubmission, PaymentMethod, ResolvedAddress, ShippingAddressInput};
use crate::domain::events::CheckoutEvent;
use crate::domain::value_objects::CouponCode;
use crate::pricing::{OrderTotals, PricingEngine};
use crate::services::{AddressDirectory, OrderService};
use crate::session::StorefrontSession;
use crate::{ErrorKind, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    #[default]
    CollectingAddress,
    SelectingPayment,
    Reviewing,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    #[error("A shipping address is required")]
    AddressRequired,
    #[error("A payment method is required")]
    PaymentRequired,
    #[error("The cart is empty")]
    EmptyCart,
    #[error("The order is already being submitted")]
    AlreadySubmitting,
    #[error("Cannot {action} while {step:?}")]
    InvalidTransition { step: CheckoutStep, action: &'static str },
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AddressRequired | Self::PaymentRequired | Self::EmptyCart => ErrorKind::Validation,
            Self::AlreadySubmitting | Self::InvalidTransition { .. } => ErrorKind::Conflict,
        }
    }
}

/// Read model of the checkout for API callers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckoutView {
    pub step: CheckoutStep,
    pub address: Option<ResolvedAddress>,
    pub payment_method: Option<PaymentMethod>,
    pub totals: Option<OrderTotals>,
    pub last_error: Option<String>,
    pub order: Option<CreatedOrder>,
}

/// Walks a session through address, payment, review and submission.
///
/// Totals are recomputed from the session at review and again when the
/// submission snapshot is taken; nothing computed earlier is trusted.
#[derive(Debug, Default)]
pub struct CheckoutOrchestrator {
    step: CheckoutStep,
    address: Option<ResolvedAddress>,
    payment: Option<PaymentMethod>,
    reviewed: Option<OrderTotals>,
    last_error: Option<String>,
    order: Option<CreatedOrder>,
    /// Coupon carried by the snapshot in flight.
    submitted_coupon: Option<CouponCode>,
    events: Vec<CheckoutEvent>,
}

impl CheckoutOrchestrator {
    pub fn new() -> Self { Self::default() }

    pub fn step(&self) -> CheckoutStep { self.step }
    pub fn address(&self) -> Option<&ResolvedAddress> { self.address.as_ref() }
    pub fn payment_method(&self) -> Option<PaymentMethod> { self.payment }
    pub fn reviewed_totals(&self) -> Option<&OrderTotals> { self.reviewed.as_ref() }
    pub fn last_error(&self) -> Option<&str> { self.last_error.as_deref() }
    pub fn is_submitting(&self) -> bool { self.step == CheckoutStep::Submitting }

    /// Finished, or never started: nothing here the cart store cannot rebuild.
    pub fn is_settled(&self) -> bool {
        match self.step {
            CheckoutStep::Succeeded => true,
            CheckoutStep::CollectingAddress => self.address.is_none(),
            _ => false,
        }
    }

    pub fn view(&self) -> CheckoutView {
        CheckoutView {
            step: self.step,
            address: self.address.clone(),
            payment_method: self.payment,
            totals: self.reviewed,
            last_error: self.last_error.clone(),
            order: self.order.clone(),
        }
    }

    pub fn take_events(&mut self) -> Vec<CheckoutEvent> { std::mem::take(&mut self.events) }

    /// Resolves the typed address through the directory and records it.
    pub async fn collect_address(&mut self, directory: &AddressDirectory, input: &ShippingAddressInput) -> Result<&ResolvedAddress> {
        self.ensure_editable("change the address")?;
        let resolved = directory.resolve(input).await?;
        Ok(self.provide_address(resolved)?)
    }

    pub fn provide_address(&mut self, address: ResolvedAddress) -> std::result::Result<&ResolvedAddress, CheckoutError> {
        self.ensure_editable("change the address")?;
        self.reviewed = None;
        self.step = CheckoutStep::SelectingPayment;
        Ok(self.address.insert(address))
    }

    pub fn select_payment(&mut self, method: PaymentMethod) -> std::result::Result<(), CheckoutError> {
        self.ensure_editable("choose a payment method")?;
        if self.address.is_none() {
            return Err(CheckoutError::AddressRequired);
        }
        self.payment = Some(method);
        self.reviewed = None;
        self.step = CheckoutStep::Reviewing;
        Ok(())
    }

    /// Recomputes the totals the shopper confirms before submitting.
    pub fn review(&mut self, session: &StorefrontSession, engine: &PricingEngine) -> std::result::Result<OrderTotals, CheckoutError> {
        match self.step {
            CheckoutStep::Reviewing | CheckoutStep::Failed => {}
            step => return Err(CheckoutError::InvalidTransition { step, action: "review" }),
        }
        self.ensure_ready(session)?;
        let totals = session.totals(engine);
        self.reviewed = Some(totals);
        Ok(totals)
    }

    /// Steps back one stage. Not allowed once submission has started.
    pub fn back(&mut self) -> std::result::Result<CheckoutStep, CheckoutError> {
        self.step = match self.step {
            CheckoutStep::CollectingAddress | CheckoutStep::SelectingPayment => CheckoutStep::CollectingAddress,
            CheckoutStep::Reviewing => CheckoutStep::SelectingPayment,
            CheckoutStep::Failed => CheckoutStep::Reviewing,
            step => return Err(CheckoutError::InvalidTransition { step, action: "go back" }),
        };
        self.reviewed = None;
        Ok(self.step)
    }

    /// Drops everything collected so far.
    pub fn abandon(&mut self) -> std::result::Result<(), CheckoutError> {
        if self.is_submitting() {
            return Err(CheckoutError::AlreadySubmitting);
        }
        *self = Self { events: std::mem::take(&mut self.events), ..Self::default() };
        Ok(())
    }

    /// Takes the final snapshot and enters `Submitting`. Allowed from review or
    /// after a failed attempt.
    pub fn begin_submission(&mut self, session: &StorefrontSession, engine: &PricingEngine) -> std::result::Result<OrderSubmission, CheckoutError> {
        match self.step {
            CheckoutStep::Reviewing | CheckoutStep::Failed => {}
            CheckoutStep::Submitting => return Err(CheckoutError::AlreadySubmitting),
            step => return Err(CheckoutError::InvalidTransition { step, action: "submit" }),
        }
        let (address, payment) = self.ensure_ready(session)?;
        let totals = session.totals(engine);
        let submission = OrderSubmission::new(
            session.cart().items(),
            address,
            payment,
            session.applied_coupon().map(|c| c.code.clone()),
            &totals,
        );
        self.reviewed = Some(totals);
        self.last_error = None;
        self.submitted_coupon = submission.coupon_code.clone();
        self.step = CheckoutStep::Submitting;
        tracing::info!(session = session.id(), total = %totals.total, "submitting order");
        Ok(submission)
    }

    /// Records the Order service's answer. Success empties the session's cart;
    /// failure keeps it and leaves the checkout ready for another attempt.
    pub fn complete(&mut self, session: &mut StorefrontSession, outcome: Result<CreatedOrder>) -> Result<CreatedOrder> {
        if !self.is_submitting() {
            return Err(CheckoutError::InvalidTransition { step: self.step, action: "complete a submission" }.into());
        }
        let coupon_code = self.submitted_coupon.take();
        match outcome {
            Ok(order) => {
                tracing::info!(session = session.id(), order_number = %order.order_number, "order placed");
                self.events.push(CheckoutEvent::OrderPlaced {
                    session_id: session.id().to_string(),
                    order_id: order.id.clone(),
                    order_number: order.order_number.clone(),
                    total: order.total,
                    coupon_code,
                });
                session.reset_after_order();
                self.step = CheckoutStep::Succeeded;
                self.order = Some(order.clone());
                Ok(order)
            }
            Err(e) => {
                tracing::warn!(session = session.id(), error = %e, "order submission failed");
                self.events.push(CheckoutEvent::SubmissionFailed {
                    session_id: session.id().to_string(),
                    reason: e.to_string(),
                });
                self.step = CheckoutStep::Failed;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Submits in one go. Callers that must not hold the session across the
    /// network call use [`begin_submission`](Self::begin_submission) and
    /// [`complete`](Self::complete) instead.
    pub async fn submit(&mut self, session: &mut StorefrontSession, engine: &PricingEngine, orders: &dyn OrderService) -> Result<CreatedOrder> {
        let submission = self.begin_submission(session, engine)?;
        let outcome = orders.create_order(&submission).await;
        self.complete(session, outcome)
    }

    fn ensure_editable(&self, action: &'static str) -> std::result::Result<(), CheckoutError> {
        match self.step {
            CheckoutStep::Submitting => Err(CheckoutError::AlreadySubmitting),
            CheckoutStep::Succeeded => Err(CheckoutError::InvalidTransition { step: self.step, action }),
            _ => Ok(()),
        }
    }

    fn ensure_ready(&self, session: &StorefrontSession) -> std::result::Result<(&ResolvedAddress, PaymentMethod), CheckoutError> {
        if session.cart().is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let address = self.address.as_ref().ok_or(CheckoutError::AddressRequired)?;
        let payment = self.payment.ok_or(CheckoutError::PaymentRequired)?;
        Ok((address, payment))
    }
}
