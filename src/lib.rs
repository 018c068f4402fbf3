//! Storefront Checkout
//!
//! Cart pricing, coupon application and checkout orchestration for the storefront.
//!
//! ## Features
//! - Cart ledger with variant-aware line merging
//! - Coupon eligibility and discount computation
//! - Best-coupon auto-apply that defers to manual selection
//! - Order totals with a free-shipping threshold
//! - Checkout step machine submitting a single order snapshot
//!
//! The pricing core ([`pricing`]) is pure and synchronous. Everything that talks to
//! the Coupon, Address or Order services lives in [`storefront`], [`checkout`] and
//! [`services`].

pub mod api;
pub mod catalog;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod domain;
pub mod pricing;
pub mod services;
pub mod session;
pub mod store;
pub mod storefront;
pub mod tasks;

use thiserror::Error;

use crate::checkout::CheckoutError;
use crate::config::ConfigError;
use crate::domain::aggregates::CartError;
use crate::domain::value_objects::CouponCode;
use crate::pricing::Ineligibility;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Coupon {code} cannot be applied: {reason}")]
    CouponIneligible { code: CouponCode, reason: Ineligibility },

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("Service unreachable: {0}")]
    Network(String),

    #[error("Upstream service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse error families surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The user can correct the input and retry.
    Validation,
    /// A remote service could not be reached or misbehaved.
    Network,
    /// The request raced with stock, coupon usage or an in-flight submission.
    Conflict,
    NotFound,
    Internal,
}

impl StorefrontError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::CouponIneligible { .. } => ErrorKind::Validation,
            Self::Cart(e) => e.kind(),
            Self::Checkout(e) => e.kind(),
            Self::Network(_) | Self::Upstream { .. } => ErrorKind::Network,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for StorefrontError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for StorefrontError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Upstream { status: status.as_u16(), message: e.to_string() },
            None => Self::Network(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorefrontError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;
