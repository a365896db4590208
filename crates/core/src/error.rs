//! Domain error model.

use thiserror::Error;

use crate::money::Money;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, invariants, rejected
/// transitions). Infrastructure and payment-provider failures have their own
/// error types in the crates that talk to the outside world.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller may not act on this resource.
    #[error("unauthorized")]
    Unauthorized,

    /// Product exists but is inactive or unpublished.
    #[error("{0}: product is not available for purchase")]
    Unavailable(String),

    #[error("insufficient stock for {product}: requested {requested}, only {available} available")]
    InsufficientStock {
        product: String,
        requested: u32,
        available: u32,
    },

    /// Cart validation made corrections; the customer must review the cart again.
    #[error("cart validation failed: {}", .0.join(", "))]
    CartInvalid(Vec<String>),

    #[error("cart is empty")]
    EmptyCart,

    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("coupon is not yet active")]
    CouponNotYetActive,

    #[error("coupon has expired")]
    CouponExpired,

    #[error("coupon usage limit reached")]
    CouponUsageLimitReached,

    #[error("minimum order amount of {minimum} required for this coupon")]
    CouponMinimumNotMet { minimum: Money },

    #[error("order is already paid")]
    AlreadyPaid,

    #[error("order is already refunded")]
    AlreadyRefunded,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_transition(from: impl core::fmt::Display, to: impl core::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// HTTP status this error maps to at the API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            DomainError::NotFound(_) => 404,
            DomainError::Unauthorized => 403,
            DomainError::Conflict(_) => 409,
            DomainError::InvariantViolation(_) => 422,
            DomainError::Validation(_)
            | DomainError::InvalidId(_)
            | DomainError::Unavailable(_)
            | DomainError::InsufficientStock { .. }
            | DomainError::CartInvalid(_)
            | DomainError::EmptyCart
            | DomainError::InvalidTransition { .. }
            | DomainError::CouponNotYetActive
            | DomainError::CouponExpired
            | DomainError::CouponUsageLimitReached
            | DomainError::CouponMinimumNotMet { .. }
            | DomainError::AlreadyPaid
            | DomainError::AlreadyRefunded => 400,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound(_) => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::Unauthorized => "unauthorized",
            DomainError::Unavailable(_) => "unavailable",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::CartInvalid(_) => "cart_invalid",
            DomainError::EmptyCart => "empty_cart",
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::CouponNotYetActive => "coupon_not_yet_active",
            DomainError::CouponExpired => "coupon_expired",
            DomainError::CouponUsageLimitReached => "coupon_usage_limit_reached",
            DomainError::CouponMinimumNotMet { .. } => "coupon_minimum_not_met",
            DomainError::AlreadyPaid => "already_paid",
            DomainError::AlreadyRefunded => "already_refunded",
        }
    }
}
