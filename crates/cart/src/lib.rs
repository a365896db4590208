//! Shopping cart domain module.
//!
//! Pure, deterministic rules for the per-user pre-checkout cart (no IO). The
//! caller loads the products and coupons a command refers to and hands them in.

pub mod cart;

pub use cart::{AppliedCoupon, Cart, CartItem, CartSummary, CartValidation};
