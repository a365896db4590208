//! Catalog collaborators: products, coupons and the address book.
//!
//! These are read/write collaborators of the checkout core. This crate holds
//! their models and the pure rules attached to them (final price, coupon
//! validity window and discount); persistence lives in `storefront-infra`.

pub mod address;
pub mod coupon;
pub mod product;

pub use address::{Address, AddressId, AddressSnapshot};
pub use coupon::{Coupon, CouponId, CouponRule};
pub use product::{Product, ProductDiscount, ProductId, ProductStatus};
