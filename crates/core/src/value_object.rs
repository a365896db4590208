//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two `Money`
/// amounts of 100 are the same amount, and an address snapshot frozen into an
/// order is equal to any other snapshot with the same lines. To "modify" a value
/// object, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
