//! Orders domain module (command/event style).
//!
//! The order aggregate freezes a validated cart into an immutable record and
//! owns the two independent state machines: fulfillment and payment. Nothing
//! here performs IO; stock restoration is derived from the emitted events and
//! carried out by the caller in the same transaction as the status write.

pub mod order;
pub mod status;

pub use order::{
    AttachPayment, Cancel, ChangeStatus, Order, OrderCommand, OrderEvent, OrderId, OrderItem,
    OrderNumber, OrderPlaced, PaymentAttached, PaymentStatusChanged, PlaceOrder, RecordRefund,
    Refund, RefundRecorded, StatusChanged, TrackingNumberSet, UpdatePaymentStatus,
};
pub use status::{FulfillmentStatus, PaymentProvider, PaymentStatus};
