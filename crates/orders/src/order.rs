use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_catalog::{AddressSnapshot, Product, ProductId};
use storefront_core::{Aggregate, AggregateRoot, DomainError, Money, UserId, typed_id};
use storefront_events::Event;

use crate::status::{FulfillmentStatus, PaymentProvider, PaymentStatus};

typed_id!(
    /// Order identifier.
    OrderId
);

/// Human-facing order number: `ORD-<unix millis>-<0..999>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// `suffix` is reduced modulo 1000; callers feed it from an RNG and retry
    /// on collision.
    pub fn generate(at: DateTime<Utc>, suffix: u16) -> Self {
        Self(format!("ORD-{}-{}", at.timestamp_millis(), suffix % 1000))
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frozen copy of a product line taken at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub sku: String,
    pub quantity: u32,
    pub price: Money,
    pub final_price: Money,
}

impl OrderItem {
    /// Snapshot `product` as it is right now.
    pub fn freeze(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id,
            name: product.name.clone(),
            sku: product.sku.clone(),
            quantity,
            price: product.price,
            final_price: product.final_price(),
        }
    }

    pub fn line_total(&self) -> Money {
        self.final_price.times(self.quantity)
    }
}

/// A refund that has been issued against the order's payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    /// Provider reference, used to drop duplicate notifications.
    pub refund_id: String,
    pub amount: Money,
    pub reason: Option<String>,
    pub refunded_at: DateTime<Utc>,
    /// Inferred from a provider's running total rather than reported with
    /// its own id. Settled by the refund it stood in for once that arrives.
    #[serde(default)]
    pub provisional: bool,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    number: OrderNumber,
    owner: UserId,
    items: Vec<OrderItem>,
    shipping_address: Option<AddressSnapshot>,
    billing_address: Option<AddressSnapshot>,
    payment_method: String,
    payment_provider: PaymentProvider,
    payment_ref: Option<String>,
    payment_status: PaymentStatus,
    status: FulfillmentStatus,
    subtotal: Money,
    discount: Money,
    coupon_code: Option<String>,
    coupon_discount: Money,
    tax: Money,
    shipping_cost: Money,
    total: Money,
    refunded_amount: Money,
    refunds: Vec<Refund>,
    notes: Option<String>,
    tracking_number: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Not-yet-placed instance, the starting point for [`PlaceOrder`].
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            number: OrderNumber::new(""),
            owner: UserId::default(),
            items: Vec::new(),
            shipping_address: None,
            billing_address: None,
            payment_method: String::new(),
            payment_provider: PaymentProvider::Cod,
            payment_ref: None,
            payment_status: PaymentStatus::Pending,
            status: FulfillmentStatus::Pending,
            subtotal: Money::ZERO,
            discount: Money::ZERO,
            coupon_code: None,
            coupon_discount: Money::ZERO,
            tax: Money::ZERO,
            shipping_cost: Money::ZERO,
            total: Money::ZERO,
            refunded_amount: Money::ZERO,
            refunds: Vec::new(),
            notes: None,
            tracking_number: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn number(&self) -> &OrderNumber {
        &self.number
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner == user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn shipping_address(&self) -> Option<&AddressSnapshot> {
        self.shipping_address.as_ref()
    }

    pub fn billing_address(&self) -> Option<&AddressSnapshot> {
        self.billing_address.as_ref()
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn payment_provider(&self) -> PaymentProvider {
        self.payment_provider
    }

    pub fn payment_ref(&self) -> Option<&str> {
        self.payment_ref.as_deref()
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn status(&self) -> FulfillmentStatus {
        self.status
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn discount(&self) -> Money {
        self.discount
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon_code.as_deref()
    }

    pub fn coupon_discount(&self) -> Money {
        self.coupon_discount
    }

    pub fn tax(&self) -> Money {
        self.tax
    }

    pub fn shipping_cost(&self) -> Money {
        self.shipping_cost
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn refunded_amount(&self) -> Money {
        self.refunded_amount
    }

    pub fn refunds(&self) -> &[Refund] {
        &self.refunds
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_placed(&self) -> bool {
        self.created
    }

    /// Amount that can still be refunded.
    pub fn refundable_balance(&self) -> Money {
        self.total.saturating_sub(self.refunded_amount)
    }

    pub fn has_refund(&self, refund_id: &str) -> bool {
        self.refunds.iter().any(|r| r.refund_id == refund_id)
    }

    /// Refunded money not yet matched to a provider refund id.
    pub fn unattributed_refunds(&self) -> Money {
        self.refunds.iter().filter(|r| r.provisional).map(|r| r.amount).sum()
    }

    /// Units to put back on the shelf for a batch of events just decided on
    /// this order: every line, once, if the batch cancels or refunds it.
    pub fn stock_to_restore(&self, events: &[OrderEvent]) -> Vec<(ProductId, u32)> {
        let restores = events.iter().any(|e| {
            matches!(e, OrderEvent::StatusChanged(s) if s.to.restores_stock())
        });
        if !restores {
            return Vec::new();
        }
        self.items.iter().map(|i| (i.product_id, i.quantity)).collect()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder (freeze a validated cart).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub number: OrderNumber,
    pub owner: UserId,
    pub items: Vec<OrderItem>,
    pub shipping_address: AddressSnapshot,
    pub billing_address: AddressSnapshot,
    pub payment_method: String,
    pub payment_provider: PaymentProvider,
    pub coupon_code: Option<String>,
    pub coupon_discount: Money,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachPayment (a payment was initiated with a provider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachPayment {
    pub order_id: OrderId,
    pub provider: PaymentProvider,
    pub payment_ref: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePaymentStatus.
///
/// The single entry point for confirmations and webhooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePaymentStatus {
    pub order_id: OrderId,
    pub status: PaymentStatus,
    pub payment_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus (staff moves fulfillment along).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub order_id: OrderId,
    pub status: FulfillmentStatus,
    pub tracking_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordRefund. `amount: None` refunds the remaining balance.
///
/// A provisional refund stands for money a provider reported only as part of
/// its refunded total. A later refund with a real id first settles against
/// provisional money, so the same refund is never counted twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRefund {
    pub order_id: OrderId,
    pub refund_id: String,
    pub amount: Option<Money>,
    pub reason: Option<String>,
    pub provisional: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    AttachPayment(AttachPayment),
    UpdatePaymentStatus(UpdatePaymentStatus),
    ChangeStatus(ChangeStatus),
    Cancel(Cancel),
    RecordRefund(RecordRefund),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub number: OrderNumber,
    pub owner: UserId,
    pub items: Vec<OrderItem>,
    pub shipping_address: AddressSnapshot,
    pub billing_address: AddressSnapshot,
    pub payment_method: String,
    pub payment_provider: PaymentProvider,
    pub subtotal: Money,
    pub discount: Money,
    pub coupon_code: Option<String>,
    pub coupon_discount: Money,
    pub tax: Money,
    pub shipping_cost: Money,
    pub total: Money,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttached {
    pub order_id: OrderId,
    pub provider: PaymentProvider,
    pub payment_ref: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusChanged {
    pub order_id: OrderId,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub payment_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged (fulfillment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub order_id: OrderId,
    pub from: FulfillmentStatus,
    pub to: FulfillmentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TrackingNumberSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingNumberSet {
    pub order_id: OrderId,
    pub tracking_number: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecorded {
    pub order_id: OrderId,
    pub refund_id: String,
    pub amount: Money,
    pub reason: Option<String>,
    #[serde(default)]
    pub provisional: bool,
    /// Part of `amount` already counted through provisional refunds.
    #[serde(default)]
    pub settled: Money,
    /// Payment status after this refund.
    pub payment_status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    PaymentAttached(PaymentAttached),
    PaymentStatusChanged(PaymentStatusChanged),
    StatusChanged(StatusChanged),
    TrackingNumberSet(TrackingNumberSet),
    RefundRecorded(RefundRecorded),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "order.placed",
            OrderEvent::PaymentAttached(_) => "order.payment_attached",
            OrderEvent::PaymentStatusChanged(_) => "order.payment_status_changed",
            OrderEvent::StatusChanged(_) => "order.status_changed",
            OrderEvent::TrackingNumberSet(_) => "order.tracking_number_set",
            OrderEvent::RefundRecorded(_) => "order.refund_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::PaymentAttached(e) => e.occurred_at,
            OrderEvent::PaymentStatusChanged(e) => e.occurred_at,
            OrderEvent::StatusChanged(e) => e.occurred_at,
            OrderEvent::TrackingNumberSet(e) => e.occurred_at,
            OrderEvent::RefundRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.number = e.number.clone();
                self.owner = e.owner;
                self.items = e.items.clone();
                self.shipping_address = Some(e.shipping_address.clone());
                self.billing_address = Some(e.billing_address.clone());
                self.payment_method = e.payment_method.clone();
                self.payment_provider = e.payment_provider;
                self.payment_status = PaymentStatus::Pending;
                self.status = FulfillmentStatus::Pending;
                self.subtotal = e.subtotal;
                self.discount = e.discount;
                self.coupon_code = e.coupon_code.clone();
                self.coupon_discount = e.coupon_discount;
                self.tax = e.tax;
                self.shipping_cost = e.shipping_cost;
                self.total = e.total;
                self.notes = e.notes.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::PaymentAttached(e) => {
                self.payment_provider = e.provider;
                self.payment_ref = Some(e.payment_ref.clone());
            }
            OrderEvent::PaymentStatusChanged(e) => {
                self.payment_status = e.to;
                if let Some(r) = &e.payment_ref {
                    self.payment_ref = Some(r.clone());
                }
            }
            OrderEvent::StatusChanged(e) => {
                self.status = e.to;
            }
            OrderEvent::TrackingNumberSet(e) => {
                self.tracking_number = Some(e.tracking_number.clone());
            }
            OrderEvent::RefundRecorded(e) => {
                self.settle_provisional(e.settled);
                self.refunds.push(Refund {
                    refund_id: e.refund_id.clone(),
                    amount: e.amount,
                    reason: e.reason.clone(),
                    refunded_at: e.occurred_at,
                    provisional: e.provisional,
                });
                self.refunded_amount = self
                    .refunded_amount
                    .saturating_add(e.amount.saturating_sub(e.settled));
                self.payment_status = e.payment_status;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::AttachPayment(cmd) => self.handle_attach_payment(cmd),
            OrderCommand::UpdatePaymentStatus(cmd) => self.handle_update_payment(cmd),
            OrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
            OrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
            OrderCommand::RecordRefund(cmd) => self.handle_refund(cmd),
        }
    }
}

impl Order {
    fn ensure_placed(&self, order_id: OrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("order"));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    /// Whether a payment may still be started for this order.
    pub fn ensure_payable(&self) -> Result<(), DomainError> {
        if matches!(
            self.status,
            FulfillmentStatus::Cancelled | FulfillmentStatus::Refunded
        ) {
            return Err(DomainError::invalid_transition(self.status, "payment"));
        }
        if self.payment_status.is_captured() {
            return Err(DomainError::AlreadyPaid);
        }
        Ok(())
    }

    /// Amount a refund of `requested` (or the whole remaining balance) would
    /// return, if the order can be refunded at all.
    pub fn refund_amount(&self, requested: Option<Money>) -> Result<Money, DomainError> {
        match self.payment_status {
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded => {}
            PaymentStatus::Refunded => return Err(DomainError::AlreadyRefunded),
            other => return Err(DomainError::invalid_transition(other, PaymentStatus::Refunded)),
        }

        let remaining = self.refundable_balance();
        let amount = requested.unwrap_or(remaining);
        if amount.is_zero() {
            return Err(DomainError::validation("refund amount must be positive"));
        }
        if amount > remaining {
            return Err(DomainError::validation(format!(
                "refund amount {amount} exceeds refundable balance {remaining}"
            )));
        }
        Ok(amount)
    }

    fn status_changed(&self, to: FulfillmentStatus, at: DateTime<Utc>) -> OrderEvent {
        OrderEvent::StatusChanged(StatusChanged {
            order_id: self.id,
            from: self.status,
            to,
            occurred_at: at,
        })
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::EmptyCart);
        }
        if cmd.items.iter().any(|i| i.quantity == 0) {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        if cmd.payment_method.trim().is_empty() {
            return Err(DomainError::validation("payment method is required"));
        }

        let subtotal: Money = cmd.items.iter().map(OrderItem::line_total).sum();
        let discount: Money = cmd
            .items
            .iter()
            .map(|i| i.price.saturating_sub(i.final_price).times(i.quantity))
            .sum();
        let total = subtotal.saturating_sub(cmd.coupon_discount);

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            number: cmd.number.clone(),
            owner: cmd.owner,
            items: cmd.items.clone(),
            shipping_address: cmd.shipping_address.clone(),
            billing_address: cmd.billing_address.clone(),
            payment_method: cmd.payment_method.trim().to_string(),
            payment_provider: cmd.payment_provider,
            subtotal,
            discount,
            coupon_code: cmd.coupon_code.clone(),
            coupon_discount: cmd.coupon_discount,
            tax: Money::ZERO,
            shipping_cost: Money::ZERO,
            total,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_payment(&self, cmd: &AttachPayment) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;
        self.ensure_payable()?;

        if self.payment_provider == cmd.provider
            && self.payment_ref.as_deref() == Some(cmd.payment_ref.as_str())
        {
            return Ok(Vec::new());
        }

        Ok(vec![OrderEvent::PaymentAttached(PaymentAttached {
            order_id: cmd.order_id,
            provider: cmd.provider,
            payment_ref: cmd.payment_ref.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_payment(
        &self,
        cmd: &UpdatePaymentStatus,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        use PaymentStatus::*;

        self.ensure_placed(cmd.order_id)?;

        let from = self.payment_status;
        let to = cmd.status;

        if matches!(to, Refunded | PartiallyRefunded) {
            return Err(DomainError::invariant(
                "refunds must be recorded with their amount",
            ));
        }
        if from == to {
            return Ok(Vec::new());
        }

        match (from, to) {
            (Pending, Paid) | (Pending, Failed) | (Failed, Paid) | (Failed, Pending) => {}
            // A late copy of the original confirmation; already past it.
            (Refunded | PartiallyRefunded, Paid) => return Ok(Vec::new()),
            _ => return Err(DomainError::invalid_transition(from, to)),
        }

        let mut events = vec![OrderEvent::PaymentStatusChanged(PaymentStatusChanged {
            order_id: cmd.order_id,
            from,
            to,
            payment_ref: cmd.payment_ref.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if to == Paid && self.status == FulfillmentStatus::Pending {
            events.push(self.status_changed(FulfillmentStatus::Confirmed, cmd.occurred_at));
        }

        Ok(events)
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;

        let from = self.status;
        let to = cmd.status;
        let mut events = Vec::new();

        if to != from {
            let allowed = match to {
                // Only the refund path may move an order to `refunded`.
                FulfillmentStatus::Refunded => false,
                FulfillmentStatus::Cancelled => from.can_cancel(),
                _ => from.next() == Some(to),
            };
            if !allowed {
                return Err(DomainError::invalid_transition(from, to));
            }
            events.push(self.status_changed(to, cmd.occurred_at));
        }

        if let Some(tracking) = cmd.tracking_number.as_deref().map(str::trim) {
            if !tracking.is_empty() && self.tracking_number.as_deref() != Some(tracking) {
                events.push(OrderEvent::TrackingNumberSet(TrackingNumberSet {
                    order_id: cmd.order_id,
                    tracking_number: tracking.to_string(),
                    occurred_at: cmd.occurred_at,
                }));
            }
        }

        Ok(events)
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;

        if !self.status.can_cancel() {
            return Err(DomainError::invalid_transition(
                self.status,
                FulfillmentStatus::Cancelled,
            ));
        }

        Ok(vec![self.status_changed(FulfillmentStatus::Cancelled, cmd.occurred_at)])
    }

    /// Shrink provisional refunds, oldest first, by `amount` now attributed
    /// to a real refund id.
    fn settle_provisional(&mut self, mut amount: Money) {
        for refund in self.refunds.iter_mut().filter(|r| r.provisional) {
            if amount.is_zero() {
                break;
            }
            let taken = amount.min(refund.amount);
            refund.amount = refund.amount.saturating_sub(taken);
            amount = amount.saturating_sub(taken);
        }
        self.refunds.retain(|r| !(r.provisional && r.amount.is_zero()));
    }

    fn handle_refund(&self, cmd: &RecordRefund) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;

        if self.has_refund(&cmd.refund_id) {
            return Ok(Vec::new());
        }

        let settled = match cmd.amount {
            Some(amount) if !cmd.provisional => amount.min(self.unattributed_refunds()),
            _ => Money::ZERO,
        };
        let remaining = cmd.amount.map(|a| a.saturating_sub(settled));

        if remaining.is_some_and(Money::is_zero) && !settled.is_zero() {
            // Already counted from a provider total: attribute it, nothing more.
            return Ok(vec![OrderEvent::RefundRecorded(RefundRecorded {
                order_id: cmd.order_id,
                refund_id: cmd.refund_id.clone(),
                amount: settled,
                reason: cmd.reason.clone(),
                provisional: false,
                settled,
                payment_status: self.payment_status,
                occurred_at: cmd.occurred_at,
            })]);
        }

        let fresh = self.refund_amount(remaining)?;
        let full = fresh == self.refundable_balance();
        let mut events = vec![OrderEvent::RefundRecorded(RefundRecorded {
            order_id: cmd.order_id,
            refund_id: cmd.refund_id.clone(),
            amount: fresh.saturating_add(settled),
            reason: cmd.reason.clone(),
            provisional: cmd.provisional,
            settled,
            payment_status: if full {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            },
            occurred_at: cmd.occurred_at,
        })];

        if full && !self.status.is_terminal() {
            events.push(self.status_changed(FulfillmentStatus::Refunded, cmd.occurred_at));
        }

        Ok(events)
    }
}
