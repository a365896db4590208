//! Orchestrator tests against the in-memory store and a scripted gateway.
//!
//! Cover the create-order transaction (atomicity, stock races), cancellation
//! and refund stock restoration, and webhook/confirm idempotence.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;

    use storefront_cart::Cart;
    use storefront_catalog::{
        Address, AddressId, AddressSnapshot, Coupon, CouponId, CouponRule, Product, ProductId,
    };
    use storefront_core::{AggregateRoot, DomainError, Money, UserId};
    use storefront_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
    use storefront_orders::{
        FulfillmentStatus, Order, OrderCommand, OrderId, PaymentStatus, RecordRefund,
    };
    use storefront_payments::webhook::{sign_paystack, sign_stripe};
    use storefront_payments::{
        GatewayRegistry, PaymentGateway, PaymentProvider, PaymentProviderError, PaymentRequest,
        PaymentSession, PaymentVerification, RefundRequest, RefundResult,
    };

    use crate::services::{
        ConfirmPayment, CreateOrder, CreatePayment, Orchestrator, RefundOrder, ServiceError,
        WebhookOutcome, WebhookSecrets,
    };
    use crate::store::{
        AddressStore, CartStore, CouponStore, InMemoryCommerceStore, OrderStore, ProductStore,
        StoreResult, StoreTransaction, UnitOfWork,
    };

    const STRIPE_SECRET: &str = "whsec_integration";
    const PAYSTACK_SECRET: &str = "sk_test_integration";

    type Envelope = EventEnvelope<serde_json::Value>;

    /// Gateway whose answers are set by the test.
    struct ScriptedGateway {
        provider: PaymentProvider,
        verify_status: Mutex<PaymentStatus>,
        fail: AtomicBool,
        refunds: AtomicU32,
    }

    impl ScriptedGateway {
        fn new(provider: PaymentProvider) -> Arc<Self> {
            Arc::new(Self {
                provider,
                verify_status: Mutex::new(PaymentStatus::Pending),
                fail: AtomicBool::new(false),
                refunds: AtomicU32::new(0),
            })
        }

        fn check(&self) -> Result<(), PaymentProviderError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PaymentProviderError::Transport {
                    provider: self.provider,
                    message: "connection reset".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        fn provider(&self) -> PaymentProvider {
            self.provider
        }

        async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentSession, PaymentProviderError> {
            self.check()?;
            Ok(PaymentSession {
                provider: self.provider,
                provider_ref: format!("ref_{}", request.order_number),
                client_secret: Some("secret".into()),
                authorization_url: None,
                message: None,
            })
        }

        async fn verify(&self, provider_ref: &str) -> Result<PaymentVerification, PaymentProviderError> {
            self.check()?;
            Ok(PaymentVerification {
                provider_ref: provider_ref.to_string(),
                status: *self.verify_status.lock().unwrap(),
                order_id: None,
                amount: None,
            })
        }

        async fn refund(&self, request: &RefundRequest) -> Result<RefundResult, PaymentProviderError> {
            self.check()?;
            let n = self.refunds.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RefundResult {
                refund_id: format!("re_{n}"),
                amount: request.amount.unwrap_or(Money::ZERO),
                status: "succeeded".into(),
            })
        }
    }

    /// Delegates to the in-memory store, but lowers one product's stock right
    /// before the next transaction starts (another checkout got there first).
    struct InterferingStore {
        inner: InMemoryCommerceStore,
        drop_stock: Mutex<Option<(ProductId, u32)>>,
    }

    #[async_trait]
    impl ProductStore for InterferingStore {
        async fn product(&self, id: ProductId) -> StoreResult<Option<Product>> {
            self.inner.product(id).await
        }

        async fn products(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
            self.inner.products(ids).await
        }
    }

    #[async_trait]
    impl CouponStore for InterferingStore {
        async fn coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
            self.inner.coupon_by_code(code).await
        }

        async fn coupon(&self, id: CouponId) -> StoreResult<Option<Coupon>> {
            self.inner.coupon(id).await
        }
    }

    #[async_trait]
    impl AddressStore for InterferingStore {
        async fn address(&self, id: AddressId) -> StoreResult<Option<Address>> {
            self.inner.address(id).await
        }
    }

    #[async_trait]
    impl CartStore for InterferingStore {
        async fn cart(&self, owner: UserId) -> StoreResult<Option<Cart>> {
            self.inner.cart(owner).await
        }

        async fn save_cart(&self, cart: &Cart) -> StoreResult<()> {
            self.inner.save_cart(cart).await
        }

        async fn delete_cart(&self, owner: UserId) -> StoreResult<()> {
            CartStore::delete_cart(&self.inner, owner).await
        }
    }

    #[async_trait]
    impl OrderStore for InterferingStore {
        async fn order(&self, id: OrderId) -> StoreResult<Option<Order>> {
            self.inner.order(id).await
        }

        async fn order_by_payment_ref(&self, provider: PaymentProvider, payment_ref: &str) -> StoreResult<Option<Order>> {
            self.inner.order_by_payment_ref(provider, payment_ref).await
        }

        async fn orders_for(&self, owner: UserId) -> StoreResult<Vec<Order>> {
            self.inner.orders_for(owner).await
        }
    }

    #[async_trait]
    impl UnitOfWork for InterferingStore {
        async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
            let pending = self.drop_stock.lock().unwrap().take();
            if let Some((id, stock)) = pending {
                if let Some(mut product) = self.inner.product(id).await? {
                    product.stock = stock;
                    self.inner.put_product(product).await;
                }
            }
            self.inner.begin().await
        }
    }

    struct Fixture {
        store: InMemoryCommerceStore,
        app: Orchestrator,
        bus: Arc<InMemoryEventBus<Envelope>>,
        stripe: Arc<ScriptedGateway>,
        paystack: Arc<ScriptedGateway>,
        user: UserId,
        address: AddressId,
    }

    fn address_for(owner: UserId) -> Address {
        Address {
            id: AddressId::generate(),
            owner,
            lines: AddressSnapshot {
                name: "Ada Obi".into(),
                phone: "+2348000000000".into(),
                address_line1: "12 Marina Road".into(),
                address_line2: None,
                city: "Lagos".into(),
                state: "LA".into(),
                postal_code: "101001".into(),
                country: "NG".into(),
            },
        }
    }

    async fn fixture_with(store: InMemoryCommerceStore, shared: crate::services::SharedStore) -> Fixture {
        let bus = Arc::new(InMemoryEventBus::new());
        let stripe = ScriptedGateway::new(PaymentProvider::Stripe);
        let paystack = ScriptedGateway::new(PaymentProvider::Paystack);
        let gateways = GatewayRegistry::new()
            .with(stripe.clone())
            .with(paystack.clone());
        let app = Orchestrator::new(shared, gateways, bus.clone(), Duration::hours(168))
            .with_webhook_secrets(WebhookSecrets {
                stripe: Some(STRIPE_SECRET.into()),
                paystack: Some(PAYSTACK_SECRET.into()),
            });

        let user = UserId::new();
        let address = address_for(user);
        store.put_address(address.clone()).await;

        Fixture {
            store,
            app,
            bus,
            stripe,
            paystack,
            user,
            address: address.id,
        }
    }

    async fn fixture() -> Fixture {
        let store = InMemoryCommerceStore::new();
        fixture_with(store.clone(), Arc::new(store)).await
    }

    impl Fixture {
        async fn product(&self, name: &str, price: u64, stock: u32) -> Product {
            let product = Product::published(
                ProductId::generate(),
                name,
                format!("sku-{name}"),
                Money::from_minor(price),
                stock,
            );
            self.store.put_product(product.clone()).await;
            product
        }

        async fn stock_of(&self, id: ProductId) -> (u32, u32) {
            let p = self.store.product(id).await.unwrap().unwrap();
            (p.stock, p.sold)
        }

        async fn order(&self, id: OrderId) -> Order {
            self.store.order(id).await.unwrap().unwrap()
        }

        fn checkout(&self, provider: PaymentProvider) -> CreateOrder {
            CreateOrder {
                shipping_address: self.address,
                billing_address: None,
                payment_method: "card".into(),
                payment_provider: provider,
                notes: None,
            }
        }

        async fn place(&self, provider: PaymentProvider, lines: &[(&Product, u32)]) -> Order {
            for (product, qty) in lines {
                self.app.carts.add_item(self.user, product.id, *qty).await.unwrap();
            }
            self.app
                .orders
                .create_order(self.user, self.checkout(provider))
                .await
                .unwrap()
        }

        async fn place_and_attach(&self, provider: PaymentProvider, lines: &[(&Product, u32)]) -> (Order, String) {
            let order = self.place(provider, lines).await;
            let session = self
                .app
                .payments
                .create(
                    self.user,
                    Some("ada@example.com".into()),
                    CreatePayment {
                        order_id: order.id_typed(),
                        provider,
                        callback_url: None,
                    },
                )
                .await
                .unwrap();
            (self.order(order.id_typed()).await, session.provider_ref)
        }

        async fn stripe_event(&self, body: serde_json::Value) -> Result<WebhookOutcome, ServiceError> {
            let payload = serde_json::to_vec(&body).unwrap();
            let header = sign_stripe(&payload, STRIPE_SECRET, Utc::now().timestamp()).unwrap();
            self.app.payments.stripe_webhook(Some(&header), &payload).await
        }

        async fn paystack_event(&self, body: serde_json::Value) -> Result<WebhookOutcome, ServiceError> {
            let payload = serde_json::to_vec(&body).unwrap();
            let header = sign_paystack(&payload, PAYSTACK_SECRET).unwrap();
            self.app.payments.paystack_webhook(Some(&header), &payload).await
        }
    }

    fn event_types(sub: &Subscription<Envelope>) -> Vec<String> {
        sub.drain().iter().map(|e| e.event_type().to_string()).collect()
    }

    fn intent_succeeded(intent: &str, order_id: OrderId) -> serde_json::Value {
        json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": intent, "metadata": { "orderId": order_id.to_string() } } }
        })
    }

    #[tokio::test]
    async fn checkout_freezes_coupon_cart_and_consumes_stock() {
        let fx = fixture().await;
        let sub = fx.bus.subscribe();
        let mug = fx.product("mug", 1000, 5).await;
        let coupon = Coupon::new(
            CouponId::generate(),
            "save10",
            CouponRule::Percentage {
                percent: 10,
                max_discount: Some(Money::from_minor(200)),
            },
        );
        fx.store.put_coupon(coupon.clone()).await;

        fx.app.carts.add_item(fx.user, mug.id, 3).await.unwrap();
        let (cart, discount) = fx.app.carts.apply_coupon(fx.user, "SAVE10").await.unwrap();
        assert_eq!(discount, Money::from_minor(200));
        assert_eq!(cart.total(), Money::from_minor(2800));

        let order = fx
            .app
            .orders
            .create_order(fx.user, fx.checkout(PaymentProvider::Stripe))
            .await
            .unwrap();

        assert_eq!(order.subtotal(), Money::from_minor(3000));
        assert_eq!(order.coupon_discount(), Money::from_minor(200));
        assert_eq!(order.total(), Money::from_minor(2800));
        assert_eq!(order.coupon_code(), Some("SAVE10"));
        assert_eq!(order.status(), FulfillmentStatus::Pending);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.billing_address(), order.shipping_address());
        assert!(order.number().as_str().starts_with("ORD-"));

        assert_eq!(fx.stock_of(mug.id).await, (2, 3));
        assert_eq!(fx.store.coupon(coupon.id).await.unwrap().unwrap().used_count, 1);
        assert!(fx.store.cart(fx.user).await.unwrap().is_none());
        assert_eq!(event_types(&sub), vec!["order.placed"]);
    }

    #[tokio::test]
    async fn frozen_prices_survive_catalog_edits() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let order = fx.place(PaymentProvider::Cod, &[(&mug, 2)]).await;

        let mut repriced = mug.clone();
        repriced.price = Money::from_minor(5000);
        fx.store.put_product(repriced).await;

        let stored = fx.order(order.id_typed()).await;
        assert_eq!(stored.items()[0].final_price, Money::from_minor(1000));
        assert_eq!(stored.subtotal(), Money::from_minor(2000));
    }

    #[tokio::test]
    async fn stock_lost_after_validation_rolls_back_everything() {
        let store = InMemoryCommerceStore::new();
        let interfering = Arc::new(InterferingStore {
            inner: store.clone(),
            drop_stock: Mutex::new(None),
        });
        let fx = fixture_with(store, interfering.clone()).await;

        let mug = fx.product("mug", 1000, 5).await;
        let pan = fx.product("pan", 2500, 5).await;
        let coupon = Coupon::new(CouponId::generate(), "FLAT", CouponRule::Fixed { amount: Money::from_minor(100) });
        fx.store.put_coupon(coupon.clone()).await;

        fx.app.carts.add_item(fx.user, mug.id, 1).await.unwrap();
        fx.app.carts.add_item(fx.user, pan.id, 3).await.unwrap();
        fx.app.carts.apply_coupon(fx.user, "flat").await.unwrap();
        let cart_before = fx.store.cart(fx.user).await.unwrap().unwrap();

        *interfering.drop_stock.lock().unwrap() = Some((pan.id, 2));
        let err = fx
            .app
            .orders
            .create_order(fx.user, fx.checkout(PaymentProvider::Cod))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InsufficientStock { requested: 3, available: 2, .. })
        ));
        // The first line's decrement was rolled back with the rest.
        assert_eq!(fx.stock_of(mug.id).await, (5, 0));
        assert_eq!(fx.stock_of(pan.id).await, (2, 0));
        assert_eq!(fx.store.coupon(coupon.id).await.unwrap().unwrap().used_count, 0);
        assert!(fx.store.orders_for(fx.user).await.unwrap().is_empty());
        assert_eq!(fx.store.cart(fx.user).await.unwrap().unwrap(), cart_before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn last_unit_goes_to_exactly_one_checkout() {
        let fx = fixture().await;
        let lamp = fx.product("lamp", 4000, 1).await;

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let user = UserId::new();
            let address = address_for(user);
            fx.store.put_address(address.clone()).await;
            fx.app.carts.add_item(user, lamp.id, 1).await.unwrap();

            let orders = fx.app.orders.clone();
            tasks.push(tokio::spawn(async move {
                orders
                    .create_order(
                        user,
                        CreateOrder {
                            shipping_address: address.id,
                            billing_address: None,
                            payment_method: "cash".into(),
                            payment_provider: PaymentProvider::Cod,
                            notes: None,
                        },
                    )
                    .await
            }));
        }

        let mut placed = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => placed += 1,
                Err(ServiceError::Domain(
                    DomainError::InsufficientStock { .. } | DomainError::CartInvalid(_),
                )) => {}
                Err(other) => panic!("unexpected checkout error: {other:?}"),
            }
        }

        assert_eq!(placed, 1);
        assert_eq!(fx.stock_of(lamp.id).await, (0, 1));
    }

    #[tokio::test]
    async fn checkout_refuses_a_cart_that_needed_corrections() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        fx.app.carts.add_item(fx.user, mug.id, 2).await.unwrap();

        let mut repriced = mug.clone();
        repriced.price = Money::from_minor(1200);
        fx.store.put_product(repriced).await;

        let err = fx
            .app
            .orders
            .create_order(fx.user, fx.checkout(PaymentProvider::Cod))
            .await
            .unwrap_err();
        match err {
            ServiceError::Domain(DomainError::CartInvalid(issues)) => {
                assert_eq!(issues, vec!["mug: Price updated".to_string()]);
            }
            other => panic!("expected CartInvalid, got {other:?}"),
        }

        // The corrected cart is kept for the customer to review.
        let cart = fx.store.cart(fx.user).await.unwrap().unwrap();
        assert_eq!(cart.total(), Money::from_minor(2400));
        assert_eq!(fx.stock_of(mug.id).await, (5, 0));
    }

    #[tokio::test]
    async fn empty_cart_and_foreign_address_are_rejected() {
        let fx = fixture().await;
        let err = fx
            .app
            .orders
            .create_order(fx.user, fx.checkout(PaymentProvider::Cod))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::EmptyCart)));

        let mug = fx.product("mug", 1000, 5).await;
        fx.app.carts.add_item(fx.user, mug.id, 1).await.unwrap();
        let stranger = address_for(UserId::new());
        fx.store.put_address(stranger.clone()).await;

        let mut request = fx.checkout(PaymentProvider::Cod);
        request.shipping_address = stranger.id;
        let err = fx.app.orders.create_order(fx.user, request).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
        assert_eq!(fx.stock_of(mug.id).await, (5, 0));
    }

    #[tokio::test]
    async fn cancelling_a_confirmed_order_restores_every_line_once() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 10).await;
        let pan = fx.product("pan", 2500, 10).await;
        let order = fx.place(PaymentProvider::Cod, &[(&mug, 1), (&pan, 3)]).await;
        assert_eq!(fx.stock_of(mug.id).await, (9, 1));
        assert_eq!(fx.stock_of(pan.id).await, (7, 3));

        fx.app
            .orders
            .change_status(order.id_typed(), FulfillmentStatus::Confirmed, None)
            .await
            .unwrap();
        let cancelled = fx.app.orders.cancel(fx.user, order.id_typed(), false).await.unwrap();
        assert_eq!(cancelled.status(), FulfillmentStatus::Cancelled);
        assert_eq!(fx.stock_of(mug.id).await, (10, 0));
        assert_eq!(fx.stock_of(pan.id).await, (10, 0));

        let err = fx.app.orders.cancel(fx.user, order.id_typed(), false).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::InvalidTransition { .. })));
        assert_eq!(fx.stock_of(pan.id).await, (10, 0));
    }

    #[tokio::test]
    async fn shipped_orders_cannot_be_cancelled() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 10).await;
        let order = fx.place(PaymentProvider::Cod, &[(&mug, 2)]).await;
        let id = order.id_typed();

        for status in [
            FulfillmentStatus::Confirmed,
            FulfillmentStatus::Processing,
            FulfillmentStatus::Shipped,
        ] {
            fx.app.orders.change_status(id, status, Some("TRK-1".into())).await.unwrap();
        }

        let err = fx.app.orders.cancel(fx.user, id, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::InvalidTransition { .. })));
        let stored = fx.order(id).await;
        assert_eq!(stored.status(), FulfillmentStatus::Shipped);
        assert_eq!(stored.tracking_number(), Some("TRK-1"));
        assert_eq!(fx.stock_of(mug.id).await, (8, 2));
    }

    #[tokio::test]
    async fn other_customers_cannot_see_or_cancel_an_order() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 10).await;
        let order = fx.place(PaymentProvider::Cod, &[(&mug, 1)]).await;
        let stranger = UserId::new();

        let err = fx.app.orders.get(stranger, order.id_typed(), false).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
        let err = fx.app.orders.cancel(stranger, order.id_typed(), false).await.unwrap_err();
        assert_eq!(err.http_status(), 404);

        assert!(fx.app.orders.get(stranger, order.id_typed(), true).await.is_ok());
        assert_eq!(fx.app.orders.list(fx.user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stripe_webhook_confirms_a_pending_order_once() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, intent) = fx.place_and_attach(PaymentProvider::Stripe, &[(&mug, 1)]).await;
        assert_eq!(order.payment_ref(), Some(intent.as_str()));
        let sub = fx.bus.subscribe();

        let outcome = fx.stripe_event(intent_succeeded(&intent, order.id_typed())).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Applied { order_id: order.id_typed() });
        let paid = fx.order(order.id_typed()).await;
        assert_eq!(paid.payment_status(), PaymentStatus::Paid);
        assert_eq!(paid.status(), FulfillmentStatus::Confirmed);
        assert_eq!(
            event_types(&sub),
            vec!["order.payment_status_changed", "order.status_changed"]
        );

        // Redelivery changes nothing.
        fx.stripe_event(intent_succeeded(&intent, order.id_typed())).await.unwrap();
        let again = fx.order(order.id_typed()).await;
        assert_eq!(again, paid);
        assert_eq!(again.version(), paid.version());
        assert!(event_types(&sub).is_empty());
        assert_eq!(fx.stock_of(mug.id).await, (4, 1));
    }

    #[tokio::test]
    async fn forged_webhooks_are_rejected_before_parsing() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, intent) = fx.place_and_attach(PaymentProvider::Stripe, &[(&mug, 1)]).await;

        let payload = serde_json::to_vec(&intent_succeeded(&intent, order.id_typed())).unwrap();
        let header = sign_stripe(&payload, "whsec_wrong", Utc::now().timestamp()).unwrap();
        let err = fx.app.payments.stripe_webhook(Some(&header), &payload).await.unwrap_err();
        assert!(matches!(err, ServiceError::Payment(PaymentProviderError::InvalidSignature(_))));

        let err = fx.app.payments.paystack_webhook(None, b"{}").await.unwrap_err();
        assert_eq!(err.code(), "invalid_signature");

        assert_eq!(fx.order(order.id_typed()).await.payment_status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_events_and_stale_failures_are_swallowed() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, intent) = fx.place_and_attach(PaymentProvider::Stripe, &[(&mug, 1)]).await;

        let outcome = fx
            .stripe_event(json!({ "id": "evt_0", "type": "customer.created", "data": { "object": {} } }))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));

        fx.stripe_event(intent_succeeded(&intent, order.id_typed())).await.unwrap();
        let failed_late = json!({
            "id": "evt_2",
            "type": "payment_intent.payment_failed",
            "data": { "object": { "id": intent, "metadata": {} } }
        });
        fx.stripe_event(failed_late).await.unwrap();
        assert_eq!(fx.order(order.id_typed()).await.payment_status(), PaymentStatus::Paid);

        let outcome = fx
            .paystack_event(json!({ "event": "charge.success", "data": { "reference": "nobody" } }))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn confirm_finds_the_order_by_provider_reference() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, reference) = fx.place_and_attach(PaymentProvider::Paystack, &[(&mug, 1)]).await;

        *fx.paystack.verify_status.lock().unwrap() = PaymentStatus::Paid;
        let request = ConfirmPayment {
            payment_id: reference.clone(),
            provider: PaymentProvider::Paystack,
            transaction_id: None,
        };
        let confirmation = fx.app.payments.confirm(fx.user, request.clone()).await.unwrap();
        assert_eq!(confirmation.payment_status, PaymentStatus::Paid);
        assert_eq!(confirmation.order.status(), FulfillmentStatus::Confirmed);

        // Polling again converges on the same state.
        let again = fx.app.payments.confirm(fx.user, request).await.unwrap();
        assert_eq!(again.order.version(), confirmation.order.version());

        let err = fx
            .app
            .payments
            .confirm(
                UserId::new(),
                ConfirmPayment {
                    payment_id: reference,
                    provider: PaymentProvider::Paystack,
                    transaction_id: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn provider_failure_leaves_the_order_as_it_was() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let order = fx.place(PaymentProvider::Stripe, &[(&mug, 1)]).await;

        fx.stripe.fail.store(true, Ordering::SeqCst);
        let err = fx
            .app
            .payments
            .create(
                fx.user,
                None,
                CreatePayment {
                    order_id: order.id_typed(),
                    provider: PaymentProvider::Stripe,
                    callback_url: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Payment(PaymentProviderError::Transport { .. })));
        assert_eq!(fx.order(order.id_typed()).await, order);
    }

    #[tokio::test]
    async fn paid_orders_cannot_start_another_payment() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, intent) = fx.place_and_attach(PaymentProvider::Stripe, &[(&mug, 1)]).await;
        fx.stripe_event(intent_succeeded(&intent, order.id_typed())).await.unwrap();

        let err = fx
            .app
            .payments
            .create(
                fx.user,
                None,
                CreatePayment {
                    order_id: order.id_typed(),
                    provider: PaymentProvider::Paystack,
                    callback_url: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::AlreadyPaid)));
    }

    #[tokio::test]
    async fn partial_then_full_refund_restocks_only_at_the_end() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, intent) = fx.place_and_attach(PaymentProvider::Stripe, &[(&mug, 2)]).await;
        fx.stripe_event(intent_succeeded(&intent, order.id_typed())).await.unwrap();

        let refund = |amount: Option<u64>| RefundOrder {
            order_id: order.id_typed(),
            amount: amount.map(Money::from_minor),
            reason: "Customer returned one item".into(),
            provider: PaymentProvider::Stripe,
        };

        let (result, partial) = fx.app.payments.refund(refund(Some(500))).await.unwrap();
        assert_eq!(result.refund_id, "re_1");
        assert_eq!(partial.payment_status(), PaymentStatus::PartiallyRefunded);
        assert_eq!(partial.status(), FulfillmentStatus::Confirmed);
        assert_eq!(partial.refunded_amount(), Money::from_minor(500));
        assert_eq!(fx.stock_of(mug.id).await, (3, 2));

        let err = fx.app.payments.refund(refund(Some(5000))).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
        assert_eq!(fx.stripe.refunds.load(Ordering::SeqCst), 1);

        let (result, full) = fx.app.payments.refund(refund(None)).await.unwrap();
        assert_eq!(result.amount, Money::from_minor(1500));
        assert_eq!(full.payment_status(), PaymentStatus::Refunded);
        assert_eq!(full.status(), FulfillmentStatus::Refunded);
        assert_eq!(fx.stock_of(mug.id).await, (5, 0));

        let err = fx.app.payments.refund(refund(None)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::AlreadyRefunded)));
    }

    #[tokio::test]
    async fn refund_requests_are_validated_before_the_provider_is_called() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, intent) = fx.place_and_attach(PaymentProvider::Stripe, &[(&mug, 1)]).await;

        let mut request = RefundOrder {
            order_id: order.id_typed(),
            amount: None,
            reason: "too short".into(),
            provider: PaymentProvider::Stripe,
        };
        let err = fx.app.payments.refund(request.clone()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));

        request.reason = "Item arrived damaged".into();
        let err = fx.app.payments.refund(request.clone()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::InvalidTransition { .. })));

        fx.stripe_event(intent_succeeded(&intent, order.id_typed())).await.unwrap();
        request.provider = PaymentProvider::Paystack;
        assert!(fx.app.payments.refund(request.clone()).await.is_err());
        request.provider = PaymentProvider::Cod;
        assert!(fx.app.payments.refund(request).await.is_err());

        assert_eq!(fx.stripe.refunds.load(Ordering::SeqCst), 0);
        assert_eq!(fx.paystack.refunds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_refund_webhooks_restore_stock_once() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, reference) = fx.place_and_attach(PaymentProvider::Paystack, &[(&mug, 3)]).await;

        fx.paystack_event(json!({
            "event": "charge.success",
            "data": { "reference": reference, "metadata": { "orderId": order.id_typed().to_string() } }
        }))
        .await
        .unwrap();
        assert_eq!(fx.stock_of(mug.id).await, (2, 3));

        for event in ["refund.created", "refund.processed", "refund.processed"] {
            let outcome = fx
                .paystack_event(json!({
                    "event": event,
                    "data": { "id": 3018284, "amount": 3000, "transaction_reference": reference }
                }))
                .await
                .unwrap();
            assert_eq!(outcome, WebhookOutcome::Applied { order_id: order.id_typed() });
        }

        let stored = fx.order(order.id_typed()).await;
        assert_eq!(stored.payment_status(), PaymentStatus::Refunded);
        assert_eq!(stored.status(), FulfillmentStatus::Refunded);
        assert_eq!(stored.refunded_amount(), Money::from_minor(3000));
        assert_eq!(stored.refunds().len(), 1);
        assert_eq!(fx.stock_of(mug.id).await, (5, 0));
    }

    #[tokio::test]
    async fn stripe_refund_totals_without_details_record_the_difference() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, intent) = fx.place_and_attach(PaymentProvider::Stripe, &[(&mug, 2)]).await;
        fx.stripe_event(intent_succeeded(&intent, order.id_typed())).await.unwrap();

        let charge_refunded = |total: u64| {
            json!({
                "id": "evt_3",
                "type": "charge.refunded",
                "data": { "object": { "payment_intent": intent, "amount_refunded": total } }
            })
        };

        fx.stripe_event(charge_refunded(800)).await.unwrap();
        fx.stripe_event(charge_refunded(800)).await.unwrap();
        let stored = fx.order(order.id_typed()).await;
        assert_eq!(stored.refunded_amount(), Money::from_minor(800));
        assert_eq!(stored.payment_status(), PaymentStatus::PartiallyRefunded);

        fx.stripe_event(charge_refunded(2000)).await.unwrap();
        let stored = fx.order(order.id_typed()).await;
        assert_eq!(stored.refunded_amount(), Money::from_minor(2000));
        assert_eq!(stored.payment_status(), PaymentStatus::Refunded);
        assert_eq!(stored.refunds().len(), 2);
    }

    #[tokio::test]
    async fn refund_total_arriving_before_the_refund_is_saved_counts_once() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, intent) = fx.place_and_attach(PaymentProvider::Stripe, &[(&mug, 2)]).await;
        let order_id = order.id_typed();
        fx.stripe_event(intent_succeeded(&intent, order_id)).await.unwrap();

        let charge_refunded = |total: u64| {
            json!({
                "id": "evt_5",
                "type": "charge.refunded",
                "data": { "object": { "payment_intent": intent, "amount_refunded": total } }
            })
        };

        // The provider has refunded re_dash and notified us before the
        // refund call that issued it has written to the order.
        fx.stripe_event(charge_refunded(500)).await.unwrap();
        let recorded = fx
            .app
            .orders
            .transition(order_id, |_| {
                Ok(OrderCommand::RecordRefund(RecordRefund {
                    order_id,
                    refund_id: "re_dash".into(),
                    amount: Some(Money::from_minor(500)),
                    reason: Some("Customer returned one item".into()),
                    provisional: false,
                    occurred_at: Utc::now(),
                }))
            })
            .await
            .unwrap();

        assert_eq!(recorded.refunded_amount(), Money::from_minor(500));
        assert_eq!(recorded.payment_status(), PaymentStatus::PartiallyRefunded);
        assert_eq!(recorded.status(), FulfillmentStatus::Confirmed);
        assert_eq!(recorded.refunds().len(), 1);
        assert_eq!(recorded.refunds()[0].refund_id, "re_dash");
        assert_eq!(fx.stock_of(mug.id).await, (3, 2));

        fx.stripe_event(charge_refunded(500)).await.unwrap();
        assert_eq!(fx.order(order_id).await.refunded_amount(), Money::from_minor(500));

        let (result, full) = fx
            .app
            .payments
            .refund(RefundOrder {
                order_id,
                amount: None,
                reason: "Customer returned the other item".into(),
                provider: PaymentProvider::Stripe,
            })
            .await
            .unwrap();
        assert_eq!(result.amount, Money::from_minor(1500));
        assert_eq!(full.payment_status(), PaymentStatus::Refunded);
        assert_eq!(full.status(), FulfillmentStatus::Refunded);
        assert_eq!(fx.stock_of(mug.id).await, (5, 0));

        fx.stripe_event(charge_refunded(2000)).await.unwrap();
        let stored = fx.order(order_id).await;
        assert_eq!(stored.refunded_amount(), Money::from_minor(2000));
        assert_eq!(stored.refunds().len(), 2);
        assert!(stored.unattributed_refunds().is_zero());
    }

    #[tokio::test]
    async fn cod_orders_are_not_confirmed_or_refunded_through_a_provider() {
        let fx = fixture().await;
        let mug = fx.product("mug", 1000, 5).await;
        let (order, reference) = fx.place_and_attach(PaymentProvider::Cod, &[(&mug, 1)]).await;
        assert_eq!(reference, order.number().as_str());

        let err = fx
            .app
            .payments
            .confirm(
                fx.user,
                ConfirmPayment {
                    payment_id: reference,
                    provider: PaymentProvider::Cod,
                    transaction_id: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(fx.order(order.id_typed()).await.payment_status(), PaymentStatus::Pending);
    }
}
