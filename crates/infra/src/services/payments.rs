use chrono::{Duration, Utc};
use tracing::{error, info, instrument, warn};

use storefront_core::{DomainError, Money, UserId};
use storefront_orders::{
    AttachPayment, Order, OrderCommand, OrderId, PaymentStatus, RecordRefund, UpdatePaymentStatus,
};
use storefront_payments::webhook::{
    STRIPE_TOLERANCE_SECS, parse_paystack_event, parse_stripe_event, verify_paystack_signature,
    verify_stripe_signature,
};
use storefront_payments::{
    GatewayRegistry, PaymentProvider, PaymentProviderError, PaymentRequest, PaymentSession,
    ProviderRefund, RefundRequest, RefundResult, WebhookEvent,
};

use super::orders::OrderService;
use super::{ServiceError, ServiceResult, SharedStore};

const REFUND_REASON_LEN: core::ops::RangeInclusive<usize> = 10..=500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePayment {
    pub order_id: OrderId,
    pub provider: PaymentProvider,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPayment {
    /// Provider reference returned by [`PaymentService::create`].
    pub payment_id: String,
    pub provider: PaymentProvider,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub payment_status: PaymentStatus,
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundOrder {
    pub order_id: OrderId,
    /// Defaults to the remaining refundable balance.
    pub amount: Option<Money>,
    pub reason: String,
    pub provider: PaymentProvider,
}

/// What a verified webhook did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied { order_id: OrderId },
    Ignored { reason: String },
}

/// Secrets used to authenticate provider webhooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookSecrets {
    pub stripe: Option<String>,
    /// Paystack signs with the account's secret key.
    pub paystack: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    store: SharedStore,
    gateways: GatewayRegistry,
    orders: OrderService,
    secrets: WebhookSecrets,
}

impl PaymentService {
    pub fn new(store: SharedStore, gateways: GatewayRegistry, orders: OrderService) -> Self {
        Self {
            store,
            gateways,
            orders,
            secrets: WebhookSecrets::default(),
        }
    }

    pub fn with_webhook_secrets(mut self, secrets: WebhookSecrets) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn providers(&self) -> Vec<PaymentProvider> {
        self.gateways.providers()
    }

    /// Start a payment for one of the caller's orders and remember the
    /// provider reference on it.
    #[instrument(skip(self, customer_email, request), fields(user_id = %customer, order_id = %request.order_id, provider = %request.provider))]
    pub async fn create(
        &self,
        customer: UserId,
        customer_email: Option<String>,
        request: CreatePayment,
    ) -> ServiceResult<PaymentSession> {
        let order = self.orders.get(customer, request.order_id, false).await?;
        order.ensure_payable()?;

        let gateway = self.gateways.get(request.provider)?;
        let payment = PaymentRequest::for_order(&order)
            .with_email(customer_email)
            .with_callback(request.callback_url);
        let session = gateway.initiate(&payment).await?;

        let provider_ref = session.provider_ref.clone();
        self.orders
            .transition(order.id_typed(), |_| {
                Ok(OrderCommand::AttachPayment(AttachPayment {
                    order_id: request.order_id,
                    provider: request.provider,
                    payment_ref: provider_ref.clone(),
                    occurred_at: Utc::now(),
                }))
            })
            .await?;

        info!(provider_ref = %session.provider_ref, "payment initiated");
        Ok(session)
    }

    /// Ask the provider how a payment went and apply the answer to the
    /// caller's order.
    #[instrument(skip(self, request), fields(user_id = %customer, provider = %request.provider, payment_id = %request.payment_id))]
    pub async fn confirm(&self, customer: UserId, request: ConfirmPayment) -> ServiceResult<PaymentConfirmation> {
        if request.provider == PaymentProvider::Cod {
            return Err(PaymentProviderError::Unsupported {
                provider: PaymentProvider::Cod,
                operation: "payment confirmation",
            }
            .into());
        }
        if let Some(transaction_id) = &request.transaction_id {
            info!(%transaction_id, "client reported transaction id");
        }

        let gateway = self.gateways.get(request.provider)?;
        let verification = gateway.verify(&request.payment_id).await?;

        let order = match verification.order_id {
            Some(order_id) => self.orders.get(customer, order_id, false).await?,
            None => self
                .store
                .order_by_payment_ref(request.provider, &verification.provider_ref)
                .await?
                .filter(|o| o.is_owned_by(customer))
                .ok_or_else(|| DomainError::not_found("order"))?,
        };

        let order = self
            .record_payment_status(order.id_typed(), verification.status, &verification.provider_ref)
            .await?;
        Ok(PaymentConfirmation {
            payment_status: order.payment_status(),
            order,
        })
    }

    /// Payment state of one order, for its owner or staff.
    pub async fn status(&self, viewer: UserId, order_id: OrderId, read_any: bool) -> ServiceResult<Order> {
        self.orders.get(viewer, order_id, read_any).await
    }

    /// Refund through the provider, then record it on the order.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, provider = %request.provider))]
    pub async fn refund(&self, request: RefundOrder) -> ServiceResult<(RefundResult, Order)> {
        let reason = request.reason.trim().to_string();
        if !REFUND_REASON_LEN.contains(&reason.chars().count()) {
            return Err(DomainError::validation("refund reason must be 10 to 500 characters").into());
        }
        if !matches!(request.provider, PaymentProvider::Stripe | PaymentProvider::Paystack) {
            return Err(DomainError::validation("refunds are only available for stripe and paystack").into());
        }

        let order = self
            .store
            .order(request.order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("order"))?;
        if order.payment_provider() != request.provider {
            return Err(DomainError::validation(format!(
                "order was paid with {}",
                order.payment_provider()
            ))
            .into());
        }
        let amount = order.refund_amount(request.amount)?;
        let provider_ref = order
            .payment_ref()
            .ok_or_else(|| DomainError::validation("order has no payment reference"))?
            .to_string();

        let gateway = self.gateways.get(request.provider)?;
        let result = gateway
            .refund(&RefundRequest {
                provider_ref,
                amount: Some(amount),
                reason: Some(reason.clone()),
            })
            .await?;

        let recorded = self
            .orders
            .transition(request.order_id, |_| {
                Ok(OrderCommand::RecordRefund(RecordRefund {
                    order_id: request.order_id,
                    refund_id: result.refund_id.clone(),
                    amount: Some(amount),
                    reason: Some(reason.clone()),
                    provisional: false,
                    occurred_at: Utc::now(),
                }))
            })
            .await;

        match recorded {
            Ok(order) => {
                info!(refund_id = %result.refund_id, %amount, "refund recorded");
                Ok((result, order))
            }
            Err(e) => {
                error!(refund_id = %result.refund_id, %amount, error = %e, "provider refunded but order not updated");
                Err(e)
            }
        }
    }

    /// Verify and apply a Stripe webhook delivery.
    #[instrument(skip_all, fields(provider = "stripe"))]
    pub async fn stripe_webhook(&self, signature: Option<&str>, payload: &[u8]) -> ServiceResult<WebhookOutcome> {
        let secret = self
            .secrets
            .stripe
            .as_deref()
            .ok_or(PaymentProviderError::NotConfigured(PaymentProvider::Stripe))?;
        let signature = signature
            .ok_or_else(|| PaymentProviderError::InvalidSignature("missing Stripe-Signature header".into()))?;
        verify_stripe_signature(
            signature,
            payload,
            secret,
            Utc::now(),
            Duration::seconds(STRIPE_TOLERANCE_SECS),
        )?;

        let event = parse_stripe_event(payload)?;
        self.apply_webhook(PaymentProvider::Stripe, event).await
    }

    /// Verify and apply a Paystack webhook delivery.
    #[instrument(skip_all, fields(provider = "paystack"))]
    pub async fn paystack_webhook(&self, signature: Option<&str>, payload: &[u8]) -> ServiceResult<WebhookOutcome> {
        let secret = self
            .secrets
            .paystack
            .as_deref()
            .ok_or(PaymentProviderError::NotConfigured(PaymentProvider::Paystack))?;
        let signature = signature
            .ok_or_else(|| PaymentProviderError::InvalidSignature("missing x-paystack-signature header".into()))?;
        verify_paystack_signature(signature, payload, secret)?;

        let event = parse_paystack_event(payload)?;
        self.apply_webhook(PaymentProvider::Paystack, event).await
    }

    /// Apply an authenticated, normalised webhook event.
    ///
    /// Business rejections (stale transitions, unknown orders) are logged and
    /// reported as ignored so the provider stops retrying; storage failures
    /// propagate so it retries later.
    pub async fn apply_webhook(&self, provider: PaymentProvider, event: WebhookEvent) -> ServiceResult<WebhookOutcome> {
        let result = match event {
            WebhookEvent::PaymentSucceeded { provider_ref, order_id } => {
                self.webhook_status(provider, &provider_ref, order_id, PaymentStatus::Paid).await
            }
            WebhookEvent::PaymentFailed { provider_ref, order_id } => {
                self.webhook_status(provider, &provider_ref, order_id, PaymentStatus::Failed).await
            }
            WebhookEvent::Refunded {
                provider_ref,
                refunds,
                total_refunded,
            } => self.webhook_refunds(provider, &provider_ref, refunds, total_refunded).await,
            WebhookEvent::Ignored { event_type } => {
                info!(%event_type, "webhook event ignored");
                return Ok(WebhookOutcome::Ignored { reason: format!("unhandled event {event_type}") });
            }
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(ServiceError::Domain(e)) => {
                warn!(%provider, error = %e, "webhook not applied");
                Ok(WebhookOutcome::Ignored { reason: e.to_string() })
            }
            Err(e) => Err(e),
        }
    }

    async fn locate(
        &self,
        provider: PaymentProvider,
        provider_ref: &str,
        order_id: Option<OrderId>,
    ) -> ServiceResult<Order> {
        let order = match order_id {
            Some(id) => self.store.order(id).await?,
            None => None,
        };
        let order = match order {
            Some(order) => Some(order),
            None => self.store.order_by_payment_ref(provider, provider_ref).await?,
        };
        Ok(order.ok_or_else(|| DomainError::not_found("order"))?)
    }

    async fn webhook_status(
        &self,
        provider: PaymentProvider,
        provider_ref: &str,
        order_id: Option<OrderId>,
        status: PaymentStatus,
    ) -> ServiceResult<WebhookOutcome> {
        let order = self.locate(provider, provider_ref, order_id).await?;
        let order = self.record_payment_status(order.id_typed(), status, provider_ref).await?;
        Ok(WebhookOutcome::Applied { order_id: order.id_typed() })
    }

    async fn webhook_refunds(
        &self,
        provider: PaymentProvider,
        provider_ref: &str,
        refunds: Vec<ProviderRefund>,
        total_refunded: Option<Money>,
    ) -> ServiceResult<WebhookOutcome> {
        let order = self.locate(provider, provider_ref, None).await?;
        let order_id = order.id_typed();

        let provisional = refunds.is_empty();
        let mut pending = refunds;
        if provisional {
            // Only the running total is known: hold whatever we have not seen
            // yet until a refund with a real id claims it.
            if let Some(total) = total_refunded {
                let unseen = total.saturating_sub(order.refunded_amount());
                if !unseen.is_zero() {
                    pending.push(ProviderRefund {
                        refund_id: format!("{provider_ref}@{}", total.minor()),
                        amount: unseen,
                    });
                }
            }
        }

        for refund in pending {
            let applied = self
                .orders
                .transition(order_id, |_| {
                    Ok(OrderCommand::RecordRefund(RecordRefund {
                        order_id,
                        refund_id: refund.refund_id.clone(),
                        amount: Some(refund.amount),
                        reason: None,
                        provisional,
                        occurred_at: Utc::now(),
                    }))
                })
                .await;
            match applied {
                Ok(_) => {}
                Err(ServiceError::Domain(e)) => {
                    warn!(%order_id, refund_id = %refund.refund_id, error = %e, "provider refund not recorded");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(WebhookOutcome::Applied { order_id })
    }

    /// The single entry point for payment status changes from confirmations
    /// and webhooks. A status the order has already moved past is logged and
    /// left alone.
    async fn record_payment_status(
        &self,
        order_id: OrderId,
        status: PaymentStatus,
        provider_ref: &str,
    ) -> ServiceResult<Order> {
        let applied = self
            .orders
            .transition(order_id, |_| {
                Ok(OrderCommand::UpdatePaymentStatus(UpdatePaymentStatus {
                    order_id,
                    status,
                    payment_ref: Some(provider_ref.to_string()),
                    occurred_at: Utc::now(),
                }))
            })
            .await;

        match applied {
            Err(ServiceError::Domain(DomainError::InvalidTransition { from, to })) => {
                warn!(%order_id, %from, %to, "stale payment status ignored");
                Ok(self
                    .store
                    .order(order_id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("order"))?)
            }
            other => other,
        }
    }
}
