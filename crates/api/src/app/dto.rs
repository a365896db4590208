//! Request/response bodies. JSON is camelCase; money is integer minor units.

use core::fmt::Display;
use core::str::FromStr;

use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_auth::{CommandAuthorization, Permission};
use storefront_cart::{Cart, CartSummary};
use storefront_catalog::AddressSnapshot;
use storefront_core::{AggregateRoot, Money};
use storefront_infra::services::{
    ConfirmPayment, CreateOrder, CreatePayment, PaymentConfirmation, RefundOrder,
};
use storefront_orders::{FulfillmentStatus, Order, PaymentProvider};
use storefront_payments::RefundResult;

use crate::app::errors;

/// Parse a path or body field, answering 400 with `code` on failure.
pub fn parse_field<T>(raw: &str, code: &'static str) -> Result<T, Response>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| errors::bad_request(code, e.to_string()))
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: String,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub shipping_address: String,
    pub billing_address: Option<String>,
    pub payment_method: String,
    pub payment_provider: String,
    pub notes: Option<String>,
}

impl CreateOrderRequest {
    pub fn into_command(self) -> Result<CreateOrder, Response> {
        let payment_method = self.payment_method.trim().to_string();
        if payment_method.is_empty() {
            return Err(errors::bad_request("validation_error", "paymentMethod is required"));
        }
        Ok(CreateOrder {
            shipping_address: parse_field(&self.shipping_address, "invalid_id")?,
            billing_address: self
                .billing_address
                .as_deref()
                .map(|raw| parse_field(raw, "invalid_id"))
                .transpose()?,
            payment_method,
            payment_provider: parse_field(&self.payment_provider, "validation_error")?,
            notes: self.notes.filter(|n| !n.trim().is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: String,
    pub tracking_number: Option<String>,
}

impl UpdateStatusRequest {
    pub fn status(&self) -> Result<FulfillmentStatus, Response> {
        parse_field(&self.status, "validation_error")
    }
}

impl CommandAuthorization for UpdateStatusRequest {
    fn required_permissions(&self) -> &[Permission] {
        const REQUIRED: &[Permission] = &[Permission::ORDERS_MANAGE];
        REQUIRED
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub order_id: String,
    pub payment_provider: String,
    pub callback_url: Option<String>,
}

impl CreatePaymentRequest {
    pub fn into_command(self) -> Result<CreatePayment, Response> {
        Ok(CreatePayment {
            order_id: parse_field(&self.order_id, "invalid_id")?,
            provider: parse_field(&self.payment_provider, "validation_error")?,
            callback_url: self.callback_url,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub payment_id: String,
    pub provider: String,
    pub transaction_id: Option<String>,
}

impl ConfirmPaymentRequest {
    pub fn into_command(self) -> Result<ConfirmPayment, Response> {
        if self.payment_id.trim().is_empty() {
            return Err(errors::bad_request("validation_error", "paymentId is required"));
        }
        Ok(ConfirmPayment {
            payment_id: self.payment_id,
            provider: parse_field(&self.provider, "validation_error")?,
            transaction_id: self.transaction_id,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub order_id: String,
    /// Minor units; omitted means the whole remaining balance.
    pub amount: Option<u64>,
    pub reason: String,
    pub payment_provider: String,
}

impl RefundRequest {
    pub fn into_command(self) -> Result<RefundOrder, Response> {
        Ok(RefundOrder {
            order_id: parse_field(&self.order_id, "invalid_id")?,
            amount: self.amount.map(Money::from_minor),
            reason: self.reason,
            provider: parse_field(&self.payment_provider, "validation_error")?,
        })
    }
}

impl CommandAuthorization for RefundRequest {
    fn required_permissions(&self) -> &[Permission] {
        const REQUIRED: &[Permission] = &[Permission::PAYMENTS_REFUND];
        REQUIRED
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub price: u64,
    pub final_price: u64,
    pub line_total: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub items: Vec<CartItemResponse>,
    pub coupon_code: Option<String>,
    pub subtotal: u64,
    pub discount: u64,
    pub coupon_discount: u64,
    pub total: u64,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Cart> for CartResponse {
    fn from(cart: &Cart) -> Self {
        Self {
            items: cart
                .items()
                .iter()
                .map(|item| CartItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    price: item.price.minor(),
                    final_price: item.final_price.minor(),
                    line_total: item.line_total().minor(),
                })
                .collect(),
            coupon_code: cart.coupon().map(|c| c.code.clone()),
            subtotal: cart.subtotal().minor(),
            discount: cart.discount().minor(),
            coupon_discount: cart.coupon_discount().minor(),
            total: cart.total().minor(),
            updated_at: cart.updated_at(),
            expires_at: cart.expires_at(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummaryResponse {
    pub item_count: u32,
    pub line_count: usize,
    pub subtotal: u64,
    pub discount: u64,
    pub coupon_code: Option<String>,
    pub coupon_discount: u64,
    pub total: u64,
}

impl From<CartSummary> for CartSummaryResponse {
    fn from(s: CartSummary) -> Self {
        Self {
            item_count: s.item_count,
            line_count: s.line_count,
            subtotal: s.subtotal.minor(),
            discount: s.discount.minor(),
            coupon_code: s.coupon_code,
            coupon_discount: s.coupon_discount.minor(),
            total: s.total.minor(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: String,
    pub name: String,
    pub sku: String,
    pub quantity: u32,
    pub price: u64,
    pub final_price: u64,
    pub line_total: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub refund_id: String,
    pub amount: u64,
    pub reason: Option<String>,
    pub refunded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub items: Vec<OrderItemResponse>,
    pub shipping_address: Option<AddressSnapshot>,
    pub billing_address: Option<AddressSnapshot>,
    pub payment_method: String,
    pub payment_provider: PaymentProvider,
    pub payment_ref: Option<String>,
    pub payment_status: String,
    pub status: String,
    pub subtotal: u64,
    pub discount: u64,
    pub coupon_code: Option<String>,
    pub coupon_discount: u64,
    pub tax: u64,
    pub shipping_cost: u64,
    pub total: u64,
    pub refunded_amount: u64,
    pub refunds: Vec<RefundResponse>,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id_typed().to_string(),
            order_number: order.number().to_string(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    name: item.name.clone(),
                    sku: item.sku.clone(),
                    quantity: item.quantity,
                    price: item.price.minor(),
                    final_price: item.final_price.minor(),
                    line_total: item.line_total().minor(),
                })
                .collect(),
            shipping_address: order.shipping_address().cloned(),
            billing_address: order.billing_address().cloned(),
            payment_method: order.payment_method().to_string(),
            payment_provider: order.payment_provider(),
            payment_ref: order.payment_ref().map(str::to_string),
            payment_status: order.payment_status().to_string(),
            status: order.status().to_string(),
            subtotal: order.subtotal().minor(),
            discount: order.discount().minor(),
            coupon_code: order.coupon_code().map(str::to_string),
            coupon_discount: order.coupon_discount().minor(),
            tax: order.tax().minor(),
            shipping_cost: order.shipping_cost().minor(),
            total: order.total().minor(),
            refunded_amount: order.refunded_amount().minor(),
            refunds: order
                .refunds()
                .iter()
                .map(|r| RefundResponse {
                    refund_id: r.refund_id.clone(),
                    amount: r.amount.minor(),
                    reason: r.reason.clone(),
                    refunded_at: r.refunded_at,
                })
                .collect(),
            notes: order.notes().map(str::to_string),
            tracking_number: order.tracking_number().map(str::to_string),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
            version: order.version(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub order_id: String,
    pub order_number: String,
    pub payment_status: String,
    pub payment_provider: PaymentProvider,
    pub payment_ref: Option<String>,
    pub status: String,
    pub total: u64,
    pub refunded_amount: u64,
}

impl From<&Order> for PaymentStatusResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id_typed().to_string(),
            order_number: order.number().to_string(),
            payment_status: order.payment_status().to_string(),
            payment_provider: order.payment_provider(),
            payment_ref: order.payment_ref().map(str::to_string),
            status: order.status().to_string(),
            total: order.total().minor(),
            refunded_amount: order.refunded_amount().minor(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentResponse {
    pub payment_status: String,
    pub order: OrderResponse,
}

impl From<&PaymentConfirmation> for ConfirmPaymentResponse {
    fn from(c: &PaymentConfirmation) -> Self {
        Self {
            payment_status: c.payment_status.to_string(),
            order: OrderResponse::from(&c.order),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResultResponse {
    pub refund_id: String,
    pub amount: u64,
    pub status: String,
    pub order: OrderResponse,
}

impl RefundResultResponse {
    pub fn new(result: &RefundResult, order: &Order) -> Self {
        Self {
            refund_id: result.refund_id.clone(),
            amount: result.amount.minor(),
            status: result.status.clone(),
            order: OrderResponse::from(order),
        }
    }
}
