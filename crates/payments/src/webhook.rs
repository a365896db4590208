//! Webhook authentication and normalisation.
//!
//! Nothing in a webhook body is trusted until its signature has been checked
//! against the raw bytes exactly as received.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Sha256, Sha512};

use storefront_core::Money;
use storefront_orders::{OrderId, PaymentProvider};

use crate::error::PaymentProviderError;

/// Default replay window for Stripe signatures, in seconds.
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

/// One refund reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRefund {
    pub refund_id: String,
    pub amount: Money,
}

/// Provider-neutral webhook notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentSucceeded {
        provider_ref: String,
        order_id: Option<OrderId>,
    },
    PaymentFailed {
        provider_ref: String,
        order_id: Option<OrderId>,
    },
    Refunded {
        /// Reference of the original payment.
        provider_ref: String,
        refunds: Vec<ProviderRefund>,
        /// Cumulative amount refunded so far, when the provider reports it.
        total_refunded: Option<Money>,
    },
    /// Authentic but irrelevant to order state.
    Ignored { event_type: String },
}

/// Stripe signs `"{t}.{payload}"`.
fn stripe_mac(secret: &str, timestamp: &str, payload: &[u8]) -> Result<Hmac<Sha256>, PaymentProviderError> {
    let mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentProviderError::InvalidSignature(e.to_string()))?;
    Ok(mac.chain_update(timestamp).chain_update(b".").chain_update(payload))
}

fn paystack_mac(secret: &str, payload: &[u8]) -> Result<Hmac<Sha512>, PaymentProviderError> {
    let mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentProviderError::InvalidSignature(e.to_string()))?;
    Ok(mac.chain_update(payload))
}

/// Constant-time check of a hex signature against `mac`. Anything that does
/// not decode as hex is a mismatch.
fn matches_hex<M: Mac>(mac: M, signature: &str) -> bool {
    hex::decode(signature.trim()).is_ok_and(|bytes| mac.verify_slice(&bytes).is_ok())
}

/// Produce a `Stripe-Signature` header value for `payload` (for tests and
/// local tooling that replays events).
pub fn sign_stripe(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, PaymentProviderError> {
    let t = timestamp.to_string();
    let sig = hex::encode(stripe_mac(secret, &t, payload)?.finalize().into_bytes());
    Ok(format!("t={t},v1={sig}"))
}

/// Produce an `x-paystack-signature` header value for `payload`.
pub fn sign_paystack(payload: &[u8], secret: &str) -> Result<String, PaymentProviderError> {
    Ok(hex::encode(paystack_mac(secret, payload)?.finalize().into_bytes()))
}

/// Check a `Stripe-Signature: t=…,v1=…` header.
///
/// The signed message is `"{t}.{payload}"`; any of several `v1` entries may
/// match (Stripe sends more than one while a secret is being rolled).
pub fn verify_stripe_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), PaymentProviderError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| PaymentProviderError::InvalidSignature("missing timestamp".into()))?;
    if candidates.is_empty() {
        return Err(PaymentProviderError::InvalidSignature("missing v1 signature".into()));
    }

    let t = timestamp.to_string();
    let mac = stripe_mac(secret, &t, payload)?;
    if !candidates.iter().any(|c| matches_hex(mac.clone(), c)) {
        return Err(PaymentProviderError::InvalidSignature("signature mismatch".into()));
    }

    if (now.timestamp() - timestamp).abs() > tolerance.num_seconds() {
        return Err(PaymentProviderError::InvalidSignature(
            "timestamp outside tolerance".into(),
        ));
    }

    Ok(())
}

/// Check an `x-paystack-signature` header (HMAC-SHA512 of the body, hex).
pub fn verify_paystack_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
) -> Result<(), PaymentProviderError> {
    if matches_hex(paystack_mac(secret, payload)?, header) {
        Ok(())
    } else {
        Err(PaymentProviderError::InvalidSignature("signature mismatch".into()))
    }
}

fn parse_json(provider: PaymentProvider, payload: &[u8]) -> Result<Value, PaymentProviderError> {
    serde_json::from_slice(payload)
        .map_err(|e| PaymentProviderError::malformed(provider, format!("webhook body: {e}")))
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn order_id_at(value: &Value, pointer: &str) -> Option<OrderId> {
    str_at(value, pointer).and_then(|s| s.parse().ok())
}

fn required(provider: PaymentProvider, value: Option<&str>, what: &str) -> Result<String, PaymentProviderError> {
    value
        .map(str::to_string)
        .ok_or_else(|| PaymentProviderError::malformed(provider, format!("webhook without {what}")))
}

/// Normalise a verified Stripe event.
pub fn parse_stripe_event(payload: &[u8]) -> Result<WebhookEvent, PaymentProviderError> {
    const P: PaymentProvider = PaymentProvider::Stripe;
    let event = parse_json(P, payload)?;
    let event_type = str_at(&event, "/type").unwrap_or_default();
    let object = event.pointer("/data/object").unwrap_or(&Value::Null);

    let parsed = match event_type {
        "payment_intent.succeeded" => WebhookEvent::PaymentSucceeded {
            provider_ref: required(P, str_at(object, "/id"), "payment intent id")?,
            order_id: order_id_at(object, "/metadata/orderId"),
        },
        "payment_intent.payment_failed" => WebhookEvent::PaymentFailed {
            provider_ref: required(P, str_at(object, "/id"), "payment intent id")?,
            order_id: order_id_at(object, "/metadata/orderId"),
        },
        "charge.refunded" => {
            let refunds = object
                .pointer("/refunds/data")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(|r| {
                            Some(ProviderRefund {
                                refund_id: r.get("id")?.as_str()?.to_string(),
                                amount: Money::from_minor(r.get("amount")?.as_u64()?),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            WebhookEvent::Refunded {
                provider_ref: required(P, str_at(object, "/payment_intent"), "payment_intent")?,
                refunds,
                total_refunded: object
                    .get("amount_refunded")
                    .and_then(Value::as_u64)
                    .map(Money::from_minor),
            }
        }
        other => WebhookEvent::Ignored {
            event_type: other.to_string(),
        },
    };

    Ok(parsed)
}

/// Normalise a verified Paystack event.
pub fn parse_paystack_event(payload: &[u8]) -> Result<WebhookEvent, PaymentProviderError> {
    const P: PaymentProvider = PaymentProvider::Paystack;
    let event = parse_json(P, payload)?;
    let event_type = str_at(&event, "/event").unwrap_or_default();
    let data = event.get("data").unwrap_or(&Value::Null);

    let parsed = match event_type {
        "charge.success" => WebhookEvent::PaymentSucceeded {
            provider_ref: required(P, str_at(data, "/reference"), "reference")?,
            order_id: order_id_at(data, "/metadata/orderId"),
        },
        "charge.failed" | "charge.failure" => WebhookEvent::PaymentFailed {
            provider_ref: required(P, str_at(data, "/reference"), "reference")?,
            order_id: order_id_at(data, "/metadata/orderId"),
        },
        // Both carry the same refund id, so whichever arrives second is a no-op.
        "refund.created" | "refund.processed" => {
            let reference = str_at(data, "/transaction_reference")
                .or_else(|| str_at(data, "/transaction/reference"))
                .or_else(|| str_at(data, "/transaction"));
            let refund_id = match data.get("id") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => str_at(data, "/refund_reference").map(str::to_string),
            };
            let amount = data.get("amount").and_then(Value::as_u64).map(Money::from_minor);

            WebhookEvent::Refunded {
                provider_ref: required(P, reference, "transaction reference")?,
                refunds: match (refund_id, amount) {
                    (Some(refund_id), Some(amount)) => vec![ProviderRefund { refund_id, amount }],
                    _ => Vec::new(),
                },
                total_refunded: None,
            }
        }
        other => WebhookEvent::Ignored {
            event_type: other.to_string(),
        },
    };

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRIPE_BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
    const STRIPE_SIG: &str = "001ce3ef73e456cedaab328328720d3ad59defb8bbd0f1518f46c04ad4ac0bb7";
    const PAYSTACK_BODY: &[u8] = br#"{"event":"charge.success"}"#;
    const PAYSTACK_SIG: &str = "f2a293cf42f9e20ec3c3db0a70b22230323834bed90ba89ee006fcd345e4e6929294c299bd1140b63235cadcb753293310d3aa538d5d7c0d90f6d6ba77cb7357";

    fn tolerance() -> Duration {
        Duration::seconds(STRIPE_TOLERANCE_SECS)
    }

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    #[test]
    fn stripe_signature_matches_reference_vector() {
        let header = format!("t=1700000000,v1={STRIPE_SIG}");
        verify_stripe_signature(&header, STRIPE_BODY, "whsec_test", at(1_700_000_100), tolerance())
            .unwrap();
        assert_eq!(sign_stripe(STRIPE_BODY, "whsec_test", 1_700_000_000).unwrap(), header);
    }

    #[test]
    fn stripe_signature_accepts_any_of_several_v1_entries() {
        let header = format!("t=1700000000,v1=deadbeef,v1={STRIPE_SIG},v0=ignored");
        assert!(
            verify_stripe_signature(&header, STRIPE_BODY, "whsec_test", at(1_700_000_000), tolerance())
                .is_ok()
        );
    }

    #[test]
    fn stripe_signature_rejects_tampering_and_replay() {
        let header = format!("t=1700000000,v1={STRIPE_SIG}");
        let tampered = br#"{"id":"evt_2","type":"payment_intent.succeeded"}"#;
        assert!(
            verify_stripe_signature(&header, tampered, "whsec_test", at(1_700_000_000), tolerance())
                .is_err()
        );
        assert!(
            verify_stripe_signature(&header, STRIPE_BODY, "whsec_test", at(1_700_000_301), tolerance())
                .is_err()
        );
        assert!(verify_stripe_signature("v1=abc", STRIPE_BODY, "whsec_test", at(0), tolerance()).is_err());
    }

    #[test]
    fn paystack_signature_matches_reference_vector() {
        verify_paystack_signature(PAYSTACK_SIG, PAYSTACK_BODY, "sk_test_paystack").unwrap();
        assert!(verify_paystack_signature(PAYSTACK_SIG, PAYSTACK_BODY, "sk_other").is_err());
        assert_eq!(sign_paystack(PAYSTACK_BODY, "sk_test_paystack").unwrap(), PAYSTACK_SIG);
    }

    #[test]
    fn signatures_are_compared_as_bytes_not_text() {
        let upper = PAYSTACK_SIG.to_ascii_uppercase();
        assert!(verify_paystack_signature(&upper, PAYSTACK_BODY, "sk_test_paystack").is_ok());

        let header = format!("t=1700000000,v1={}", STRIPE_SIG.to_ascii_uppercase());
        assert!(
            verify_stripe_signature(&header, STRIPE_BODY, "whsec_test", at(1_700_000_000), tolerance())
                .is_ok()
        );
    }

    #[test]
    fn malformed_or_truncated_signatures_are_rejected() {
        for bad in ["", "zz", "not hex at all", &PAYSTACK_SIG[..64], &PAYSTACK_SIG[1..]] {
            assert!(
                verify_paystack_signature(bad, PAYSTACK_BODY, "sk_test_paystack").is_err(),
                "accepted {bad:?}"
            );
        }

        let truncated = format!("t=1700000000,v1={}", &STRIPE_SIG[..32]);
        assert!(
            verify_stripe_signature(&truncated, STRIPE_BODY, "whsec_test", at(1_700_000_000), tolerance())
                .is_err()
        );
    }

    #[test]
    fn stripe_events_are_normalised() {
        let order_id = OrderId::generate();
        let body = format!(
            r#"{{"type":"payment_intent.succeeded","data":{{"object":{{"id":"pi_1","metadata":{{"orderId":"{order_id}"}}}}}}}}"#
        );
        assert_eq!(
            parse_stripe_event(body.as_bytes()).unwrap(),
            WebhookEvent::PaymentSucceeded {
                provider_ref: "pi_1".into(),
                order_id: Some(order_id)
            }
        );

        let refunded = br#"{"type":"charge.refunded","data":{"object":{"id":"ch_1","payment_intent":"pi_1","amount_refunded":700,"refunds":{"data":[{"id":"re_1","amount":500},{"id":"re_2","amount":200}]}}}}"#;
        match parse_stripe_event(refunded).unwrap() {
            WebhookEvent::Refunded {
                provider_ref,
                refunds,
                total_refunded,
            } => {
                assert_eq!(provider_ref, "pi_1");
                assert_eq!(refunds.len(), 2);
                assert_eq!(total_refunded, Some(Money::from_minor(700)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_events_are_ignored() {
        let body = br#"{"type":"customer.created","data":{"object":{}}}"#;
        assert_eq!(
            parse_stripe_event(body).unwrap(),
            WebhookEvent::Ignored {
                event_type: "customer.created".into()
            }
        );
    }

    #[test]
    fn paystack_events_are_normalised() {
        let failed = br#"{"event":"charge.failed","data":{"reference":"ORD-1-1-99","metadata":""}}"#;
        assert_eq!(
            parse_paystack_event(failed).unwrap(),
            WebhookEvent::PaymentFailed {
                provider_ref: "ORD-1-1-99".into(),
                order_id: None
            }
        );

        for event in ["refund.created", "refund.processed"] {
            let refund = format!(
                r#"{{"event":"{event}","data":{{"id":42,"amount":1500,"transaction_reference":"ORD-1-1-99"}}}}"#
            );
            assert_eq!(
                parse_paystack_event(refund.as_bytes()).unwrap(),
                WebhookEvent::Refunded {
                    provider_ref: "ORD-1-1-99".into(),
                    refunds: vec![ProviderRefund {
                        refund_id: "42".into(),
                        amount: Money::from_minor(1500)
                    }],
                    total_refunded: None,
                }
            );
        }
    }
}
