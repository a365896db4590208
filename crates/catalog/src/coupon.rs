use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult, Money, typed_id};

typed_id!(
    /// Coupon identifier.
    CouponId
);

/// How a coupon computes its discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CouponRule {
    /// `percent`% of the subtotal, optionally capped at `max_discount`.
    Percentage {
        percent: u8,
        max_discount: Option<Money>,
    },
    /// A flat amount; caps do not apply.
    Fixed { amount: Money },
}

impl CouponRule {
    pub fn discount_for(&self, subtotal: Money) -> Money {
        match *self {
            CouponRule::Percentage {
                percent,
                max_discount,
            } => {
                let raw = subtotal.percent(percent.min(100));
                match max_discount {
                    Some(cap) => raw.min(cap),
                    None => raw,
                }
            }
            CouponRule::Fixed { amount } => amount,
        }
    }
}

/// Discount rule with a validity window and usage cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    /// Upper-case code customers type in.
    pub code: String,
    pub rule: CouponRule,
    pub minimum_order: Option<Money>,
    pub usage_limit: Option<u32>,
    pub used_count: u32,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Coupon {
    pub fn new(id: CouponId, code: impl AsRef<str>, rule: CouponRule) -> Self {
        Self {
            id,
            code: Self::normalize_code(code.as_ref()),
            rule,
            minimum_order: None,
            usage_limit: None,
            used_count: 0,
            starts_at: None,
            ends_at: None,
            active: true,
        }
    }

    /// Codes are matched case-insensitively and without surrounding blanks.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit.is_some_and(|limit| self.used_count >= limit)
    }

    /// Check window and usage cap at `now`.
    pub fn ensure_redeemable(&self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::not_found("coupon"));
        }
        if self.starts_at.is_some_and(|start| now < start) {
            return Err(DomainError::CouponNotYetActive);
        }
        if self.ends_at.is_some_and(|end| now > end) {
            return Err(DomainError::CouponExpired);
        }
        if self.is_exhausted() {
            return Err(DomainError::CouponUsageLimitReached);
        }
        Ok(())
    }

    pub fn ensure_minimum(&self, subtotal: Money) -> DomainResult<()> {
        match self.minimum_order {
            Some(minimum) if subtotal < minimum => Err(DomainError::CouponMinimumNotMet { minimum }),
            _ => Ok(()),
        }
    }

    pub fn discount_for(&self, subtotal: Money) -> Money {
        self.rule.discount_for(subtotal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ten_percent_capped() -> Coupon {
        Coupon::new(
            CouponId::generate(),
            " save10 ",
            CouponRule::Percentage {
                percent: 10,
                max_discount: Some(Money::from_minor(200)),
            },
        )
    }

    #[test]
    fn code_is_normalized() {
        assert_eq!(ten_percent_capped().code, "SAVE10");
    }

    #[test]
    fn percentage_discount_is_capped() {
        let c = ten_percent_capped();
        assert_eq!(c.discount_for(Money::from_minor(3000)), Money::from_minor(200));
        assert_eq!(c.discount_for(Money::from_minor(1500)), Money::from_minor(150));
    }

    #[test]
    fn fixed_discount_ignores_subtotal() {
        let c = Coupon::new(
            CouponId::generate(),
            "FLAT5",
            CouponRule::Fixed {
                amount: Money::from_minor(500),
            },
        );
        assert_eq!(c.discount_for(Money::from_minor(300)), Money::from_minor(500));
    }

    #[test]
    fn window_is_enforced() {
        let now = Utc::now();
        let mut c = ten_percent_capped();

        c.starts_at = Some(now + Duration::days(1));
        assert_eq!(c.ensure_redeemable(now), Err(DomainError::CouponNotYetActive));

        c.starts_at = None;
        c.ends_at = Some(now - Duration::days(1));
        assert_eq!(c.ensure_redeemable(now), Err(DomainError::CouponExpired));
    }

    #[test]
    fn usage_cap_is_enforced() {
        let mut c = ten_percent_capped();
        c.usage_limit = Some(2);
        c.used_count = 2;
        assert_eq!(
            c.ensure_redeemable(Utc::now()),
            Err(DomainError::CouponUsageLimitReached)
        );
    }

    #[test]
    fn minimum_order_is_enforced() {
        let mut c = ten_percent_capped();
        c.minimum_order = Some(Money::from_minor(5000));
        assert_eq!(
            c.ensure_minimum(Money::from_minor(4999)),
            Err(DomainError::CouponMinimumNotMet {
                minimum: Money::from_minor(5000)
            })
        );
        assert!(c.ensure_minimum(Money::from_minor(5000)).is_ok());
    }
}
