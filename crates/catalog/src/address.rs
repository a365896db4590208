use serde::{Deserialize, Serialize};

use storefront_core::{UserId, ValueObject, typed_id};

typed_id!(
    /// Address book entry identifier.
    AddressId
);

/// Postal lines of an address, copied by value into orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSnapshot {
    pub name: String,
    pub phone: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl ValueObject for AddressSnapshot {}

/// Address book entry owned by a user.
///
/// Orders never link to this record; they keep an [`AddressSnapshot`] so that
/// later edits do not alter orders already placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub owner: UserId,
    pub lines: AddressSnapshot,
}

impl Address {
    pub fn snapshot(&self) -> AddressSnapshot {
        self.lines.clone()
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner == user_id
    }
}
