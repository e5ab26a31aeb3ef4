use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type EventId = Uuid;
pub type TicketTypeId = Uuid;
pub type TransactionId = Uuid;
pub type VoucherId = Uuid;
pub type CouponId = Uuid;
pub type PointEntryId = Uuid;
pub type NotificationId = Uuid;

/// Amounts are whole Indonesian Rupiah; points are 1:1 with IDR at checkout.
pub type Idr = i64;

/// Role injected by the authenticating proxy in front of the service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Organizer,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Customer => write!(f, "CUSTOMER"),
            Role::Organizer => write!(f, "ORGANIZER"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CUSTOMER" => Ok(Role::Customer),
            "ORGANIZER" => Ok(Role::Organizer),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Percentage or flat amount, shared by vouchers and coupons
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Amount,
    Percent,
}

impl DiscountType {
    /// Discount granted against `subtotal` for a given configured value.
    /// Percent discounts round down to the nearest rupiah.
    pub fn amount_for(self, value: Idr, subtotal: Idr) -> Idr {
        match self {
            DiscountType::Amount => value,
            DiscountType::Percent => subtotal.saturating_mul(value) / 100,
        }
    }
}
