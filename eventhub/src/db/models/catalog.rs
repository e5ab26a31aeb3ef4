use crate::types::{EventId, Idr, Role, TicketTypeId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    /// Denormalized cache of the points ledger; the ledger sum is authoritative
    pub points_balance: Idr,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Draft,
    Published,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: EventId,
    pub organizer_id: UserId,
    pub title: String,
    pub category: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub base_price_idr: Idr,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventCreateDBRequest {
    pub organizer_id: UserId,
    pub title: String,
    pub category: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub base_price_idr: Idr,
    pub status: EventStatus,
}

/// Changes to a DRAFT event; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct EventUpdateDBRequest {
    pub title: Option<String>,
    pub category: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub base_price_idr: Option<Idr>,
}

/// Authoritative seat inventory for one price tier of an event
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketType {
    pub id: TicketTypeId,
    pub event_id: EventId,
    pub name: String,
    pub price_idr: Idr,
    pub total_seats: i32,
    pub available_seats: i32,
}

#[derive(Debug, Clone)]
pub struct TicketTypeCreateDBRequest {
    pub event_id: EventId,
    pub name: String,
    pub price_idr: Idr,
    pub total_seats: i32,
}

#[derive(Debug, Clone, Default)]
pub struct TicketTypeUpdateDBRequest {
    pub name: Option<String>,
    pub price_idr: Option<Idr>,
    pub total_seats: Option<i32>,
}
