use crate::{
    catalog::{EventDetails, NewEvent, NewTicketType, NewVoucher},
    db::models::{
        catalog::{Event, EventStatus, EventUpdateDBRequest, TicketType, TicketTypeUpdateDBRequest},
        discounts::{Voucher, VoucherUpdateDBRequest},
        transactions::Attendance,
    },
    types::{DiscountType, EventId, Idr, TicketTypeId, UserId, VoucherId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query parameters for the voucher check
#[derive(Debug, Deserialize, IntoParams)]
pub struct VoucherValidateQuery {
    /// Voucher code, matched case-insensitively
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VoucherPreviewResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: VoucherId,
    #[schema(value_type = String, format = "uuid")]
    pub event_id: EventId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Idr,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// `None` when the voucher is uncapped
    pub remaining_uses: Option<i32>,
}

/// Confirmed holding of one customer for one ticket type
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttendeeResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub ticket_type_id: TicketTypeId,
    pub quantity: i32,
    pub total_paid_idr: Idr,
    pub updated_at: DateTime<Utc>,
}

impl From<Voucher> for VoucherPreviewResponse {
    fn from(voucher: Voucher) -> Self {
        Self {
            remaining_uses: voucher.max_uses.map(|max| (max - voucher.used_count).max(0)),
            id: voucher.id,
            event_id: voucher.event_id,
            code: voucher.code,
            discount_type: voucher.discount_type,
            discount_value: voucher.discount_value,
            starts_at: voucher.starts_at,
            ends_at: voucher.ends_at,
        }
    }
}

impl From<Attendance> for AttendeeResponse {
    fn from(attendance: Attendance) -> Self {
        Self {
            user_id: attendance.user_id,
            ticket_type_id: attendance.ticket_type_id,
            quantity: attendance.quantity,
            total_paid_idr: attendance.total_paid_idr,
            updated_at: attendance.updated_at,
        }
    }
}

// Organizer catalog management

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventCreate {
    pub title: String,
    pub category: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub base_price_idr: Idr,
    /// Seats for a "General Admission" ticket type at the base price
    pub default_seats: Option<i32>,
}

impl From<EventCreate> for NewEvent {
    fn from(request: EventCreate) -> Self {
        Self {
            title: request.title,
            category: request.category,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            base_price_idr: request.base_price_idr,
            default_seats: request.default_seats,
        }
    }
}

/// Omitted fields keep their value
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub category: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub base_price_idr: Option<Idr>,
}

impl From<EventUpdate> for EventUpdateDBRequest {
    fn from(request: EventUpdate) -> Self {
        Self {
            title: request.title,
            category: request.category,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            base_price_idr: request.base_price_idr,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TicketTypeCreate {
    pub name: String,
    pub price_idr: Idr,
    pub total_seats: i32,
}

impl From<TicketTypeCreate> for NewTicketType {
    fn from(request: TicketTypeCreate) -> Self {
        Self {
            name: request.name,
            price_idr: request.price_idr,
            total_seats: request.total_seats,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TicketTypeUpdate {
    pub name: Option<String>,
    pub price_idr: Option<Idr>,
    /// Also resets available seats
    pub total_seats: Option<i32>,
}

impl From<TicketTypeUpdate> for TicketTypeUpdateDBRequest {
    fn from(request: TicketTypeUpdate) -> Self {
        Self {
            name: request.name,
            price_idr: request.price_idr,
            total_seats: request.total_seats,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VoucherCreate {
    pub code: String,
    pub discount_type: DiscountType,
    /// Rupiah for AMOUNT, 1-100 for PERCENT
    pub discount_value: Idr,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Omit for an uncapped voucher
    pub max_uses: Option<i32>,
}

impl From<VoucherCreate> for NewVoucher {
    fn from(request: VoucherCreate) -> Self {
        Self {
            code: request.code,
            discount_type: request.discount_type,
            discount_value: request.discount_value,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            max_uses: request.max_uses,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct VoucherUpdate {
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<Idr>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Omit to keep the cap, `null` to lift it
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<i32>)]
    pub max_uses: Option<Option<i32>>,
    pub is_active: Option<bool>,
}

impl From<VoucherUpdate> for VoucherUpdateDBRequest {
    fn from(request: VoucherUpdate) -> Self {
        Self {
            discount_type: request.discount_type,
            discount_value: request.discount_value,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            max_uses: request.max_uses,
            is_active: request.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TicketTypeResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TicketTypeId,
    #[schema(value_type = String, format = "uuid")]
    pub event_id: EventId,
    pub name: String,
    pub price_idr: Idr,
    pub total_seats: i32,
    pub available_seats: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: EventId,
    #[schema(value_type = String, format = "uuid")]
    pub organizer_id: UserId,
    pub title: String,
    pub category: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub base_price_idr: Idr,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    /// Present on create and publish
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_types: Option<Vec<TicketTypeResponse>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VoucherResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: VoucherId,
    #[schema(value_type = String, format = "uuid")]
    pub event_id: EventId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Idr,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<TicketType> for TicketTypeResponse {
    fn from(ticket_type: TicketType) -> Self {
        Self {
            id: ticket_type.id,
            event_id: ticket_type.event_id,
            name: ticket_type.name,
            price_idr: ticket_type.price_idr,
            total_seats: ticket_type.total_seats,
            available_seats: ticket_type.available_seats,
        }
    }
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            organizer_id: event.organizer_id,
            title: event.title,
            category: event.category,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            base_price_idr: event.base_price_idr,
            status: event.status,
            created_at: event.created_at,
            ticket_types: None,
        }
    }
}

impl From<EventDetails> for EventResponse {
    fn from(details: EventDetails) -> Self {
        Self {
            ticket_types: Some(details.ticket_types.into_iter().map(TicketTypeResponse::from).collect()),
            ..Self::from(details.event)
        }
    }
}

impl From<Voucher> for VoucherResponse {
    fn from(voucher: Voucher) -> Self {
        Self {
            id: voucher.id,
            event_id: voucher.event_id,
            code: voucher.code,
            discount_type: voucher.discount_type,
            discount_value: voucher.discount_value,
            starts_at: voucher.starts_at,
            ends_at: voucher.ends_at,
            max_uses: voucher.max_uses,
            used_count: voucher.used_count,
            is_active: voucher.is_active,
            created_at: voucher.created_at,
        }
    }
}
