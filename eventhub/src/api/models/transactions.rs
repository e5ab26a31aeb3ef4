use crate::{
    db::models::{
        catalog::TicketType,
        transactions::{PaymentProof, Transaction, TransactionItem, TransactionStatus},
    },
    ledger::inventory::ItemRequest,
    lifecycle::{NewTransaction, TransactionDetails},
    types::{CouponId, EventId, Idr, TicketTypeId, TransactionId, UserId, VoucherId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionCreate {
    #[schema(value_type = String, format = "uuid")]
    pub event_id: EventId,
    /// At least one line, each with a positive quantity
    pub items: Vec<ItemRequest>,
    /// Event voucher; an unusable code prices the purchase without it
    pub voucher_code: Option<String>,
    /// Personal coupon; an unusable code prices the purchase without it
    pub coupon_code: Option<String>,
    /// Points to redeem, 1 point = 1 IDR
    pub points_used: Option<Idr>,
}

impl From<TransactionCreate> for NewTransaction {
    fn from(request: TransactionCreate) -> Self {
        Self {
            event_id: request.event_id,
            items: request.items,
            voucher_code: request.voucher_code,
            coupon_code: request.coupon_code,
            points_used: request.points_used,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AvailabilityCheck {
    pub items: Vec<ItemRequest>,
}

/// Query parameters for the organizer listing
#[derive(Debug, Deserialize, IntoParams)]
pub struct OrganizerTransactionsQuery {
    /// Only transactions for this event
    #[param(value_type = Option<String>, format = "uuid")]
    pub event_id: Option<EventId>,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TicketAvailability {
    #[schema(value_type = String, format = "uuid")]
    pub ticket_type_id: TicketTypeId,
    pub name: String,
    pub price_idr: Idr,
    pub available_seats: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionItemResponse {
    #[schema(value_type = String, format = "uuid")]
    pub ticket_type_id: TicketTypeId,
    pub quantity: i32,
    /// Price at purchase time
    pub unit_price_idr: Idr,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentProofResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub transaction_id: TransactionId,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TransactionId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub event_id: EventId,
    pub status: TransactionStatus,
    pub payment_due_at: DateTime<Utc>,
    /// Set once a payment proof has been uploaded
    pub organizer_decision_by: Option<DateTime<Utc>>,
    pub subtotal_idr: Idr,
    pub discount_voucher_idr: Idr,
    pub discount_coupon_idr: Idr,
    pub points_used: Idr,
    pub total_payable_idr: Idr,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub used_voucher_id: Option<VoucherId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub used_coupon_id: Option<CouponId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Included on single-transaction reads and on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<TransactionItemResponse>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_proof: Option<PaymentProofResponse>,
}

// Conversions
impl From<TicketType> for TicketAvailability {
    fn from(ticket_type: TicketType) -> Self {
        Self {
            ticket_type_id: ticket_type.id,
            name: ticket_type.name,
            price_idr: ticket_type.price_idr,
            available_seats: ticket_type.available_seats,
        }
    }
}

impl From<TransactionItem> for TransactionItemResponse {
    fn from(item: TransactionItem) -> Self {
        Self {
            ticket_type_id: item.ticket_type_id,
            quantity: item.quantity,
            unit_price_idr: item.unit_price_idr,
        }
    }
}

impl From<PaymentProof> for PaymentProofResponse {
    fn from(proof: PaymentProof) -> Self {
        Self {
            id: proof.id,
            transaction_id: proof.transaction_id,
            image_url: proof.image_url,
            created_at: proof.created_at,
        }
    }
}

impl From<Transaction> for TransactionResponse {
    fn from(db: Transaction) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            event_id: db.event_id,
            status: db.status,
            payment_due_at: db.payment_due_at,
            organizer_decision_by: db.organizer_decision_by,
            subtotal_idr: db.subtotal_idr,
            discount_voucher_idr: db.discount_voucher_idr,
            discount_coupon_idr: db.discount_coupon_idr,
            points_used: db.points_used,
            total_payable_idr: db.total_payable_idr,
            used_voucher_id: db.used_voucher_id,
            used_coupon_id: db.used_coupon_id,
            created_at: db.created_at,
            updated_at: db.updated_at,
            items: None,
            payment_proof: None,
        }
    }
}

impl From<TransactionDetails> for TransactionResponse {
    fn from(details: TransactionDetails) -> Self {
        Self {
            items: Some(details.items.into_iter().map(TransactionItemResponse::from).collect()),
            payment_proof: details.payment_proof.map(PaymentProofResponse::from),
            ..Self::from(details.transaction)
        }
    }
}
