use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use crate::api;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "X-EventHub-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-EventHub-User",
                    "User id asserted by the authenticating proxy, sent with X-EventHub-Role",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api/v1", description = "EventHub API server")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::transactions::create_transaction,
        api::handlers::transactions::check_availability,
        api::handlers::transactions::upload_payment_proof,
        api::handlers::transactions::accept_transaction,
        api::handlers::transactions::reject_transaction,
        api::handlers::transactions::cancel_transaction,
        api::handlers::transactions::get_transaction,
        api::handlers::transactions::list_my_transactions,
        api::handlers::transactions::list_organizer_transactions,
        api::handlers::events::create_event,
        api::handlers::events::update_event,
        api::handlers::events::publish_event,
        api::handlers::events::delete_event,
        api::handlers::events::create_ticket_type,
        api::handlers::events::update_ticket_type,
        api::handlers::events::delete_ticket_type,
        api::handlers::events::create_voucher,
        api::handlers::events::update_voucher,
        api::handlers::events::list_attendees,
        api::handlers::events::validate_voucher,
        api::handlers::points::get_balance,
        api::handlers::points::list_entries,
        api::handlers::points::create_adjustment,
    ),
    components(
        schemas(
            api::models::transactions::TransactionCreate,
            api::models::transactions::AvailabilityCheck,
            api::models::transactions::TicketAvailability,
            api::models::transactions::TransactionItemResponse,
            api::models::transactions::PaymentProofResponse,
            api::models::transactions::TransactionResponse,
            api::models::events::VoucherPreviewResponse,
            api::models::events::AttendeeResponse,
            api::models::events::EventCreate,
            api::models::events::EventUpdate,
            api::models::events::EventResponse,
            api::models::events::TicketTypeCreate,
            api::models::events::TicketTypeUpdate,
            api::models::events::TicketTypeResponse,
            api::models::events::VoucherCreate,
            api::models::events::VoucherUpdate,
            api::models::events::VoucherResponse,
            api::models::points::AdjustmentSource,
            api::models::points::PointAdjustmentCreate,
            api::models::points::PointEntryResponse,
            crate::ledger::inventory::ItemRequest,
            crate::ledger::points::PointsBalance,
            crate::db::models::catalog::EventStatus,
            crate::db::models::transactions::TransactionStatus,
            crate::db::models::points::PointSource,
            crate::types::DiscountType,
            crate::types::Role,
        )
    ),
    tags(
        (name = "transactions", description = "Ticket purchases and their lifecycle"),
        (name = "events", description = "Organizer catalog management, attendees and voucher checks"),
        (name = "points", description = "Loyalty points ledger"),
    ),
    info(
        title = "EventHub API",
        version = "0.1.0",
        description = "Event ticketing: purchases, payment proofs, organizer decisions, discounts and loyalty points",
    ),
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/transactions",
            "/transactions/{transaction_id}/payment-proof",
            "/transactions/organizer",
            "/events",
            "/events/{event_id}",
            "/events/{event_id}/publish",
            "/ticket-types/{ticket_type_id}",
            "/vouchers/{voucher_id}",
            "/events/{event_id}/attendees",
            "/points/adjustments",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert!(doc.components.unwrap().security_schemes.contains_key("X-EventHub-User"));
    }
}
