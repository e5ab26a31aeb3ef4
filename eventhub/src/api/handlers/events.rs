use crate::{
    api::models::events::{
        AttendeeResponse, EventCreate, EventResponse, EventUpdate, TicketTypeCreate, TicketTypeResponse, TicketTypeUpdate,
        VoucherCreate, VoucherPreviewResponse, VoucherResponse, VoucherUpdate, VoucherValidateQuery,
    },
    auth::permissions::{role, RequiresRole},
    errors::Result,
    types::{EventId, TicketTypeId, VoucherId},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

/// Create a draft event
#[utoipa::path(
    post,
    path = "/events",
    tag = "events",
    summary = "Create event",
    description = "Create a DRAFT event owned by the caller. `default_seats` adds a General Admission ticket type at the base price (ORGANIZER role required)",
    request_body = EventCreate,
    responses(
        (status = 201, description = "Draft created", body = EventResponse),
        (status = 400, description = "Blank title, inverted dates or negative price"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - requires ORGANIZER role"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer, data), fields(user_id = %organizer.id))]
pub async fn create_event(
    State(state): State<AppState>,
    organizer: RequiresRole<role::Organizer>,
    Json(data): Json<EventCreate>,
) -> Result<(StatusCode, Json<EventResponse>)> {
    let details = state.catalog.create_event(organizer.id, data.into()).await?;
    Ok((StatusCode::CREATED, Json(EventResponse::from(details))))
}

/// Edit a draft event
#[utoipa::path(
    patch,
    path = "/events/{event_id}",
    tag = "events",
    summary = "Update event",
    description = "Change a DRAFT event's details. Published events are frozen.",
    params(
        ("event_id" = String, Path, description = "Event ID"),
    ),
    request_body = EventUpdate,
    responses(
        (status = 200, description = "Event updated", body = EventResponse),
        (status = 400, description = "Invalid field values"),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Event not found"),
        (status = 409, description = "Event is already published"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer, data), fields(user_id = %organizer.id))]
pub async fn update_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    organizer: RequiresRole<role::Organizer>,
    Json(data): Json<EventUpdate>,
) -> Result<Json<EventResponse>> {
    let event = state.catalog.update_event(organizer.id, event_id, data.into()).await?;
    Ok(Json(EventResponse::from(event)))
}

/// Publish a draft event
#[utoipa::path(
    post,
    path = "/events/{event_id}/publish",
    tag = "events",
    summary = "Publish event",
    description = "Open a DRAFT event for sale. It must have at least one ticket type; afterwards the event and its ticket types can no longer be edited.",
    params(
        ("event_id" = String, Path, description = "Event ID"),
    ),
    responses(
        (status = 200, description = "Event published", body = EventResponse),
        (status = 400, description = "Event has no ticket types"),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Event not found"),
        (status = 409, description = "Event is already published"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer), fields(user_id = %organizer.id))]
pub async fn publish_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    organizer: RequiresRole<role::Organizer>,
) -> Result<Json<EventResponse>> {
    let details = state.catalog.publish_event(organizer.id, event_id).await?;
    Ok(Json(EventResponse::from(details)))
}

/// Delete a draft event
#[utoipa::path(
    delete,
    path = "/events/{event_id}",
    tag = "events",
    summary = "Delete event",
    description = "Delete a DRAFT event with its ticket types and vouchers",
    params(
        ("event_id" = String, Path, description = "Event ID"),
    ),
    responses(
        (status = 204, description = "Event deleted"),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Event not found"),
        (status = 409, description = "Event is already published"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer), fields(user_id = %organizer.id))]
pub async fn delete_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    organizer: RequiresRole<role::Organizer>,
) -> Result<StatusCode> {
    state.catalog.delete_event(organizer.id, event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a ticket type to a draft event
#[utoipa::path(
    post,
    path = "/events/{event_id}/ticket-types",
    tag = "events",
    summary = "Create ticket type",
    params(
        ("event_id" = String, Path, description = "Event ID"),
    ),
    request_body = TicketTypeCreate,
    responses(
        (status = 201, description = "Ticket type created", body = TicketTypeResponse),
        (status = 400, description = "Blank name, negative price or no seats"),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Event not found"),
        (status = 409, description = "Event is already published"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer, data), fields(user_id = %organizer.id))]
pub async fn create_ticket_type(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    organizer: RequiresRole<role::Organizer>,
    Json(data): Json<TicketTypeCreate>,
) -> Result<(StatusCode, Json<TicketTypeResponse>)> {
    let ticket_type = state.catalog.create_ticket_type(organizer.id, event_id, data.into()).await?;
    Ok((StatusCode::CREATED, Json(TicketTypeResponse::from(ticket_type))))
}

/// Edit a draft event's ticket type
#[utoipa::path(
    patch,
    path = "/ticket-types/{ticket_type_id}",
    tag = "events",
    summary = "Update ticket type",
    params(
        ("ticket_type_id" = String, Path, description = "Ticket type ID"),
    ),
    request_body = TicketTypeUpdate,
    responses(
        (status = 200, description = "Ticket type updated", body = TicketTypeResponse),
        (status = 400, description = "Invalid field values"),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Ticket type not found"),
        (status = 409, description = "Event is already published"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer, data), fields(user_id = %organizer.id))]
pub async fn update_ticket_type(
    State(state): State<AppState>,
    Path(ticket_type_id): Path<TicketTypeId>,
    organizer: RequiresRole<role::Organizer>,
    Json(data): Json<TicketTypeUpdate>,
) -> Result<Json<TicketTypeResponse>> {
    let ticket_type = state
        .catalog
        .update_ticket_type(organizer.id, ticket_type_id, data.into())
        .await?;
    Ok(Json(TicketTypeResponse::from(ticket_type)))
}

/// Remove a ticket type from a draft event
#[utoipa::path(
    delete,
    path = "/ticket-types/{ticket_type_id}",
    tag = "events",
    summary = "Delete ticket type",
    params(
        ("ticket_type_id" = String, Path, description = "Ticket type ID"),
    ),
    responses(
        (status = 204, description = "Ticket type deleted"),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Ticket type not found"),
        (status = 409, description = "Event is already published"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer), fields(user_id = %organizer.id))]
pub async fn delete_ticket_type(
    State(state): State<AppState>,
    Path(ticket_type_id): Path<TicketTypeId>,
    organizer: RequiresRole<role::Organizer>,
) -> Result<StatusCode> {
    state.catalog.delete_ticket_type(organizer.id, ticket_type_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create a voucher for an event
#[utoipa::path(
    post,
    path = "/events/{event_id}/vouchers",
    tag = "events",
    summary = "Create voucher",
    description = "Vouchers can be added to draft and published events alike. Codes are unique per event, ignoring case.",
    params(
        ("event_id" = String, Path, description = "Event ID"),
    ),
    request_body = VoucherCreate,
    responses(
        (status = 201, description = "Voucher created", body = VoucherResponse),
        (status = 400, description = "Blank code, non-positive value, inverted window or negative cap"),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Event not found"),
        (status = 409, description = "Code already exists for this event"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer, data), fields(user_id = %organizer.id))]
pub async fn create_voucher(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    organizer: RequiresRole<role::Organizer>,
    Json(data): Json<VoucherCreate>,
) -> Result<(StatusCode, Json<VoucherResponse>)> {
    let voucher = state.catalog.create_voucher(organizer.id, event_id, data.into()).await?;
    Ok((StatusCode::CREATED, Json(VoucherResponse::from(voucher))))
}

/// Edit a voucher
#[utoipa::path(
    patch,
    path = "/vouchers/{voucher_id}",
    tag = "events",
    summary = "Update voucher",
    params(
        ("voucher_id" = String, Path, description = "Voucher ID"),
    ),
    request_body = VoucherUpdate,
    responses(
        (status = 200, description = "Voucher updated", body = VoucherResponse),
        (status = 400, description = "Invalid field values"),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Voucher not found"),
        (status = 409, description = "Cap is below the uses already counted"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer, data), fields(user_id = %organizer.id))]
pub async fn update_voucher(
    State(state): State<AppState>,
    Path(voucher_id): Path<VoucherId>,
    organizer: RequiresRole<role::Organizer>,
    Json(data): Json<VoucherUpdate>,
) -> Result<Json<VoucherResponse>> {
    let voucher = state.catalog.update_voucher(organizer.id, voucher_id, data.into()).await?;
    Ok(Json(VoucherResponse::from(voucher)))
}

/// List an event's attendees
#[utoipa::path(
    get,
    path = "/events/{event_id}/attendees",
    tag = "events",
    summary = "List attendees",
    description = "Confirmed ticket holders, one row per customer and ticket type (the event's ORGANIZER or an ADMIN)",
    params(
        ("event_id" = String, Path, description = "Event ID"),
    ),
    responses(
        (status = 200, description = "Attendees", body = [AttendeeResponse]),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Event not found"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, viewer), fields(user_id = %viewer.id))]
pub async fn list_attendees(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    viewer: RequiresRole<role::OrganizerOrAdmin>,
) -> Result<Json<Vec<AttendeeResponse>>> {
    let attendees = state.lifecycle.attendees(&viewer, event_id).await?;
    Ok(Json(attendees.into_iter().map(AttendeeResponse::from).collect()))
}

/// Check a voucher code before purchasing
#[utoipa::path(
    get,
    path = "/events/{event_id}/vouchers/validate",
    tag = "events",
    summary = "Validate a voucher",
    description = "Reports why a voucher would not apply; checkout itself silently ignores unusable codes (CUSTOMER role required)",
    params(
        ("event_id" = String, Path, description = "Event ID"),
        VoucherValidateQuery
    ),
    responses(
        (status = 200, description = "Voucher is currently usable", body = VoucherPreviewResponse),
        (status = 400, description = "Voucher inactive, outside its window or used up"),
        (status = 404, description = "No such voucher for this event"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, customer, query), fields(user_id = %customer.id))]
pub async fn validate_voucher(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    Query(query): Query<VoucherValidateQuery>,
    customer: RequiresRole<role::Customer>,
) -> Result<Json<VoucherPreviewResponse>> {
    let voucher = state.lifecycle.preview_voucher(event_id, &query.code).await?;
    Ok(Json(VoucherPreviewResponse::from(voucher)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::store::Store,
        lifecycle::{NewTransaction, ProofUpload},
        ledger::inventory::ItemRequest,
        test_utils::*,
        types::{DiscountType, Role},
    };
    use bytes::Bytes;

    #[test_log::test(tokio::test)]
    async fn organizer_sees_attendees_after_accept() {
        let (app, harness) = create_test_app();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let customer = create_test_user(&harness.store, Role::Customer).await;
        let admin = create_test_user(&harness.store, Role::Admin).await;
        let rival = create_test_user(&harness.store, Role::Organizer).await;
        let event = create_test_event(&harness.store, organizer.id).await;
        let ticket_type = create_test_ticket_type(&harness.store, event.id, 150_000, 5).await;

        let lifecycle = &harness.lifecycle;
        let txn = lifecycle
            .create(
                customer.id,
                NewTransaction {
                    event_id: event.id,
                    items: vec![ItemRequest {
                        ticket_type_id: ticket_type.id,
                        quantity: 2,
                    }],
                    voucher_code: None,
                    coupon_code: None,
                    points_used: None,
                },
            )
            .await
            .unwrap()
            .transaction;
        lifecycle
            .upload_payment_proof(
                customer.id,
                txn.id,
                ProofUpload {
                    content_type: None,
                    image: Bytes::from_static(b"jpeg"),
                },
            )
            .await
            .unwrap();
        lifecycle.accept(organizer.id, txn.id).await.unwrap();

        let url = format!("/api/v1/events/{}/attendees", event.id);
        let response = as_user(app.get(&url), &organizer).await;
        response.assert_status_ok();
        let attendees: Vec<AttendeeResponse> = response.json();
        assert_eq!(attendees.len(), 1);
        assert_eq!(attendees[0].user_id, customer.id);
        assert_eq!(attendees[0].quantity, 2);
        assert_eq!(attendees[0].total_paid_idr, 300_000);

        as_user(app.get(&url), &admin).await.assert_status_ok();
        as_user(app.get(&url), &rival).await.assert_status_forbidden();
        as_user(app.get(&url), &customer).await.assert_status_forbidden();
    }

    #[test_log::test(tokio::test)]
    async fn voucher_check_reports_reasons() {
        let (app, harness) = create_test_app();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let customer = create_test_user(&harness.store, Role::Customer).await;
        let event = create_test_event(&harness.store, organizer.id).await;
        create_test_voucher(&harness.store, &event, "OPEN", DiscountType::Percent, 20, Some(10)).await;
        create_test_voucher(&harness.store, &event, "GONE", DiscountType::Amount, 5_000, Some(0)).await;

        let response = as_user(
            app.get(&format!("/api/v1/events/{}/vouchers/validate?code=open", event.id)),
            &customer,
        )
        .await;
        response.assert_status_ok();
        let preview: VoucherPreviewResponse = response.json();
        assert_eq!(preview.code, "OPEN");
        assert_eq!(preview.remaining_uses, Some(10));

        as_user(
            app.get(&format!("/api/v1/events/{}/vouchers/validate?code=GONE", event.id)),
            &customer,
        )
        .await
        .assert_status_bad_request();
        as_user(
            app.get(&format!("/api/v1/events/{}/vouchers/validate?code=NOPE", event.id)),
            &customer,
        )
        .await
        .assert_status_not_found();

        // Previewing never counts a use
        let mut unit = harness.store.begin(TEST_BUDGET).await.unwrap();
        assert_eq!(unit.voucher(preview.id).await.unwrap().unwrap().used_count, 0);
    }

    #[test_log::test(tokio::test)]
    async fn organizer_builds_and_publishes_an_event() {
        let (app, harness) = create_test_app();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let customer = create_test_user(&harness.store, Role::Customer).await;
        let starts_at = chrono::Utc::now() + chrono::Duration::days(10);
        let ends_at = starts_at + chrono::Duration::hours(3);

        let body = serde_json::json!({
            "title": "Indie Fest",
            "category": "Music",
            "starts_at": starts_at,
            "ends_at": ends_at,
            "base_price_idr": 120_000,
            "default_seats": 100,
        });
        as_user(app.post("/api/v1/events").json(&body), &customer)
            .await
            .assert_status_forbidden();
        let response = as_user(app.post("/api/v1/events").json(&body), &organizer).await;
        response.assert_status(StatusCode::CREATED);
        let draft: EventResponse = response.json();
        assert_eq!(draft.status, crate::db::models::catalog::EventStatus::Draft);
        assert_eq!(draft.ticket_types.as_ref().map(Vec::len), Some(1));

        let event_url = format!("/api/v1/events/{}", draft.id);
        let response = as_user(
            app.patch(&event_url).json(&serde_json::json!({ "title": "Indie Fest 2026" })),
            &organizer,
        )
        .await;
        response.assert_status_ok();
        assert_eq!(response.json::<EventResponse>().title, "Indie Fest 2026");

        let response = as_user(
            app.post(&format!("{event_url}/ticket-types"))
                .json(&serde_json::json!({ "name": "VIP", "price_idr": 400_000, "total_seats": 10 })),
            &organizer,
        )
        .await;
        response.assert_status(StatusCode::CREATED);
        let vip: TicketTypeResponse = response.json();
        assert_eq!(vip.available_seats, 10);

        let response = as_user(app.post(&format!("{event_url}/publish")), &organizer).await;
        response.assert_status_ok();
        let published: EventResponse = response.json();
        assert_eq!(published.status, crate::db::models::catalog::EventStatus::Published);
        assert_eq!(published.ticket_types.map(|types| types.len()), Some(2));

        as_user(app.patch(&event_url).json(&serde_json::json!({ "title": "Renamed" })), &organizer)
            .await
            .assert_status(StatusCode::CONFLICT);
        as_user(
            app.patch(&format!("/api/v1/ticket-types/{}", vip.id))
                .json(&serde_json::json!({ "price_idr": 1 })),
            &organizer,
        )
        .await
        .assert_status(StatusCode::CONFLICT);
        as_user(app.delete(&format!("/api/v1/ticket-types/{}", vip.id)), &organizer)
            .await
            .assert_status(StatusCode::CONFLICT);
        as_user(app.delete(&event_url), &organizer)
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[test_log::test(tokio::test)]
    async fn draft_event_can_be_deleted_by_its_owner() {
        let (app, harness) = create_test_app();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let rival = create_test_user(&harness.store, Role::Organizer).await;
        let draft = create_test_event_with_status(
            &harness.store,
            organizer.id,
            crate::db::models::catalog::EventStatus::Draft,
        )
        .await;
        let url = format!("/api/v1/events/{}", draft.id);

        as_user(app.delete(&url), &rival).await.assert_status_forbidden();
        as_user(app.delete(&url), &organizer)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        as_user(app.delete(&url), &organizer).await.assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn organizer_manages_vouchers_over_http() {
        let (app, harness) = create_test_app();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let event = create_test_event(&harness.store, organizer.id).await;
        let now = chrono::Utc::now();

        let body = serde_json::json!({
            "code": "EARLYBIRD",
            "discount_type": "PERCENT",
            "discount_value": 15,
            "starts_at": now - chrono::Duration::hours(1),
            "ends_at": now + chrono::Duration::days(7),
            "max_uses": 50,
        });
        let url = format!("/api/v1/events/{}/vouchers", event.id);
        let response = as_user(app.post(&url).json(&body), &organizer).await;
        response.assert_status(StatusCode::CREATED);
        let voucher: VoucherResponse = response.json();
        assert_eq!(voucher.max_uses, Some(50));
        as_user(app.post(&url).json(&body), &organizer)
            .await
            .assert_status(StatusCode::CONFLICT);

        let voucher_url = format!("/api/v1/vouchers/{}", voucher.id);
        let response = as_user(
            app.patch(&voucher_url).json(&serde_json::json!({ "discount_value": 20 })),
            &organizer,
        )
        .await;
        response.assert_status_ok();
        let kept: VoucherResponse = response.json();
        assert_eq!((kept.discount_value, kept.max_uses), (20, Some(50)));

        let response = as_user(
            app.patch(&voucher_url).json(&serde_json::json!({ "max_uses": null })),
            &organizer,
        )
        .await;
        response.assert_status_ok();
        assert_eq!(response.json::<VoucherResponse>().max_uses, None);

        as_user(
            app.patch(&voucher_url).json(&serde_json::json!({ "discount_value": 0 })),
            &organizer,
        )
        .await
        .assert_status_bad_request();
    }
}
