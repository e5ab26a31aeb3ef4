use crate::{
    api::models::transactions::{
        AvailabilityCheck, OrganizerTransactionsQuery, PaymentProofResponse, TicketAvailability, TransactionCreate,
        TransactionResponse,
    },
    auth::{
        current_user::CurrentUser,
        permissions::{role, RequiresRole},
    },
    errors::{Error, Result},
    lifecycle::ProofUpload,
    types::TransactionId,
    AppState,
};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

/// Multipart field carrying the proof image
pub const PAYMENT_PROOF_FIELD: &str = "payment_proof";

/// Create a transaction
#[utoipa::path(
    post,
    path = "/transactions",
    tag = "transactions",
    summary = "Purchase tickets",
    description = "Reserve seats, apply an optional voucher, coupon and points, and open a transaction awaiting payment (CUSTOMER role required)",
    request_body = TransactionCreate,
    responses(
        (status = 201, description = "Transaction created, waiting for payment", body = TransactionResponse),
        (status = 400, description = "Invalid items, not enough seats or not enough points"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - requires CUSTOMER role, or the event is the caller's own"),
        (status = 404, description = "Event or ticket type not found"),
        (status = 503, description = "Timed out, safe to retry"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, customer, data), fields(user_id = %customer.id, event_id = %data.event_id))]
pub async fn create_transaction(
    State(state): State<AppState>,
    customer: RequiresRole<role::Customer>,
    Json(data): Json<TransactionCreate>,
) -> Result<(StatusCode, Json<TransactionResponse>)> {
    let details = state.lifecycle.create(customer.id, data.into()).await?;
    Ok((StatusCode::CREATED, Json(TransactionResponse::from(details))))
}

/// Check live seat availability
#[utoipa::path(
    post,
    path = "/transactions/check-availability",
    tag = "transactions",
    summary = "Check seat availability",
    description = "Verify that every requested ticket type currently has enough seats. Nothing is reserved.",
    request_body = AvailabilityCheck,
    responses(
        (status = 200, description = "All requested seats are available", body = [TicketAvailability]),
        (status = 400, description = "Not enough seats or invalid items"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Ticket type not found"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip_all)]
pub async fn check_availability(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(data): Json<AvailabilityCheck>,
) -> Result<Json<Vec<TicketAvailability>>> {
    let ticket_types = state.lifecycle.check_availability(&data.items).await?;
    Ok(Json(ticket_types.into_iter().map(TicketAvailability::from).collect()))
}

/// Upload a payment proof
#[utoipa::path(
    post,
    path = "/transactions/{transaction_id}/payment-proof",
    tag = "transactions",
    summary = "Upload payment proof",
    description = "Attach a JPEG, PNG or WebP image in the `payment_proof` multipart field. Moves the transaction to WAITING_ADMIN_CONFIRMATION.",
    params(
        ("transaction_id" = String, Path, description = "Transaction ID"),
    ),
    request_body(content_type = "multipart/form-data", description = "Multipart form with a `payment_proof` file"),
    responses(
        (status = 200, description = "Proof stored", body = PaymentProofResponse),
        (status = 400, description = "Missing, empty or unsupported file"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No owned transaction waiting for payment"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, customer, multipart), fields(user_id = %customer.id))]
pub async fn upload_payment_proof(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
    customer: RequiresRole<role::Customer>,
    mut multipart: Multipart,
) -> Result<Json<PaymentProofResponse>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::bad_request(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(PAYMENT_PROOF_FIELD) {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let image = field
            .bytes()
            .await
            .map_err(|e| Error::bad_request(format!("Failed to read payment proof: {e}")))?;
        upload = Some(ProofUpload { content_type, image });
        break;
    }

    let upload = upload.ok_or_else(|| Error::bad_request(format!("Multipart field `{PAYMENT_PROOF_FIELD}` is required")))?;
    let proof = state
        .lifecycle
        .upload_payment_proof(customer.id, transaction_id, upload)
        .await?;
    Ok(Json(PaymentProofResponse::from(proof)))
}

/// Accept a transaction
#[utoipa::path(
    patch,
    path = "/transactions/{transaction_id}/accept",
    tag = "transactions",
    summary = "Accept a paid transaction",
    description = "Confirm the payment, count voucher and coupon usage and register the attendance (ORGANIZER of the event required)",
    params(
        ("transaction_id" = String, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction is DONE", body = TransactionResponse),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "Transaction is not waiting for a decision, or a discount can no longer be confirmed"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer), fields(user_id = %organizer.id))]
pub async fn accept_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
    organizer: RequiresRole<role::Organizer>,
) -> Result<Json<TransactionResponse>> {
    let transaction = state.lifecycle.accept(organizer.id, transaction_id).await?;
    Ok(Json(TransactionResponse::from(transaction)))
}

/// Reject a transaction
#[utoipa::path(
    patch,
    path = "/transactions/{transaction_id}/reject",
    tag = "transactions",
    summary = "Reject a paid transaction",
    description = "Reject the payment and give back seats, discounts and points (ORGANIZER of the event required)",
    params(
        ("transaction_id" = String, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction is REJECTED", body = TransactionResponse),
        (status = 403, description = "Not the event's organizer"),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "Transaction is not waiting for a decision"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer), fields(user_id = %organizer.id))]
pub async fn reject_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
    organizer: RequiresRole<role::Organizer>,
) -> Result<Json<TransactionResponse>> {
    let transaction = state.lifecycle.reject(organizer.id, transaction_id).await?;
    Ok(Json(TransactionResponse::from(transaction)))
}

/// Cancel a transaction
#[utoipa::path(
    patch,
    path = "/transactions/{transaction_id}/cancel",
    tag = "transactions",
    summary = "Cancel an open transaction",
    description = "Cancel one of the caller's own transactions that is still waiting for payment or a decision",
    params(
        ("transaction_id" = String, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction is CANCELED", body = TransactionResponse),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "Transaction already reached a final state"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn cancel_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
    customer: RequiresRole<role::Customer>,
) -> Result<Json<TransactionResponse>> {
    let transaction = state.lifecycle.cancel(customer.id, transaction_id).await?;
    Ok(Json(TransactionResponse::from(transaction)))
}

/// Get a transaction
#[utoipa::path(
    get,
    path = "/transactions/{transaction_id}",
    tag = "transactions",
    summary = "Get a transaction",
    description = "Visible to the purchaser, the event's organizer and admins",
    params(
        ("transaction_id" = String, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction with items and payment proof", body = TransactionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Transaction not found"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, current_user), fields(user_id = %current_user.id))]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
    current_user: CurrentUser,
) -> Result<Json<TransactionResponse>> {
    let details = state.lifecycle.get(&current_user, transaction_id).await?;
    Ok(Json(TransactionResponse::from(details)))
}

/// List the caller's purchases
#[utoipa::path(
    get,
    path = "/transactions/my",
    tag = "transactions",
    summary = "List own transactions",
    responses(
        (status = 200, description = "Newest first", body = [TransactionResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires CUSTOMER role"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn list_my_transactions(
    State(state): State<AppState>,
    customer: RequiresRole<role::Customer>,
) -> Result<Json<Vec<TransactionResponse>>> {
    let transactions = state.lifecycle.list_for_customer(customer.id).await?;
    Ok(Json(transactions.into_iter().map(TransactionResponse::from).collect()))
}

/// List transactions for the caller's events
#[utoipa::path(
    get,
    path = "/transactions/organizer",
    tag = "transactions",
    summary = "List transactions for own events",
    params(
        OrganizerTransactionsQuery
    ),
    responses(
        (status = 200, description = "Newest first", body = [TransactionResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires ORGANIZER role"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, organizer), fields(user_id = %organizer.id))]
pub async fn list_organizer_transactions(
    State(state): State<AppState>,
    Query(query): Query<OrganizerTransactionsQuery>,
    organizer: RequiresRole<role::Organizer>,
) -> Result<Json<Vec<TransactionResponse>>> {
    let transactions = state.lifecycle.list_for_organizer(organizer.id, query.event_id).await?;
    Ok(Json(transactions.into_iter().map(TransactionResponse::from).collect()))
}
