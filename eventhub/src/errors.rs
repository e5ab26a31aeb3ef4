use crate::{
    db::errors::DbError,
    types::{Idr, Role, TicketTypeId},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum Error {
    /// No identity was supplied by the authenticating proxy
    #[error("Authentication required: {message}")]
    Unauthenticated { message: String },

    /// Authenticated, but the caller's role does not allow the operation
    #[error("Insufficient permissions: {action} requires role {required}")]
    InsufficientRole { required: Role, action: String },

    /// Authenticated and role-qualified, but not allowed to touch this resource
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Organizers cannot buy tickets for their own events
    #[error("Organizers cannot book tickets for their own events")]
    SelfBookingForbidden,

    /// Entity missing, or not visible to the caller
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Malformed input
    #[error("{message}")]
    BadRequest { message: String },

    /// Live availability is below the requested quantity
    #[error("Insufficient seats for ticket type {ticket_type_id}")]
    InsufficientSeats { ticket_type_id: TicketTypeId },

    /// Lost the race for the last seats between availability check and decrement
    #[error("Seats for ticket type {ticket_type_id} are no longer available")]
    SeatsNoLongerAvailable { ticket_type_id: TicketTypeId },

    #[error("Not enough points: requested {requested}, usable {usable}")]
    InsufficientPoints { requested: Idr, usable: Idr },

    /// A state-transition precondition no longer holds
    #[error("{message}")]
    Conflict { message: String },

    /// The operation's unit of work could not start or finish in its budget; safe to retry
    #[error("{operation} timed out, please retry")]
    Timeout { operation: String },

    /// Database error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected internal failure
    #[error("Internal server error during {operation}")]
    Internal { operation: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        Error::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict { message: message.into() }
    }

    /// True for the two inventory-exhaustion failures
    pub fn is_seat_exhaustion(&self) -> bool {
        matches!(self, Error::InsufficientSeats { .. } | Error::SeatsNoLongerAvailable { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientRole { .. } | Error::Forbidden { .. } | Error::SelfBookingForbidden => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::BadRequest { .. }
            | Error::InsufficientSeats { .. }
            | Error::SeatsNoLongerAvailable { .. }
            | Error::InsufficientPoints { .. } => StatusCode::BAD_REQUEST,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(DbError::Timeout { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(DbError::NotFound) => StatusCode::NOT_FOUND,
            Error::Database(DbError::UniqueViolation { .. }) => StatusCode::CONFLICT,
            Error::Database(_) | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to API clients
    pub fn user_message(&self) -> String {
        match self {
            Error::Database(DbError::Timeout { .. }) => "The request timed out, please retry".to_string(),
            Error::Database(DbError::NotFound) => "Resource not found".to_string(),
            Error::Database(DbError::UniqueViolation { .. }) => "Resource already exists".to_string(),
            Error::Database(_) | Error::Internal { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = ?self, "Request failed");
        } else {
            warn!(error = %self, status = %status, "Request rejected");
        }

        (status, Json(json!({ "message": self.user_message() }))).into_response()
    }
}
