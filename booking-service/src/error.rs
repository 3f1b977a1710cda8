use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel_async::pooled_connection::PoolError;
use serde::Serialize;
use shared::{PaymentStatus, UnknownVariant};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{collection} {id} not found")]
    NotFound { collection: &'static str, id: Uuid },

    /// A conditional claim found the car already taken.
    #[error("car {0} is already held by another lease")]
    CarClaimed(Uuid),

    /// A conditional status update found the lease in a different status.
    #[error("lease {lease_id} is no longer {expected}")]
    StaleStatus { lease_id: Uuid, expected: PaymentStatus },

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] UnknownVariant),

    #[error("unsupported filter: {0}")]
    Filter(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<bb8::RunError<PoolError>> for StoreError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        StoreError::Pool(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    BusinessRule,
    Auth,
    Persistence,
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Car {0} is not available")]
    CarUnavailable(Uuid),

    #[error("Cannot {action} a lease that is {from}")]
    InvalidTransition {
        lease_id: Uuid,
        from: PaymentStatus,
        action: &'static str,
    },

    #[error("Lease {0} was changed by another request")]
    ConcurrentUpdate(Uuid),

    #[error("You have already reviewed this car")]
    DuplicateReview { customer_id: Uuid, car_id: Uuid },

    #[error("Only customers with a paid lease can review this car")]
    ReviewNotAllowed { customer_id: Uuid, car_id: Uuid },

    #[error("A user with this email already exists")]
    EmailTaken,

    #[error("Sign up first!")]
    UnknownAccount,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Not allowed")]
    Forbidden,

    #[error("Store failure: {0}")]
    Store(StoreError),

    #[error("Internal failure: {0}")]
    Internal(String),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => BookingError::NotFound {
                entity: collection,
                id,
            },
            StoreError::CarClaimed(car_id) => BookingError::CarUnavailable(car_id),
            StoreError::StaleStatus { lease_id, .. } => BookingError::ConcurrentUpdate(lease_id),
            other => BookingError::Store(other),
        }
    }
}

impl BookingError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BookingError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Validation(_) => ErrorKind::Validation,
            BookingError::NotFound { .. } => ErrorKind::NotFound,
            BookingError::CarUnavailable(_)
            | BookingError::InvalidTransition { .. }
            | BookingError::ConcurrentUpdate(_)
            | BookingError::DuplicateReview { .. }
            | BookingError::ReviewNotAllowed { .. }
            | BookingError::EmailTaken => ErrorKind::BusinessRule,
            BookingError::UnknownAccount
            | BookingError::InvalidCredentials
            | BookingError::Unauthenticated
            | BookingError::Forbidden => ErrorKind::Auth,
            BookingError::Store(_) | BookingError::Internal(_) => ErrorKind::Persistence,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::UnknownAccount
            | BookingError::InvalidCredentials
            | BookingError::Unauthenticated => StatusCode::UNAUTHORIZED,
            BookingError::Forbidden => StatusCode::FORBIDDEN,
            BookingError::ReviewNotAllowed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::CarUnavailable(_)
            | BookingError::InvalidTransition { .. }
            | BookingError::ConcurrentUpdate(_)
            | BookingError::DuplicateReview { .. }
            | BookingError::EmailTaken => StatusCode::CONFLICT,
            BookingError::Store(_) | BookingError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Logs persistence failures at the service boundary before handing them back to the caller.
pub(crate) fn logged(operation: &'static str) -> impl Fn(BookingError) -> BookingError {
    move |err| {
        if err.kind() == ErrorKind::Persistence {
            error!("{} failed: {}", operation, err);
        }
        err
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            BookingError::Validation(fields) => ErrorResponse {
                error: "Validation failed".to_string(),
                details: serde_json::to_value(fields).ok(),
            },
            BookingError::Store(_) | BookingError::Internal(_) => ErrorResponse {
                error: "Something went wrong, please try again".to_string(),
                details: None,
            },
            other => ErrorResponse {
                error: other.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_become_business_rule_errors() {
        let car_id = Uuid::new_v4();
        let err = BookingError::from(StoreError::CarClaimed(car_id));
        assert!(matches!(err, BookingError::CarUnavailable(id) if id == car_id));
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn missing_records_become_not_found() {
        let id = Uuid::new_v4();
        let err = BookingError::from(StoreError::NotFound {
            collection: "lease",
            id,
        });
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), format!("lease {} not found", id));
    }

    #[test]
    fn database_failures_are_persistence_errors() {
        let err = BookingError::from(StoreError::Unavailable("down".to_string()));
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
