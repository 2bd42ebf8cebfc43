use movie_catalog_core::{FieldErrors, StoreError};

/// Every failure a request can end in. Each variant maps to exactly one
/// transport status in the service layer.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ApiError {
    #[error("{0}")]
    MalformedBody(String),
    #[error("body must not be empty")]
    EmptyBody,
    #[error("validation failed: {0}")]
    Validation(FieldErrors),
    #[error("the requested resource could not be found")]
    RecordNotFound,
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RecordNotFound => Self::RecordNotFound,
            StoreError::EditConflict => Self::EditConflict,
            StoreError::Unavailable(detail) => Self::StoreUnavailable(detail),
        }
    }
}

impl From<FieldErrors> for ApiError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}
