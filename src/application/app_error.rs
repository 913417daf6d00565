use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The provider disagrees with local state; the payment has been forced to `failed`.
    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    /// A commit during activation hit a uniqueness constraint; re-verify to observe the winner.
    #[error("Subscription activation conflict")]
    ActivationConflict,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Local pending rows were kept; the client can resume through verify.
    #[error("Payment provider initialization failed; reference={reference}")]
    ProviderInitFailed { reference: String },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Copy, Debug)]
pub enum ErrorCode {
    DatabaseError,
    InvalidCredentials,
    Forbidden,
    NotFound,
    InvalidInput,
    PaymentRejected,
    ActivationConflict,
    InvalidSignature,
    Conflict,
    ProviderInitFailed,
    UpstreamError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::PaymentRejected => "PAYMENT_REJECTED",
            ErrorCode::ActivationConflict => "ACTIVATION_CONFLICT",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::ProviderInitFailed => "PROVIDER_INIT_FAILED",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
