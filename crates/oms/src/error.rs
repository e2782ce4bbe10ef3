use og_core::types::UserId;
use og_ledger::LedgerError;

/// Errors returned synchronously by the registry API.
///
/// Admission outcomes of accepted instructions are not errors; they are
/// recorded as the request's execution result.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("user {0} is already registered")]
    DuplicateUser(UserId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
