use outbox_domain::error::DomainError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("unit of work already completed")]
    UnitOfWorkCompleted,

    #[error("unit of work is rollback-only, {discarded} event(s) discarded")]
    RollbackOnly { discarded: usize },
}

pub type AppResult<T> = Result<T, AppError>;
