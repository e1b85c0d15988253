use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry not started")]
    NotStarted,

    #[error("No factory registered for entity type '{0}'")]
    UnknownEntityType(String),

    #[error("Factory for entity type '{0}' failed: {1}")]
    FactoryFailed(String, String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

impl<T> From<std::sync::PoisonError<T>> for RegistryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
