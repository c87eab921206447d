//! Error type for metadata store operations

/// Error type for metadata store operations
#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("volume already exists: {0}")]
    VolumeExists(String),
}

impl From<redb::TransactionError> for MetaStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<MetaStoreError> for mrc_common::Error {
    fn from(e: MetaStoreError) -> Self {
        match e {
            MetaStoreError::VolumeExists(name) => {
                Self::InvalidArgument(format!("volume already exists: {name}"))
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

pub type MetaStoreResult<T> = Result<T, MetaStoreError>;
