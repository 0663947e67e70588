use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Connectivity trouble; the same call may succeed later
    #[error("Graph store unavailable: {0}")]
    Transient(String),

    #[error("Graph query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<neo4rs::Error> for StoreError {
    fn from(e: neo4rs::Error) -> Self {
        match e {
            neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
                StoreError::Transient(e.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}
