use crate::store::StoreError;

/// Faults the engine cannot recover from locally. Per-request outcomes
/// (no capacity, contention, rejected) are not errors.
#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
    LimitExceeded(&'static str),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Store(e) => write!(f, "{e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            EngineError::LimitExceeded(_) => None,
        }
    }
}
