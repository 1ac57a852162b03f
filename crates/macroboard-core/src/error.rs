use thiserror::Error;

/// Failure kinds surfaced by board operations.
///
/// None of these are fatal: callers report them and keep handling events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// An empty required field or a malformed import payload. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// A stale id referencing a group or task that no longer exists.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// The key-value store refused a write.
    #[error("failed to persist board: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Group,
    Task,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Group => write!(f, "group"),
            EntityKind::Task => write!(f, "task"),
        }
    }
}

impl BoardError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn group_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: EntityKind::Group,
            id: id.into(),
        }
    }

    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: EntityKind::Task,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type BoardResult<T> = Result<T, BoardError>;
