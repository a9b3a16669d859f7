use super::types::SubGraphState;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An element could not be instantiated or configured.
    #[error("Failed constructing {factory:?} (stage {stage_index:?}): {reason}")]
    Construction {
        stage_index: Option<usize>,
        factory: String,
        reason: String,
    },

    /// Two connection points could not be linked.
    #[error("Failed linking {from:?} to {to:?}")]
    Link { from: String, to: String },

    /// A handle was released twice, or does not belong to the component it was given to.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Operation {operation:?} is not allowed while in state {state}")]
    OutOfOrder {
        operation: &'static str,
        state: SubGraphState,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl GraphError {
    pub fn construction(stage_index: Option<usize>, factory: &str, reason: impl ToString) -> Self {
        Self::Construction {
            stage_index,
            factory: factory.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn link(from: impl ToString, to: impl ToString) -> Self {
        Self::Link {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
