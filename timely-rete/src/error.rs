use crate::engine::EngineState;
use rete_recipes::QueryId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReteError {
    #[error(
        "Trying to use a Rete engine that has been disposed or has not yet been initialized \
         (state: {state:?})."
    )]
    NotReady { state: EngineState },

    #[error("pattern matcher for {0} belongs to a network that was reset or disposed")]
    StaleMatcher(QueryId),

    /// The compiled plan violates a precondition of the engine.  A
    /// correct compiler never triggers these.
    #[error("plan defect: {0}")]
    PlanDefect(String),

    #[error("no compiled plan for query {0}")]
    UnknownQuery(QueryId),

    #[error("invalid engine configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to start a container worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ReteError {
    pub(crate) fn plan_defect(message: impl Into<String>) -> Self {
        Self::PlanDefect(message.into())
    }
}

pub type ReteResult<T> = Result<T, ReteError>;
