//! Agent port - interface to external executor processes.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::{AgentRequest, AgentResult};

/// Trait for executor agent implementations.
///
/// An agent is the external process that does the actual work (code
/// generation, review, fixing). The engine only ever sees this
/// contract; it never interprets option meanings beyond passing them
/// through and recording their effect on the result.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Get the agent implementation name.
    fn name(&self) -> &'static str;

    /// Execute a single invocation to completion.
    ///
    /// An `Err` means the invocation could not be carried out at all
    /// (spawn failure, I/O error); an executor that ran but reported
    /// failure returns `Ok` with `success == false`.
    async fn invoke(&self, request: AgentRequest) -> EngineResult<AgentResult>;
}
