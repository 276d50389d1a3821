use async_trait::async_trait;
use conductor_core::{Artifact, ConductorResult};
use conductor_registry::AgentDescriptor;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One outbound invocation of a target agent.
pub struct StepCall {
    /// The step being executed.
    pub step_id: Uuid,
    /// Conversation context the call belongs to.
    pub context_id: String,
    /// Goal text for the agent.
    pub text: String,
    /// Upstream artifacts mapped into this call.
    pub inputs: Vec<Artifact>,
    /// Channel the agent may push intermediate progress through before
    /// returning its final reply. Dropped when the call ends.
    pub progress: mpsc::Sender<String>,
}

/// Final reply from a target agent.
#[derive(Debug, Clone)]
pub enum AgentReply {
    /// The agent produced its output fragment.
    Artifact {
        /// Optional agent-chosen fragment name; the step name is used
        /// when absent.
        name: Option<String>,
        /// Fragment content.
        content: String,
    },
    /// The agent needs more input from the caller before it can finish.
    InputRequired {
        /// What the agent is asking for.
        prompt: String,
    },
}

/// Port for the outbound message-send surface.
///
/// The wire encoding is out of scope for this core; production
/// implementations adapt whatever agent protocol the deployment speaks.
/// Implementations must tolerate long-running agents — the coordinator
/// enforces the per-call deadline, not the client.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Send a step call to the target agent and await its final reply.
    /// Intermediate progress goes through `call.progress`.
    async fn invoke(
        &self,
        descriptor: &AgentDescriptor,
        call: StepCall,
    ) -> ConductorResult<AgentReply>;
}
