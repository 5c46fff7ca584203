//! Provider invocation seam
//!
//! Transports live outside this crate. The orchestrator consumes exactly
//! one capability from them: `invoke`. Each adapter is a value implementing
//! [`ProviderInvoker`]; provider identity stays the closed [`Provider`]
//! enumeration.

use crate::types::{ErrorKind, Provider, ToolCall, ToolDescriptor};
use async_trait::async_trait;
use std::time::Duration;

/// What a transport returns on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    /// Total tokens, when the provider reports them.
    pub tokens_used: Option<u32>,
}

impl ProviderReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            tokens_used: None,
        }
    }
}

/// Transport-level failure, already classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("provider did not answer within the deadline")]
    Timeout,

    #[error("provider quota exhausted")]
    QuotaExceeded,

    #[error("provider service unavailable")]
    ServiceUnavailable,

    #[error("provider refused authorization")]
    AuthorizationRefused,

    #[error("provider transport error: {0}")]
    Other(String),
}

impl InvokeError {
    /// Map onto the orchestrator's closed error-kind set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvokeError::Timeout => ErrorKind::ProviderTimeout,
            InvokeError::QuotaExceeded => ErrorKind::ProviderQuotaExceeded,
            InvokeError::ServiceUnavailable | InvokeError::Other(_) => {
                ErrorKind::ProviderServiceUnavailable
            }
            InvokeError::AuthorizationRefused => ErrorKind::AuthorizationRefused,
        }
    }
}

/// The one capability the orchestrator consumes from provider transports.
#[async_trait]
pub trait ProviderInvoker: Send + Sync {
    /// Run one inference call. The deadline is advisory for transports that
    /// can push it down to the wire; the engine enforces it regardless.
    async fn invoke(
        &self,
        provider: Provider,
        model_id: &str,
        prompt: &str,
        tools: &[ToolDescriptor],
        deadline: Duration,
    ) -> Result<ProviderReply, InvokeError>;
}

/// Optional external key-value persistence for snapshots and mirrors.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), String>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, String>;
}

/// In-memory snapshot store, for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: dashmap::DashMap<String, Vec<u8>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), String> {
        self.entries.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        Ok(self.entries.get(key).map(|e| e.clone()))
    }
}

/// Invoker that answers every call with a canned per-provider reply.
/// Useful for wiring tests and local smoke runs.
#[derive(Debug, Default)]
pub struct EchoInvoker;

#[async_trait]
impl ProviderInvoker for EchoInvoker {
    async fn invoke(
        &self,
        provider: Provider,
        model_id: &str,
        prompt: &str,
        _tools: &[ToolDescriptor],
        _deadline: Duration,
    ) -> Result<ProviderReply, InvokeError> {
        let prompt_head: String = prompt.chars().take(48).collect();
        Ok(ProviderReply {
            text: format!("[{}/{}] {}", provider, model_id, prompt_head),
            tool_calls: Vec::new(),
            tokens_used: Some((prompt.len() / 4) as u32),
        })
    }
}
