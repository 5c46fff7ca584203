//! Shared helpers for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use conductor::provider::{InvokeError, ProviderInvoker, ProviderReply};
use conductor::types::{Provider, ToolDescriptor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Per-provider behavior for the scripted invoker.
#[derive(Debug, Clone)]
pub enum Script {
    /// Always succeed with this text.
    Ok(String),
    /// Always fail with this error.
    Fail(InvokeError),
    /// Fail with this error on every nth call (1-based), succeed otherwise.
    FailEveryNth(u64, InvokeError),
    /// Succeed with this text after sleeping.
    Slow(Duration, String),
}

/// Invoker whose behavior is scripted per provider, with call counting.
pub struct ScriptedInvoker {
    scripts: Mutex<HashMap<Provider, Script>>,
    calls: AtomicU64,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_script(self, provider: Provider, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(provider, script);
        self
    }

    pub fn all_fail(error: InvokeError) -> Self {
        let invoker = Self::new();
        for provider in Provider::ALL {
            invoker
                .scripts
                .lock()
                .unwrap()
                .insert(provider, Script::Fail(error.clone()));
        }
        invoker
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        provider: Provider,
        model_id: &str,
        prompt: &str,
        _tools: &[ToolDescriptor],
        _deadline: Duration,
    ) -> Result<ProviderReply, InvokeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let script = self.scripts.lock().unwrap().get(&provider).cloned();
        match script {
            Some(Script::Ok(text)) => Ok(ProviderReply::text(text)),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(ProviderReply::text(text))
            }
            Some(Script::FailEveryNth(n, error)) if call % n == 0 => Err(error),
            Some(Script::FailEveryNth(..)) | None => Ok(ProviderReply::text(format!(
                "{}/{} answered: {}",
                provider,
                model_id,
                prompt.chars().take(32).collect::<String>()
            ))),
        }
    }
}
