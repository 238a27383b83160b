//! Test-only callers, checks, and request builders.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::caller::{CallContext, LlmCaller, TransportError};
use crate::core::types::{LlmRequest, LlmResponse, Message};
use crate::core::validation::{ErrorDetail, ValidationResult};
use crate::validators::DeterministicCheck;

/// Single-turn request with one user message.
pub fn question(text: &str) -> LlmRequest {
    LlmRequest::new(vec![Message::user(text)])
}

/// Caller that replays a fixed script and records every request it receives.
///
/// Once the script runs out, further calls fail with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedCaller {
    script: Mutex<VecDeque<Result<LlmResponse, TransportError>>>,
    seen: Mutex<Vec<(LlmRequest, CallContext)>>,
    delay: Option<Duration>,
}

impl ScriptedCaller {
    pub fn new(script: impl IntoIterator<Item = Result<LlmResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Script of successful responses.
    pub fn responses<I, S>(contents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(contents.into_iter().map(|c| Ok(LlmResponse::new(c))))
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    /// `CallContext::depth` of every call, in order.
    pub fn depths(&self) -> Vec<u32> {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .map(|(_, ctx)| ctx.depth)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().expect("seen lock").len()
    }
}

#[async_trait]
impl LlmCaller for ScriptedCaller {
    async fn call(
        &self,
        request: LlmRequest,
        ctx: &CallContext,
    ) -> Result<LlmResponse, TransportError> {
        self.seen
            .lock()
            .expect("seen lock")
            .push((request, ctx.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Transport("script exhausted".to_string())))
    }
}

/// Deterministic check that counts its invocations. Clones share the counter.
#[derive(Debug, Clone)]
pub struct CountingCheck {
    name: String,
    calls: Arc<AtomicUsize>,
    fail_kind: Option<String>,
}

impl CountingCheck {
    pub fn passing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_kind: None,
        }
    }

    pub fn failing(name: &str, kind: &str) -> Self {
        Self {
            fail_kind: Some(kind.to_string()),
            ..Self::passing(name)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeterministicCheck for CountingCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, _response: &LlmResponse) -> ValidationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_kind {
            None => ValidationResult::pass(),
            Some(kind) => ValidationResult::fail(ErrorDetail::new(
                kind.clone(),
                format!("{} rejected the response", self.name),
            )),
        }
    }
}

/// Check that rejects every response with a fixed message and suggestion.
#[derive(Debug, Clone)]
pub struct AlwaysFail {
    name: String,
}

impl AlwaysFail {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl DeterministicCheck for AlwaysFail {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, _response: &LlmResponse) -> ValidationResult {
        ValidationResult::fail(ErrorDetail::new("rejected", "answer is not acceptable"))
            .with_suggestion("Double-check the facts before answering.")
    }
}
