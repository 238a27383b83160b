//! LLM calling abstraction.
//!
//! The [`LlmCaller`] trait decouples the retry engine from provider clients
//! (HTTP APIs, CLI proxies). Tests use scripted callers that return
//! predetermined responses without any network access.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::types::{LlmRequest, LlmResponse};

/// Failure of a single LLM invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("call cancelled")]
    Cancelled,
    /// A nested validated call ended without an accepted response.
    #[error("nested call was not accepted: {0}")]
    Rejected(String),
    /// A nested validated call was refused by the recursion guard.
    #[error("recursion limit reached at depth {depth}")]
    RecursionLimit { depth: u32 },
}

/// Per-invocation context threaded explicitly through every call.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Number of validator-triggered calls above this one (0 for a top-level run).
    pub depth: u32,
    /// Deadline applied by the engine; informational for implementations.
    pub timeout: Option<Duration>,
    /// Fires when the owning run is cancelled.
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn root() -> Self {
        Self {
            depth: 0,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Abstraction over LLM completion backends.
#[async_trait]
pub trait LlmCaller: Send + Sync {
    async fn call(
        &self,
        request: LlmRequest,
        ctx: &CallContext,
    ) -> Result<LlmResponse, TransportError>;
}

/// Invoke `caller` with an optional timeout, racing the context's cancellation.
///
/// A timeout maps to [`TransportError::Timeout`]; cancellation maps to
/// [`TransportError::Cancelled`].
pub async fn call_with_limits(
    caller: &dyn LlmCaller,
    request: LlmRequest,
    ctx: &CallContext,
) -> Result<LlmResponse, TransportError> {
    let call = async {
        match ctx.timeout.filter(|t| !t.is_zero()) {
            Some(limit) => match tokio::time::timeout(limit, caller.call(request, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(limit)),
            },
            None => caller.call(request, ctx).await,
        }
    };

    tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => Err(TransportError::Cancelled),
        result = call => result,
    }
}
