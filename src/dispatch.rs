//! Conversion dispatch: kind → adapter mapping with bounded concurrency
//! and a per-request wall-clock limit.
//!
//! The dispatcher is a pure mapping — it holds no state across calls
//! besides handles to stateless adapters, a semaphore, and the timeout.
//! Its one job beyond routing is the failure boundary: whatever an adapter
//! does (error, panic inside `spawn_blocking`, hang), callers only ever
//! see a typed result.
//!
//! ## Why a semaphore, not a queue
//!
//! Conversions are memory-heavy; running them unbounded exhausts the
//! process under load. `tokio::sync::Semaphore` gives the required cap
//! with queuing for free: requests past the cap await a permit in FIFO
//! order, which is exactly the backpressure the resource model asks for.

use crate::error::{ConversionCause, EngineError};
use crate::request::{Artifact, ConversionKind, ConversionParams, ConversionRequest, InputClass};
use crate::storage::ScratchDir;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Error raised by a converter adapter.
///
/// Adapters fail however their underlying library fails; the dispatcher
/// flattens every failure into [`ConversionCause::Adapter`] at its
/// boundary, so this type stays deliberately thin.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AdapterError(pub String);

impl AdapterError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

impl From<image::ImageError> for AdapterError {
    fn from(e: image::ImageError) -> Self {
        Self(e.to_string())
    }
}

/// A stateless converter for one conversion kind.
///
/// Contract: read the inputs, write outputs into `workdir`, return the
/// output paths in their intended delivery order. Adapters own nothing —
/// the scratch directory (and therefore every output) belongs to the
/// request that called them.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        inputs: &[PathBuf],
        params: &ConversionParams,
        workdir: &Path,
    ) -> Result<Vec<PathBuf>, AdapterError>;
}

/// Routes conversion requests to registered adapters.
pub struct Dispatcher {
    adapters: HashMap<ConversionKind, Arc<dyn Converter>>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Dispatcher {
    /// A dispatcher with no adapters registered.
    ///
    /// `max_concurrent` is the conversion cap; `timeout` the per-request
    /// wall-clock limit.
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            adapters: HashMap::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Register (or replace) the adapter for a kind.
    pub fn register(
        &mut self,
        kind: ConversionKind,
        adapter: Arc<dyn Converter>,
    ) -> &mut Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn has_adapter(&self, kind: ConversionKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Run one conversion request.
    ///
    /// Waits for a concurrency permit (backpressure), then races the
    /// adapter against the configured timeout. On success the output paths
    /// are adopted as artifacts of the request's scratch directory, in the
    /// order the adapter returned them.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
        scratch: &ScratchDir,
    ) -> Result<Vec<Artifact>, EngineError> {
        let kind = request.kind;
        let adapter = match self.adapters.get(&kind) {
            Some(a) => Arc::clone(a),
            None => {
                // Unreachable when the registry covers the session
                // machine's closed kind enum.
                error!(%kind, "no adapter registered for dispatched kind");
                return Err(EngineError::InvariantViolation(format!(
                    "no adapter registered for conversion kind '{kind}'"
                )));
            }
        };

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::InvariantViolation("dispatcher semaphore closed".into()))?;

        debug!(%kind, inputs = request.inputs.len(), "conversion started");
        let started = std::time::Instant::now();

        let outcome = tokio::time::timeout(
            self.timeout,
            adapter.convert(&request.inputs, &request.params, scratch.path()),
        )
        .await;

        let outputs = match outcome {
            Err(_elapsed) => {
                warn!(%kind, secs = self.timeout.as_secs(), "conversion timed out");
                return Err(EngineError::ConversionFailed {
                    kind,
                    cause: ConversionCause::Timeout {
                        secs: self.timeout.as_secs(),
                    },
                });
            }
            Ok(Err(err)) => {
                warn!(%kind, error = %err, "adapter failed");
                return Err(EngineError::ConversionFailed {
                    kind,
                    cause: ConversionCause::Adapter {
                        detail: err.to_string(),
                    },
                });
            }
            Ok(Ok(outputs)) => outputs,
        };

        if outputs.is_empty() {
            warn!(%kind, "adapter returned no outputs");
            return Err(EngineError::ConversionFailed {
                kind,
                cause: ConversionCause::EmptyOutput,
            });
        }

        info!(
            %kind,
            outputs = outputs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "conversion complete"
        );

        Ok(outputs
            .into_iter()
            .map(|p| {
                let class = InputClass::from_extension(&p);
                scratch.adopt(p, class)
            })
            .collect())
    }
}
