//! Per-user conversion sessions: workflow state, accumulated inputs, and
//! the concurrent session store.
//!
//! ## State machine
//!
//! ```text
//! Idle ──start(kind)──▶ CollectingImages          (images_to_pdf)
//!      └─start(kind)──▶ AwaitingSingleDocument    (all other kinds)
//!
//! CollectingImages ──image──▶ CollectingImages    (append, counter++)
//! CollectingImages ──done───▶ Idle                (trigger if non-empty)
//! AwaitingSingleDocument ──matching upload──▶ Idle | AwaitingParameter
//! AwaitingParameter ──valid text──▶ Idle          (trigger)
//! any ──cancel──▶ Idle                            (discard, no trigger)
//! ```
//!
//! Non-matching inputs never mutate state; they only produce a re-prompt.
//!
//! ## Why a store of per-user mutexes
//!
//! Inbound events are independent tasks, but a user's events must apply in
//! arrival order — two images in quick succession must both land in the
//! input list. The store hands out one `Arc<tokio::Mutex<Session>>` per
//! user; locking it serializes that user without ordering anyone else.
//! This replaces the ad-hoc process-global dictionary the pattern usually
//! degenerates into.

use crate::request::{Artifact, ConversionKind, ConversionParams, ConversionRequest};
use crate::storage::ScratchDir;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Opaque reference to the platform message used for in-place progress
/// updates. The transport assigns it; the core only stores and echoes it.
pub type StatusHandle = i64;

/// Which multi-step workflow, if any, a session is currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    /// No workflow active.
    Idle,
    /// Accumulating images until an explicit done command.
    CollectingImages,
    /// Waiting for exactly one document matching the kind's input class.
    /// `params` are kind parameters fixed at workflow start (e.g. a target
    /// format chosen from a keyboard).
    AwaitingSingleDocument {
        kind: ConversionKind,
        params: ConversionParams,
    },
    /// Upload received; waiting for the kind's free-text parameter.
    AwaitingParameter {
        kind: ConversionKind,
        partial: ConversionRequest,
    },
}

impl WorkflowState {
    pub fn is_idle(&self) -> bool {
        matches!(self, WorkflowState::Idle)
    }

    /// The kind this state will eventually dispatch, if any.
    pub fn kind(&self) -> Option<ConversionKind> {
        match self {
            WorkflowState::Idle => None,
            WorkflowState::CollectingImages => Some(ConversionKind::ImagesToPdf),
            WorkflowState::AwaitingSingleDocument { kind, .. } => Some(*kind),
            WorkflowState::AwaitingParameter { kind, .. } => Some(*kind),
        }
    }
}

/// One user's transient conversion session.
///
/// The session exclusively owns its scratch directory (via the guard) and
/// the ordered input list. Input order is arrival order and is the only
/// ordering source for multi-page assembly.
#[derive(Debug)]
pub struct Session {
    pub user_id: i64,
    token: String,
    pub state: WorkflowState,
    inputs: Vec<Artifact>,
    scratch: Option<ScratchDir>,
    pub status: Option<StatusHandle>,
    last_activity: Instant,
}

impl Session {
    fn idle(user_id: i64) -> Self {
        Self {
            user_id,
            token: String::new(),
            state: WorkflowState::Idle,
            inputs: Vec::new(),
            scratch: None,
            status: None,
            last_activity: Instant::now(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Generate the token for a workflow about to start.
    ///
    /// Minted before [`Session::begin`] so the scratch directory can be
    /// allocated under the `{user_id}_{token}` name first.
    pub fn mint_token() -> String {
        Uuid::new_v4().to_string()
    }

    /// Start a new workflow, replacing whatever was active.
    ///
    /// `token` is the token the scratch directory was allocated under.
    /// Returns the predecessor session's scratch guard (if any) so the
    /// caller can drop it explicitly — an overwriting start must still
    /// sweep the prior directory or orphaned files accumulate.
    pub fn begin(
        &mut self,
        token: String,
        state: WorkflowState,
        scratch: ScratchDir,
    ) -> Option<ScratchDir> {
        let prior = self.scratch.take();
        self.token = token;
        self.state = state;
        self.inputs.clear();
        self.status = None;
        self.touch();
        self.scratch = Some(scratch);
        prior
    }

    pub fn scratch(&self) -> Option<&ScratchDir> {
        self.scratch.as_ref()
    }

    /// Append an accepted input. Caller holds the session lock, so the
    /// count is the visible counter value after this arrival.
    pub fn push_input(&mut self, artifact: Artifact) -> usize {
        self.inputs.push(artifact);
        self.touch();
        self.inputs.len()
    }

    /// Tear the workflow down without triggering a conversion.
    ///
    /// Returns the scratch guard for explicit drop at the call site.
    pub fn clear(&mut self) -> Option<ScratchDir> {
        self.token.clear();
        self.state = WorkflowState::Idle;
        self.inputs.clear();
        self.status = None;
        self.touch();
        self.scratch.take()
    }

    /// Complete the workflow: reset to Idle and hand the accumulated
    /// inputs plus the scratch guard to the conversion request.
    ///
    /// State is cleared *before* the conversion runs, so a cancel arriving
    /// mid-conversion sees Idle and the in-flight work owns its own
    /// cleanup via the returned guard.
    pub fn take_for_request(&mut self) -> (Vec<Artifact>, Option<ScratchDir>) {
        let inputs = std::mem::take(&mut self.inputs);
        let scratch = self.scratch.take();
        self.token.clear();
        self.state = WorkflowState::Idle;
        self.status = None;
        self.touch();
        (inputs, scratch)
    }
}

/// Concurrent map of user id → session, the engine's only shared state.
#[derive(Default)]
pub struct SessionStore {
    inner: DashMap<i64, Arc<Mutex<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-user session handle, created Idle on first touch.
    ///
    /// Callers lock the returned mutex for the duration of one inbound
    /// event; that lock is the per-user ordering guarantee.
    pub fn get_or_create(&self, user_id: i64) -> Arc<Mutex<Session>> {
        self.inner
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(Session::idle(user_id))))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Evict sessions that are Idle and inactive longer than `max_idle`.
    ///
    /// Active workflows are never evicted here; their lifecycle belongs to
    /// the state machine. Returns the number of entries removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut removed = 0;
        self.inner.retain(|_, slot| {
            // try_lock: a locked session is in use, keep it.
            match slot.try_lock() {
                Ok(sess) if sess.state.is_idle() && sess.idle_for() > max_idle => {
                    removed += 1;
                    false
                }
                _ => true,
            }
        });
        removed
    }
}
