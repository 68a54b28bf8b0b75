//! The router-facing orchestrator.
//!
//! [`Engine::handle_input`] is the single entry point the inbound router
//! calls for every classified event. One call does one of three things:
//!
//! 1. mutates the user's session per the workflow state machine and
//!    returns UI directives (prompts, counters, rejections);
//! 2. completes a workflow: clears the session, runs the conversion
//!    through the dispatcher, delivers the result, and returns the
//!    terminal directive — with the scratch guard held across every one
//!    of those steps so cleanup happens on any exit;
//! 3. maps an internal failure to exactly one user-visible notice.
//!
//! It never returns an error to the router: every failure is logged via
//! `tracing`, the session is forced back to `Idle` for the
//! non-recoverable ones, and the user always gets one message.
//!
//! ## Ordering and blocking
//!
//! The user's session mutex is held only while the state machine reads
//! and mutates the session; that is what serializes one user's events in
//! arrival order. When a workflow completes, the session is reset to
//! `Idle` and the request (with its scratch guard) is handed out of the
//! locked section, so dispatch and delivery run unlocked: the
//! dispatcher's semaphore caps global parallelism, and the user's next
//! event — a cancel in particular — is handled immediately instead of
//! queueing behind the conversion. A cancel during an in-flight
//! conversion therefore finds `Idle` and cancels nothing; in-flight work
//! is never force-killed and its outputs are cleaned by its own guard.

use crate::config::EngineConfig;
use crate::deliver::{self, OutboundTransport};
use crate::dispatch::Dispatcher;
use crate::error::EngineError;
use crate::request::{
    Artifact, ConversionKind, ConversionParams, ConversionRequest, InputClass,
};
use crate::session::{Session, SessionStore, StatusHandle, WorkflowState};
use crate::storage::{ScratchDir, ScratchStore};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// `800x600`-style dimension parameter. Bounded at 5 digits so a typo
/// cannot request a multi-gigapixel resize.
static DIMENSIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,5})\s*[xX×]\s*(\d{1,5})\s*$").expect("valid regex"));

pub const DIMENSIONS_EXAMPLE: &str = "800x600";

/// An explicit user command, classified by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Select a conversion path. `params` carries kind parameters fixed
    /// at selection time (target format for `format_convert`, preset
    /// dimensions for `resize`); most kinds pass
    /// [`ConversionParams::None`].
    Start {
        kind: ConversionKind,
        params: ConversionParams,
    },
    /// Finish the collecting-images workflow.
    Done,
    /// Abandon whatever is active.
    Cancel,
}

/// One classified inbound event for one user.
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// A photo/image upload, already downloaded by the router.
    Image { name: String, bytes: Vec<u8> },
    /// A document upload with its declared MIME type.
    Document {
        name: String,
        mime: String,
        bytes: Vec<u8>,
    },
    /// An explicit command.
    Command(Command),
    /// Free text while a parameter is awaited.
    Parameter(String),
}

/// Semantic message the host localizes and renders. The core never
/// produces user-facing strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// Workflow started; send one document of this class.
    AwaitingDocument { expected: InputClass },
    /// Collecting workflow started; send images, finish with done.
    Collecting,
    /// An image was accepted; running counter for the progress message.
    ImageAdded { count: usize },
    /// Non-image received while collecting; nothing changed.
    RejectedNotImage,
    /// Upload does not match the awaited document class.
    RejectedWrongFormat { expected: InputClass },
    /// The collection is at its configured limit.
    CollectionFull { limit: usize },
    /// Done with nothing collected.
    NothingCollected,
    /// Upload accepted; now send dimensions like [`DIMENSIONS_EXAMPLE`].
    AskDimensions,
    /// Dimension text did not parse; show the example again.
    InvalidDimensions,
    /// File exceeds the configured limit.
    FileTooLarge { limit: u64 },
    /// Result delivered.
    Completed,
    ConversionFailed,
    DeliveryFailed,
    StorageFailed,
    /// Workflow abandoned on user request.
    Cancelled,
    /// Event needs an active workflow and there is none.
    NoActiveWorkflow,
    /// Invariant violation; request failed safe.
    InternalError,
}

/// What the router should do with the user interface.
///
/// Status directives implement the edit-in-place progress pattern: the
/// router executes `NewStatus` by posting a message and reports the
/// platform id back via [`Engine::record_status_handle`]; later events
/// then produce `UpdateStatus` against that id. Execution must be
/// idempotent on the router side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Send a plain message.
    Notify(Notice),
    /// Post a new status message.
    NewStatus(Notice),
    /// Edit an existing status message in place.
    UpdateStatus(StatusHandle, Notice),
}

/// What an applied event resolved to while the session lock was held.
///
/// A completed workflow's conversion is handed back instead of awaited
/// in place so the per-user lock is released first; holding it through a
/// conversion would queue the user's next event, cancel included, behind
/// the conversion for up to the configured timeout.
enum Step {
    Reply(Vec<Directive>),
    Convert {
        status: Option<StatusHandle>,
        request: ConversionRequest,
        scratch: ScratchDir,
    },
}

/// The orchestration core: session store, scratch storage, dispatcher,
/// and outbound transport wired together.
pub struct Engine {
    config: EngineConfig,
    storage: ScratchStore,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn OutboundTransport>,
    sessions: SessionStore,
}

impl Engine {
    /// Build an engine. Creates the scratch root if absent.
    pub fn new(
        config: EngineConfig,
        dispatcher: Dispatcher,
        transport: Arc<dyn OutboundTransport>,
    ) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.scratch_root).map_err(|source| {
            EngineError::StorageFault {
                path: config.scratch_root.clone(),
                source,
            }
        })?;
        let storage = ScratchStore::new(&config.scratch_root);
        Ok(Self {
            config,
            storage,
            dispatcher: Arc::new(dispatcher),
            transport,
            sessions: SessionStore::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle one classified inbound event for one user.
    ///
    /// Chat target and user id are the same value here — the orchestration
    /// core serves private chats, where the platform uses one id for both.
    pub async fn handle_input(&self, user_id: i64, event: InputEvent) -> Vec<Directive> {
        let slot = self.sessions.get_or_create(user_id);
        let step = {
            let mut session = slot.lock().await;
            match self.apply(&mut session, user_id, event).await {
                Ok(step) => step,
                Err(err) => return self.fail(&mut session, user_id, err),
            }
        };

        // The session lock is released here; the conversion below must
        // not block this user's next event.
        match step {
            Step::Reply(directives) => directives,
            Step::Convert {
                status,
                request,
                scratch,
            } => self.run_and_deliver(user_id, status, request, scratch).await,
        }
    }

    /// Record the platform message id the router created for the last
    /// `NewStatus` directive, enabling in-place updates afterwards.
    ///
    /// Also the hook for a host-posted progress message: post
    /// "processing…" on an upload, record its id, then feed the event —
    /// the terminal directive comes back as an `UpdateStatus` against it.
    pub async fn record_status_handle(&self, user_id: i64, handle: StatusHandle) {
        let slot = self.sessions.get_or_create(user_id);
        let mut session = slot.lock().await;
        session.status = Some(handle);
    }

    /// Current workflow state for a user (Idle if no session exists).
    pub async fn workflow_state(&self, user_id: i64) -> WorkflowState {
        let slot = self.sessions.get_or_create(user_id);
        let session = slot.lock().await;
        session.state.clone()
    }

    /// Evict sessions idle longer than `max_idle`; returns evicted count.
    pub fn sweep_idle_sessions(&self, max_idle: Duration) -> usize {
        self.sessions.sweep_idle(max_idle)
    }

    // ── Event application ─────────────────────────────────────────────────

    async fn apply(
        &self,
        session: &mut Session,
        user_id: i64,
        event: InputEvent,
    ) -> Result<Step, EngineError> {
        match event {
            InputEvent::Command(cmd) => self.apply_command(session, user_id, cmd).await,
            InputEvent::Image { name, bytes } => {
                self.apply_file(session, user_id, name, InputClass::Image, bytes)
                    .await
            }
            InputEvent::Document { name, mime, bytes } => {
                let class = InputClass::from_mime(&mime);
                self.apply_file(session, user_id, name, class, bytes).await
            }
            InputEvent::Parameter(text) => self.apply_parameter(session, user_id, text).await,
        }
    }

    async fn apply_command(
        &self,
        session: &mut Session,
        user_id: i64,
        cmd: Command,
    ) -> Result<Step, EngineError> {
        match cmd {
            Command::Start { kind, params } => {
                let token = Session::mint_token();
                let scratch = self.storage.allocate(user_id, &token)?;
                let (state, notice) = if kind.is_collecting() {
                    (WorkflowState::CollectingImages, Notice::Collecting)
                } else {
                    (
                        WorkflowState::AwaitingSingleDocument { kind, params },
                        Notice::AwaitingDocument {
                            expected: kind.expected_input(),
                        },
                    )
                };
                if !session.state.is_idle() {
                    debug!(user_id, "workflow start overwrites active session");
                }
                let prior = session.begin(token, state, scratch);
                // The overwritten session's directory must still be swept.
                drop(prior);
                info!(user_id, %kind, "workflow started");
                Ok(Step::Reply(vec![Directive::Notify(notice)]))
            }
            Command::Cancel => {
                let had_workflow = !session.state.is_idle();
                let guard = session.clear();
                drop(guard);
                if had_workflow {
                    info!(user_id, "workflow cancelled");
                }
                Ok(Step::Reply(vec![Directive::Notify(Notice::Cancelled)]))
            }
            Command::Done => match session.state {
                WorkflowState::CollectingImages => {
                    if session.input_count() == 0 {
                        let guard = session.clear();
                        drop(guard);
                        return Ok(Step::Reply(vec![Directive::Notify(
                            Notice::NothingCollected,
                        )]));
                    }
                    let status = session.status;
                    let (inputs, scratch) = session.take_for_request();
                    let scratch = scratch.ok_or_else(|| {
                        EngineError::InvariantViolation(
                            "collecting workflow without scratch directory".into(),
                        )
                    })?;
                    let request = ConversionRequest::new(
                        ConversionKind::ImagesToPdf,
                        inputs.iter().map(|a| a.path.clone()).collect(),
                    );
                    Ok(Step::Convert {
                        status,
                        request,
                        scratch,
                    })
                }
                _ => Ok(Step::Reply(vec![Directive::Notify(Notice::NoActiveWorkflow)])),
            },
        }
    }

    async fn apply_file(
        &self,
        session: &mut Session,
        user_id: i64,
        name: String,
        class: InputClass,
        bytes: Vec<u8>,
    ) -> Result<Step, EngineError> {
        match session.state.clone() {
            WorkflowState::CollectingImages => {
                if class != InputClass::Image {
                    debug!(user_id, got = %class, "non-image during collection");
                    return Ok(Step::Reply(vec![Directive::Notify(
                        Notice::RejectedNotImage,
                    )]));
                }
                self.check_size(&name, &bytes)?;
                if session.input_count() >= self.config.max_collected_images {
                    return Ok(Step::Reply(vec![Directive::Notify(
                        Notice::CollectionFull {
                            limit: self.config.max_collected_images,
                        },
                    )]));
                }
                let artifact = self.store_input(session, &name, class, &bytes).await?;
                let count = session.push_input(artifact);
                debug!(user_id, count, "image collected");
                let notice = Notice::ImageAdded { count };
                Ok(Step::Reply(vec![match session.status {
                    Some(handle) => Directive::UpdateStatus(handle, notice),
                    None => Directive::NewStatus(notice),
                }]))
            }
            WorkflowState::AwaitingSingleDocument { kind, params } => {
                let expected = kind.expected_input();
                if class != expected {
                    return Err(EngineError::InputRejected {
                        expected,
                        got: class,
                    });
                }
                self.check_size(&name, &bytes)?;
                let artifact = self.store_input(session, &name, class, &bytes).await?;

                if kind.needs_parameter() {
                    let partial = ConversionRequest::new(kind, vec![artifact.path.clone()])
                        .with_params(params);
                    session.push_input(artifact);
                    session.state = WorkflowState::AwaitingParameter { kind, partial };
                    return Ok(Step::Reply(vec![Directive::Notify(Notice::AskDimensions)]));
                }

                let status = session.status;
                let (_, scratch) = session.take_for_request();
                let scratch = scratch.ok_or_else(|| {
                    EngineError::InvariantViolation(
                        "document workflow without scratch directory".into(),
                    )
                })?;
                let request =
                    ConversionRequest::new(kind, vec![artifact.path.clone()]).with_params(params);
                Ok(Step::Convert {
                    status,
                    request,
                    scratch,
                })
            }
            WorkflowState::AwaitingParameter { .. } => {
                // Only the parameter text advances this state; repeat the ask.
                debug!(user_id, got = %class, "file during parameter wait");
                Ok(Step::Reply(vec![Directive::Notify(Notice::AskDimensions)]))
            }
            WorkflowState::Idle => Ok(Step::Reply(vec![Directive::Notify(
                Notice::NoActiveWorkflow,
            )])),
        }
    }

    async fn apply_parameter(
        &self,
        session: &mut Session,
        user_id: i64,
        text: String,
    ) -> Result<Step, EngineError> {
        let (kind, partial) = match &session.state {
            WorkflowState::AwaitingParameter { kind, partial } => (*kind, partial.clone()),
            _ => {
                return Ok(Step::Reply(vec![Directive::Notify(
                    Notice::NoActiveWorkflow,
                )]))
            }
        };

        let (width, height) = parse_dimensions(&text).ok_or(EngineError::ParameterInvalid {
            text,
            example: DIMENSIONS_EXAMPLE.to_string(),
        })?;

        let status = session.status;
        let (_, scratch) = session.take_for_request();
        let scratch = scratch.ok_or_else(|| {
            EngineError::InvariantViolation("parameter workflow without scratch directory".into())
        })?;
        let request = partial.with_params(ConversionParams::Dimensions { width, height });
        debug!(user_id, %kind, width, height, "parameter accepted");
        Ok(Step::Convert {
            status,
            request,
            scratch,
        })
    }

    // ── Conversion + delivery ─────────────────────────────────────────────

    /// Run one conversion request and deliver its outputs.
    ///
    /// Session state is already `Idle` when this is called; `scratch` is
    /// the request's exclusively-owned directory and is dropped — thus
    /// removed — on every path out of this function.
    async fn run_and_deliver(
        &self,
        user_id: i64,
        status: Option<StatusHandle>,
        request: ConversionRequest,
        scratch: ScratchDir,
    ) -> Vec<Directive> {
        let kind = request.kind;
        let outcome = async {
            let outputs = self.dispatcher.convert(&request, &scratch).await?;
            deliver::deliver(self.transport.as_ref(), user_id, &outputs, &scratch, None).await
        }
        .await;
        drop(scratch);

        let notice = match outcome {
            Ok(()) => {
                info!(user_id, %kind, "result delivered");
                Notice::Completed
            }
            Err(err) => {
                warn!(user_id, %kind, error = %err, "conversion pipeline failed");
                notice_for(&err)
            }
        };
        vec![terminal(status, notice)]
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    fn check_size(&self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        let limit = self.config.max_file_size_bytes;
        if bytes.len() as u64 > limit {
            return Err(EngineError::FileTooLarge {
                name: name.to_string(),
                size: bytes.len() as u64,
                limit,
            });
        }
        Ok(())
    }

    async fn store_input(
        &self,
        session: &Session,
        name: &str,
        class: InputClass,
        bytes: &[u8],
    ) -> Result<Artifact, EngineError> {
        let scratch = session.scratch().ok_or_else(|| {
            EngineError::InvariantViolation("active workflow without scratch directory".into())
        })?;
        scratch.write_artifact(name, bytes, class).await
    }

    /// Map a failure to its single user-visible directive, forcing the
    /// session back to `Idle` unless the failure is recoverable.
    fn fail(&self, session: &mut Session, user_id: i64, err: EngineError) -> Vec<Directive> {
        if err.is_recoverable() {
            debug!(user_id, error = %err, "input rejected");
            return vec![Directive::Notify(notice_for(&err))];
        }

        match &err {
            EngineError::InvariantViolation(detail) => {
                error!(user_id, %detail, "invariant violation");
            }
            _ => warn!(user_id, error = %err, "request failed"),
        }
        let guard = session.clear();
        drop(guard);
        vec![Directive::Notify(notice_for(&err))]
    }
}

fn terminal(status: Option<StatusHandle>, notice: Notice) -> Directive {
    match status {
        Some(handle) => Directive::UpdateStatus(handle, notice),
        None => Directive::Notify(notice),
    }
}

fn notice_for(err: &EngineError) -> Notice {
    match err {
        EngineError::InputRejected { expected, .. } => Notice::RejectedWrongFormat {
            expected: *expected,
        },
        EngineError::FileTooLarge { limit, .. } => Notice::FileTooLarge { limit: *limit },
        EngineError::ParameterInvalid { .. } => Notice::InvalidDimensions,
        EngineError::ConversionFailed { .. } => Notice::ConversionFailed,
        EngineError::DeliveryFailed { .. } => Notice::DeliveryFailed,
        EngineError::StorageFault { .. } => Notice::StorageFailed,
        EngineError::InvalidConfig(_) | EngineError::InvariantViolation(_) => {
            Notice::InternalError
        }
    }
}

/// Parse `WIDTHxHEIGHT`, rejecting zero dimensions.
fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let caps = DIMENSIONS_RE.captures(text)?;
    let width: u32 = caps[1].parse().ok()?;
    let height: u32 = caps[2].parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_grammar() {
        assert_eq!(parse_dimensions("800x600"), Some((800, 600)));
        assert_eq!(parse_dimensions(" 1024 X 768 "), Some((1024, 768)));
        assert_eq!(parse_dimensions("1920×1080"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("0x600"), None);
        assert_eq!(parse_dimensions("800"), None);
        assert_eq!(parse_dimensions("800x600x200"), None);
        assert_eq!(parse_dimensions("huge"), None);
        assert_eq!(parse_dimensions("123456x100"), None);
    }

    #[test]
    fn terminal_prefers_status_handle() {
        assert_eq!(
            terminal(Some(9), Notice::Completed),
            Directive::UpdateStatus(9, Notice::Completed)
        );
        assert_eq!(
            terminal(None, Notice::Completed),
            Directive::Notify(Notice::Completed)
        );
    }

    #[test]
    fn every_error_maps_to_one_notice() {
        let errs = [
            EngineError::InputRejected {
                expected: InputClass::Pdf,
                got: InputClass::Image,
            },
            EngineError::FileTooLarge {
                name: "x".into(),
                size: 2,
                limit: 1,
            },
            EngineError::ParameterInvalid {
                text: "x".into(),
                example: DIMENSIONS_EXAMPLE.into(),
            },
            EngineError::ConversionFailed {
                kind: ConversionKind::Resize,
                cause: crate::error::ConversionCause::EmptyOutput,
            },
            EngineError::DeliveryFailed {
                target: 1,
                reason: "nope".into(),
            },
            EngineError::StorageFault {
                path: "/x".into(),
                source: std::io::Error::other("io"),
            },
            EngineError::InvariantViolation("bad".into()),
        ];
        for err in errs {
            // Just the total mapping; the variant pairing is checked by
            // the integration tests.
            let _ = notice_for(&err);
        }
    }
}
