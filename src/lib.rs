//! # fileforge
//!
//! Session-driven file conversion orchestration for chat front-ends.
//!
//! ## Why this crate?
//!
//! A conversion bot looks trivial until three users upload fifteen images
//! each while a fourth cancels mid-conversion. The naive rendition — a
//! process-global dict of user state, temp files removed "later", one
//! unbounded task per upload — leaks files, loses page order, and lets a
//! slow converter starve the process. This crate is that bot's core done
//! properly: per-user serialized sessions, scratch directories with
//! guaranteed cleanup, bounded concurrent dispatch with timeouts, and a
//! typed failure taxonomy so every error becomes exactly one user-visible
//! message. The chat platform itself stays outside: the host feeds in
//! classified events and executes the returned directives.
//!
//! ## Pipeline Overview
//!
//! ```text
//! InputEvent (image / document / command / parameter)
//!  │
//!  ├─ 1. Session   per-user mutex, workflow state machine
//!  ├─ 2. Storage   scratch dir per workflow, Drop-guard cleanup
//!  ├─ 3. Dispatch  semaphore-capped converters, per-run timeout
//!  ├─ 4. Deliver   single file direct; multiple files zipped
//!  └─ 5. Directive Notify / NewStatus / UpdateStatus back to the host
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fileforge::{
//!     register_image_adapters, Command, ConversionKind, ConversionParams,
//!     Dispatcher, Engine, EngineConfig, InputEvent,
//! };
//! use std::sync::Arc;
//!
//! # use fileforge::{OutboundTransport, TransportError};
//! # struct MyTransport;
//! # #[async_trait::async_trait]
//! # impl OutboundTransport for MyTransport {
//! #     async fn send_file(
//! #         &self,
//! #         _target: i64,
//! #         _path: &std::path::Path,
//! #         _filename: &str,
//! #         _caption: Option<&str>,
//! #     ) -> Result<(), TransportError> { Ok(()) }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder().build()?;
//!     let mut dispatcher = Dispatcher::new(
//!         config.max_concurrent_conversions,
//!         config.conversion_timeout(),
//!     );
//!     register_image_adapters(&mut dispatcher, config.default_jpeg_quality);
//!
//!     let engine = Engine::new(config, dispatcher, Arc::new(MyTransport))?;
//!
//!     // Feed classified events from the chat update loop:
//!     let directives = engine
//!         .handle_input(
//!             42,
//!             InputEvent::Command(Command::Start {
//!                 kind: ConversionKind::Grayscale,
//!                 params: ConversionParams::None,
//!             }),
//!         )
//!         .await;
//!     for d in directives {
//!         // Render each directive through the platform API.
//!         println!("{d:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## What the host owns
//!
//! The core is platform-agnostic by construction. The host supplies:
//!
//! - event classification (which updates are images, documents, commands,
//!   parameter text) and the file downloads themselves;
//! - an [`OutboundTransport`] implementation for sending result files;
//! - rendering of [`Notice`] values into localized user-facing text;
//! - converter registration for kinds the built-in image adapters do not
//!   cover, typically [`ExternalToolAdapter`] around a document suite.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod adapters;
pub mod config;
pub mod deliver;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod request;
pub mod session;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use adapters::{
    register_image_adapters, CompressAdapter, ExternalToolAdapter, FormatAdapter,
    GrayscaleAdapter, ResizeAdapter,
};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use deliver::{OutboundTransport, TransportError, BUNDLE_FILE_NAME};
pub use dispatch::{AdapterError, Converter, Dispatcher};
pub use engine::{Command, Directive, Engine, InputEvent, Notice};
pub use error::{ConversionCause, EngineError};
pub use request::{Artifact, ConversionKind, ConversionParams, ConversionRequest, InputClass};
pub use session::{SessionStore, StatusHandle, WorkflowState};
