//! XR session orchestration.
//!
//! Drives an XR runtime through capability negotiation, session lifecycle,
//! action input, swapchain cycling and the per-frame render loop. The runtime
//! and the graphics backend are reached only through the [`XrRuntime`] and
//! [`GraphicsBackend`] traits.

#![forbid(unsafe_code)]

pub mod actions;
pub mod app;
pub mod config;
pub mod frame;
pub mod graphics;
pub mod mock;
pub mod negotiator;
pub mod profiles;
pub mod runtime;
pub mod session;
pub mod spaces;
pub mod swapchain;
pub mod types;

pub use actions::{ActionId, ActionPose, ActionRegistry, ActionSample, ActionStateSnapshot};
pub use app::XrApplication;
pub use config::XrConfig;
pub use frame::{FrameLoop, FrameOutcome, FrameStager, RenderProducer};
pub use graphics::{ContextShim, GraphicsApi, GraphicsBackend, PixelLayout, StagedFrame};
pub use runtime::{RuntimeEvent, XrRuntime};
pub use session::{SessionPhase, SessionStateMachine};
pub use spaces::ReferenceSpaces;
pub use types::*;

use thiserror::Error;

/// Capability the runtime was asked for but does not offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Layer(String),
    Extension(String),
    FormFactor(FormFactor),
    BlendMode(BlendMode),
    ViewConfiguration(ViewConfigurationType),
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Layer(name) => write!(f, "layer {name}"),
            Capability::Extension(name) => write!(f, "extension {name}"),
            Capability::FormFactor(form) => write!(f, "form factor {form}"),
            Capability::BlendMode(mode) => write!(f, "blend mode {mode}"),
            Capability::ViewConfiguration(ty) => write!(f, "view configuration {ty}"),
        }
    }
}

const RETURN_CODE_ADVISORY: &str =
    "no runtime description; see https://registry.khronos.org/OpenXR/specs/1.0/html/xrspec.html#return-codes";

#[derive(Debug, Error)]
pub enum XrError {
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(Capability),
    #[error("{call} failed ({code}): {message}")]
    RuntimeCallFailed {
        call: &'static str,
        code: i32,
        message: String,
    },
    #[error("event for session {received:#x} does not match tracked session {expected:#x}")]
    UnexpectedSessionEvent { expected: u64, received: u64 },
    #[error("reference space '{0}' was not created for this session")]
    InvalidReferenceSpace(ReferenceSpaceKind),
    #[error("no registered action for path '{0}'")]
    ActionNotFound(String),
    #[error("no compatible swapchain format among {available:?}")]
    NoCompatibleFormat { available: Vec<u32> },
    #[error("action set is already attached to the session")]
    ActionSetAlreadyAttached,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("view index {index} out of range ({count} views)")]
    InvalidViewIndex { index: usize, count: usize },
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("graphics API outside runtime requirements {0}")]
    UnsupportedGraphicsApi(ApiVersionRange),
    #[error("graphics backend error: {0}")]
    Graphics(String),
}

impl XrError {
    /// Build a [`XrError::RuntimeCallFailed`], substituting the generic
    /// return-code advisory when the runtime gave no description.
    pub fn runtime(call: &'static str, code: i32, message: Option<String>) -> Self {
        Self::RuntimeCallFailed {
            call,
            code,
            message: message.unwrap_or_else(|| RETURN_CODE_ADVISORY.to_string()),
        }
    }

    pub fn graphics(msg: impl std::fmt::Display) -> Self {
        Self::Graphics(msg.to_string())
    }
}

pub type XrResult<T> = Result<T, XrError>;
