//! Error types for the nexus-viewer library.
//!
//! Errors are split by the component that raises them, and all of them are
//! folded into one presentation-facing shape at the pipeline boundary:
//!
//! * [`ViewerError`] (**Fatal at startup**): missing configuration, a
//!   malformed connection string, or no pdfium library to bind. Nothing can
//!   be listed or rendered until it is fixed.
//!
//! * [`StoreError`], [`DecodeError`] (**Fatal for one request**): the store
//!   was unreachable, the blob vanished, or the bytes are not a usable PDF.
//!
//! * [`PageRenderError`] (**Non-fatal**): one page failed to rasterise but
//!   the rest of the document still renders.
//!
//! * [`PipelineFailure`]: the structured `{stage, kind, message}` record the
//!   presentation layer receives, so it never has to match on internal types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// ── Classification ───────────────────────────────────────────────────────

/// Stage of the retrieval pipeline an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Listing,
    Fetching,
    Decoding,
    Rendering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Listing => "listing",
            Stage::Fetching => "fetching",
            Stage::Decoding => "decoding",
            Stage::Rendering => "rendering",
        };
        f.write_str(s)
    }
}

/// What went wrong, independent of which component noticed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Network, auth or timeout failure talking to the content store.
    StoreUnavailable,
    /// The named blob does not exist (any more).
    NotFound,
    /// The bytes could not be opened as a document.
    CorruptDocument,
    /// A single page failed to rasterise.
    PageRender,
    /// The request was superseded or abandoned.
    Cancelled,
    /// A worker panicked or a channel closed unexpectedly.
    Internal,
}

impl ErrorKind {
    /// `true` when simply re-invoking the same request may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::StoreUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::StoreUnavailable => "store unavailable",
            ErrorKind::NotFound => "not found",
            ErrorKind::CorruptDocument => "corrupt document",
            ErrorKind::PageRender => "page render error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

// ── Startup errors ───────────────────────────────────────────────────────

/// Fatal errors raised while the viewer is being configured.
#[derive(Debug, Error)]
pub enum ViewerError {
    /// A required configuration value is absent.
    #[error("Missing required configuration: {name}\nSet it in the environment or pass it on the command line.")]
    MissingConfig { name: &'static str },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The store connection string could not be parsed.
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {reason}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, pass --pdfium-lib, or install\n\
pdfium where the system loader can find it.\n"
    )]
    PdfiumBindingFailed {
        path: Option<PathBuf>,
        reason: String,
    },
}

// ── Store errors ─────────────────────────────────────────────────────────

/// Errors raised by a [`crate::store::BlobStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The blob does not exist in the container at call time.
    #[error("Blob '{name}' not found in the container")]
    NotFound { name: String },

    /// Connectivity, authentication or server failure.
    #[error("Content store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The store did not answer within the configured bound.
    #[error("Content store did not respond within {secs}s")]
    Timeout { secs: u64 },
}

impl StoreError {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Unavailable { .. } | StoreError::Timeout { .. } => {
                ErrorKind::StoreUnavailable
            }
        }
    }
}

// ── Decoder errors ───────────────────────────────────────────────────────

/// Errors raised while opening a document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Header/trailer/xref is corrupt, or the bytes are not a PDF at all.
    #[error("Document is corrupt or not a PDF: {detail}")]
    Corrupt { detail: String },

    /// The document is encrypted and no password was configured.
    #[error("Document is encrypted and requires a password")]
    PasswordRequired,

    /// A password was configured but it does not open the document.
    #[error("Wrong password for encrypted document")]
    WrongPassword,

    /// Opening the document did not finish within the configured bound.
    #[error("Opening the document did not finish within {secs}s")]
    Timeout { secs: u64 },
}

impl DecodeError {
    pub(crate) fn corrupt(detail: impl Into<String>) -> Self {
        DecodeError::Corrupt {
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::CorruptDocument
    }
}

// ── Page errors ──────────────────────────────────────────────────────────

/// A non-fatal error for a single page.
///
/// Yielded in place of that page by [`crate::render::PageSequence`]; the
/// remaining pages still render.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageRenderError {
    /// The page object could not be loaded from the document.
    #[error("Page {index}: could not be loaded: {detail}")]
    PageLoad { index: usize, detail: String },

    /// The rasteriser rejected the page.
    #[error("Page {index}: rasterisation failed: {detail}")]
    Rasterisation { index: usize, detail: String },

    /// The page reported a zero or unrepresentable size.
    #[error("Page {index}: invalid dimensions {width}x{height}")]
    InvalidDimensions {
        index: usize,
        width: u32,
        height: u32,
    },

    /// The produced buffer does not hold exactly `width * height * 3` bytes.
    #[error("Page {index}: pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSize {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

impl PageRenderError {
    /// Zero-based index of the page that failed.
    pub fn index(&self) -> usize {
        match self {
            PageRenderError::PageLoad { index, .. }
            | PageRenderError::Rasterisation { index, .. }
            | PageRenderError::InvalidDimensions { index, .. }
            | PageRenderError::BufferSize { index, .. } => *index,
        }
    }
}

// ── Presentation boundary ────────────────────────────────────────────────

/// The single failure shape handed to the presentation layer.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{stage} failed ({kind}): {message}")]
pub struct PipelineFailure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    /// Set for per-page render failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl PipelineFailure {
    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
            page: None,
        }
    }

    pub fn cancelled(stage: Stage) -> Self {
        Self::new(stage, ErrorKind::Cancelled, "request was superseded or abandoned")
    }

    pub fn from_store(stage: Stage, err: &StoreError) -> Self {
        Self::new(stage, err.kind(), err.to_string())
    }

    pub fn from_decode(err: &DecodeError) -> Self {
        Self::new(Stage::Decoding, err.kind(), err.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<PageRenderError> for PipelineFailure {
    fn from(err: PageRenderError) -> Self {
        Self {
            stage: Stage::Rendering,
            kind: ErrorKind::PageRender,
            page: Some(err.index()),
            message: err.to_string(),
        }
    }
}
