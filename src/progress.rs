//! Progress-callback trait for per-page render events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::config::ViewerConfigBuilder::progress_callback`] to receive
//! events while a document renders.
//!
//! Callbacks run on the blocking render worker, not on the async runtime,
//! so implementations must be `Send + Sync` and should return quickly.
//!
//! # Example
//!
//! ```rust
//! use nexus_viewer::{RenderProgressCallback, ViewerConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl RenderProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, index: usize, total_pages: usize, _w: u32, _h: u32) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {}/{}", index + 1, total_pages);
//!     }
//! }
//!
//! let config = ViewerConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { rendered: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the render worker as it walks a document.
///
/// All methods default to no-ops so callers only override what they need.
/// Page indices are zero-based.
pub trait RenderProgressCallback: Send + Sync {
    /// Called once after the document opened, before the first page.
    fn on_render_start(&self, name: &str, total_pages: usize) {
        let _ = (name, total_pages);
    }

    /// Called after a page rasterised successfully.
    fn on_page_complete(&self, index: usize, total_pages: usize, width: u32, height: u32) {
        let _ = (index, total_pages, width, height);
    }

    /// Called when a page failed; rendering continues with the next page.
    fn on_page_error(&self, index: usize, total_pages: usize, error: &str) {
        let _ = (index, total_pages, error);
    }

    /// Called once when the worker stops, whether exhausted or cancelled.
    fn on_render_complete(&self, total_pages: usize, rendered: usize, failed: usize) {
        let _ = (total_pages, rendered, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ViewerConfig`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;
