//! Eagerly collected results of one render session.

use crate::error::{ErrorKind, PipelineFailure};
use crate::render::RenderedPage;
use crate::store::BlobDescriptor;
use serde::Serialize;

/// Every page of a document, gathered by [`crate::RenderSession::collect`].
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    /// Echo of the document that was selected.
    pub selection: BlobDescriptor,
    /// Successfully rendered pages, in page order.
    pub pages: Vec<RenderedPage>,
    /// Per-page failures plus, if the stream ended early, the reason.
    pub failures: Vec<PipelineFailure>,
    pub stats: RenderStats,
}

impl RenderedDocument {
    /// True when every page rendered.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.pages.len() == self.stats.total_pages
    }

    /// The failure that stopped the stream before the last page, if any.
    pub fn terminated_by(&self) -> Option<&PipelineFailure> {
        self.failures.iter().find(|f| f.kind != ErrorKind::PageRender)
    }
}

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub total_pages: usize,
    pub rendered_pages: usize,
    pub failed_pages: usize,
    /// Pixel bytes across all rendered pages.
    pub pixel_bytes: usize,
    pub elapsed_ms: u64,
}
