//! Document decoding: turn a byte buffer into a page-addressable handle.
//!
//! The rest of the crate only sees the two traits here. [`PdfiumDecoder`]
//! is the shipped implementation; any rasteriser that can report a page
//! count, a page size and fill an RGB buffer can replace it without touching
//! the renderer or the pipeline.
//!
//! ## Handle lifetime
//!
//! An [`OpenDocument`] may borrow from its decoder (pdfium documents borrow
//! the bound library), hence the generic associated type. Handles release
//! their native resources on [`OpenDocument::close`] and again, at the
//! latest, on drop, so every exit path frees them.

mod pdfium;
mod tracked;

pub use pdfium::{PdfiumDecoder, PdfiumDocument};
pub use tracked::{HandleCounters, TrackedDecoder, TrackedDocument};

use crate::error::{DecodeError, PageRenderError};
use crate::store::DocumentBytes;
use std::sync::Arc;

/// An opened document.
pub trait OpenDocument {
    /// Number of pages, fixed when the document was opened.
    fn page_count(&self) -> usize;

    /// Pixel size of page `index` at `scale`, at least 1×1.
    fn page_dimensions(&self, index: usize, scale: f32) -> Result<(u32, u32), PageRenderError>;

    /// Rasterise page `index` into `pixels`, an RGB buffer of exactly
    /// `width * height * 3` bytes.
    fn rasterize_page(
        &self,
        index: usize,
        width: u32,
        height: u32,
        pixels: &mut [u8],
    ) -> Result<(), PageRenderError>;

    /// Release native resources. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Opens byte buffers as [`OpenDocument`]s.
pub trait DocumentDecoder: Send + Sync {
    type Document<'a>: OpenDocument
    where
        Self: 'a;

    /// Parse the container. Either a fully usable handle is returned or
    /// nothing is left allocated.
    fn open(&self, bytes: DocumentBytes) -> Result<Self::Document<'_>, DecodeError>;
}

impl<D: DocumentDecoder> DocumentDecoder for Arc<D> {
    type Document<'a>
        = D::Document<'a>
    where
        Self: 'a;

    fn open(&self, bytes: DocumentBytes) -> Result<Self::Document<'_>, DecodeError> {
        (**self).open(bytes)
    }
}
