//! Page rendering: one [`RenderedPage`] per page, lazily, in order.
//!
//! ## Why an iterator?
//!
//! A report can run to hundreds of pages and a page at scale 2 is several
//! megabytes of RGB. [`PageSequence`] rasterises a page only when asked for
//! it, so a consumer that displays pages as they arrive (or stops early)
//! never holds the whole document in memory.
//!
//! A page that fails to render yields `Err` in its slot and the sequence
//! moves on; one bad page never hides the rest of the report.

use crate::config::{ColorSpace, RenderOptions};
use crate::decoder::OpenDocument;
use crate::error::PageRenderError;
use std::fmt;
use std::iter::FusedIterator;
use tracing::{debug, warn};

/// Raster of one page.
///
/// Invariant: `width > 0`, `height > 0` and
/// `pixels.len() == width * height * color_space.bytes_per_pixel()`, rows
/// top to bottom with no padding.
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedPage {
    index: usize,
    width: u32,
    height: u32,
    color_space: ColorSpace,
    pixels: Vec<u8>,
}

impl RenderedPage {
    /// An RGB page. Validates the size invariant.
    pub fn new(
        index: usize,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<Self, PageRenderError> {
        Self::with_color_space(index, width, height, ColorSpace::Rgb, pixels)
    }

    pub fn with_color_space(
        index: usize,
        width: u32,
        height: u32,
        color_space: ColorSpace,
        pixels: Vec<u8>,
    ) -> Result<Self, PageRenderError> {
        if width == 0 || height == 0 {
            return Err(PageRenderError::InvalidDimensions {
                index,
                width,
                height,
            });
        }
        let expected = buffer_len(index, width, height, color_space)?;
        if pixels.len() != expected {
            return Err(PageRenderError::BufferSize {
                index,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            index,
            width,
            height,
            color_space,
            pixels,
        })
    }

    /// Zero-based page index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// One-based page number, as shown in captions.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

impl fmt::Debug for RenderedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedPage")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("color_space", &self.color_space)
            .field("pixels", &format_args!("<{} bytes>", self.pixels.len()))
            .finish()
    }
}

fn buffer_len(
    index: usize,
    width: u32,
    height: u32,
    color_space: ColorSpace,
) -> Result<usize, PageRenderError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(color_space.bytes_per_pixel()))
        .ok_or(PageRenderError::InvalidDimensions {
            index,
            width,
            height,
        })
}

/// Turns an [`OpenDocument`] into a [`PageSequence`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PageRenderer {
    options: RenderOptions,
}

impl PageRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Lazy sequence over pages `0..page_count`. Nothing is rasterised until
    /// the first call to `next`.
    pub fn render_pages<'d, D: OpenDocument>(&self, doc: &'d D) -> PageSequence<'d, D> {
        PageSequence {
            doc,
            options: self.options,
            next: 0,
            total: doc.page_count(),
        }
    }

    /// Render a single page.
    pub fn render_page<D: OpenDocument>(
        &self,
        doc: &D,
        index: usize,
    ) -> Result<RenderedPage, PageRenderError> {
        render_one(doc, index, &self.options)
    }
}

fn render_one<D: OpenDocument>(
    doc: &D,
    index: usize,
    options: &RenderOptions,
) -> Result<RenderedPage, PageRenderError> {
    let (width, height) = doc.page_dimensions(index, options.scale)?;
    if width == 0 || height == 0 {
        return Err(PageRenderError::InvalidDimensions {
            index,
            width,
            height,
        });
    }
    let mut pixels = vec![0u8; buffer_len(index, width, height, options.color_space)?];
    doc.rasterize_page(index, width, height, &mut pixels)?;
    RenderedPage::with_color_space(index, width, height, options.color_space, pixels)
}

/// Iterator over the pages of one document.
///
/// Yields exactly `page_count` items with strictly increasing indices.
/// Not restartable: once exhausted it stays exhausted.
pub struct PageSequence<'d, D> {
    doc: &'d D,
    options: RenderOptions,
    next: usize,
    total: usize,
}

impl<D> PageSequence<'_, D> {
    pub fn total(&self) -> usize {
        self.total
    }

    /// Index of the page the next call to `next` will render.
    pub fn position(&self) -> usize {
        self.next
    }
}

impl<D: OpenDocument> Iterator for PageSequence<'_, D> {
    type Item = Result<RenderedPage, PageRenderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let result = render_one(self.doc, index, &self.options);
        match &result {
            Ok(page) => debug!(
                "Rendered page {} → {}x{} px",
                page.number(),
                page.width(),
                page.height()
            ),
            Err(e) => warn!("Page {} failed to render: {}", index + 1, e),
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl<D: OpenDocument> ExactSizeIterator for PageSequence<'_, D> {}

impl<D: OpenDocument> FusedIterator for PageSequence<'_, D> {}
