//! Streaming delivery of rendered pages.
//!
//! ## Why stream?
//!
//! A viewer wants page 1 on screen while page 40 is still rasterising.
//! [`RenderSession`] is a `Stream` of pages in page order, fed by the render
//! worker through a bounded channel, so at most `page_buffer` pages wait in
//! memory ahead of the consumer.
//!
//! Dropping the session (or its stream) tells the worker to stop; it closes
//! the document and the pipeline records the request as cancelled.

use crate::error::PipelineFailure;
use crate::output::{RenderStats, RenderedDocument};
use crate::render::RenderedPage;
use crate::store::BlobDescriptor;
use futures::StreamExt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio_stream::Stream;
use tracing::debug;

/// A boxed stream of page results.
///
/// Page failures arrive as `Err` items with `kind = PageRender` and the
/// stream continues. Any other `Err` is the last item.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<RenderedPage, PipelineFailure>> + Send>>;

/// The result of a successful selection: which document, how many pages,
/// and the pages themselves as they are rendered.
pub struct RenderSession {
    selection: BlobDescriptor,
    page_count: usize,
    pages: PageStream,
}

impl RenderSession {
    pub fn new(selection: BlobDescriptor, page_count: usize, pages: PageStream) -> Self {
        Self {
            selection,
            page_count,
            pages,
        }
    }

    /// The document this session renders.
    pub fn selection(&self) -> &BlobDescriptor {
        &self.selection
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn into_pages(self) -> PageStream {
        self.pages
    }

    /// Drain the stream into a [`RenderedDocument`].
    ///
    /// # Example
    /// ```rust,no_run
    /// # async fn demo(
    /// #     pipeline: &mut nexus_viewer::RetrievalPipeline<
    /// #         nexus_viewer::store::MemoryBlobStore,
    /// #         nexus_viewer::decoder::PdfiumDecoder,
    /// #     >,
    /// # ) -> Result<(), nexus_viewer::PipelineFailure> {
    /// let session = pipeline.select("Q1.pdf").await?;
    /// let doc = session.collect().await;
    /// println!("{}: {}/{} pages", doc.selection, doc.stats.rendered_pages, doc.stats.total_pages);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn collect(self) -> RenderedDocument {
        let start = Instant::now();
        let RenderSession {
            selection,
            page_count,
            mut pages,
        } = self;

        let mut stats = RenderStats {
            total_pages: page_count,
            ..Default::default()
        };
        let mut rendered = Vec::with_capacity(page_count);
        let mut failures = Vec::new();

        while let Some(item) = pages.next().await {
            match item {
                Ok(page) => {
                    stats.rendered_pages += 1;
                    stats.pixel_bytes += page.pixels().len();
                    rendered.push(page);
                }
                Err(failure) => {
                    if failure.page.is_some() {
                        stats.failed_pages += 1;
                    }
                    failures.push(failure);
                }
            }
        }
        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Collected '{}': {} rendered, {} failed",
            selection, stats.rendered_pages, stats.failed_pages
        );

        RenderedDocument {
            selection,
            pages: rendered,
            failures,
            stats,
        }
    }
}

impl Stream for RenderSession {
    type Item = Result<RenderedPage, PipelineFailure>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.pages.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSession")
            .field("selection", &self.selection)
            .field("page_count", &self.page_count)
            .finish_non_exhaustive()
    }
}
