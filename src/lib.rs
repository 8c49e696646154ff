//! # nexus-viewer
//!
//! Retrieve PDF reports from a blob container and render them page by page.
//!
//! ## Why this crate?
//!
//! Sales reports live as PDFs in object storage. Reading one used to mean
//! downloading it, opening a desktop viewer and scrolling. This crate lists
//! the reports in a container, fetches the one a user picks, and streams its
//! pages as RGB rasters ready to display, so a viewer can show page 1 while
//! the rest of the document is still rendering.
//!
//! ## Pipeline Overview
//!
//! ```text
//! container
//!  │
//!  ├─ 1. List    enumerate blobs, keep names ending in ".pdf"
//!  ├─ 2. Fetch   download the selected blob (async, bounded by a timeout)
//!  ├─ 3. Decode  open it with pdfium (blocking worker, bounded by a timeout)
//!  ├─ 4. Render  one RGB raster per page, lazily, in page order
//!  └─ 5. Stream  pages to the caller through a bounded channel
//! ```
//!
//! Every failure reaches the caller as a [`PipelineFailure`] naming the
//! stage and the kind of error; a page that fails to render is reported in
//! its slot and the remaining pages still arrive.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use nexus_viewer::decoder::PdfiumDecoder;
//! use nexus_viewer::{store, RetrievalPipeline, StoreConfig, ViewerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // AZURE_CONNECTION_STRING and NEXUS_CONTAINER
//!     let store_config = StoreConfig::from_env()?;
//!     let config = ViewerConfig::default();
//!     let store: Arc<dyn store::BlobStore> =
//!         Arc::from(store::connect(&store_config, config.store_timeout())?);
//!     let decoder = Arc::new(PdfiumDecoder::from_config(&config)?);
//!
//!     let mut pipeline = RetrievalPipeline::new(store, decoder, config);
//!     let reports = pipeline.list().await?;
//!     let Some(first) = reports.first() else {
//!         eprintln!("No PDF reports found in the container.");
//!         return Ok(());
//!     };
//!
//!     let mut session = pipeline.select(&first.name).await?;
//!     while let Some(page) = session.next().await {
//!         match page {
//!             Ok(p) => println!("Page {}: {}x{}", p.number(), p.width(), p.height()),
//!             Err(e) => eprintln!("{e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `nexus-viewer` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when embedding the library:
//! ```toml
//! nexus-viewer = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod decoder;
pub mod encode;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelToken;
pub use config::{ColorSpace, RenderOptions, StoreConfig, ViewerConfig, ViewerConfigBuilder};
pub use decoder::{DocumentDecoder, OpenDocument};
pub use error::{
    DecodeError, ErrorKind, PageRenderError, PipelineFailure, Stage, StoreError, ViewerError,
};
pub use output::{RenderStats, RenderedDocument};
pub use pipeline::{Canceller, PipelineState, RetrievalPipeline};
pub use progress::{NoopProgressCallback, ProgressCallback, RenderProgressCallback};
pub use render::{PageRenderer, PageSequence, RenderedPage};
pub use store::{BlobDescriptor, BlobStore, DocumentBytes};
pub use stream::{PageStream, RenderSession};
