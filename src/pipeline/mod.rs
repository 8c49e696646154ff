//! The retrieval pipeline: list → select → fetch → decode → render.
//!
//! ## Data Flow
//!
//! ```text
//! list ──▶ AwaitingSelection
//!            │ select(name)
//!            ▼
//!          Fetching ──▶ Decoding ──▶ Rendering ──▶ Done
//!          (async)      (blocking worker, one per request)
//!              └────────────┴─────────────┴──────▶ Failed(stage, kind)
//! ```
//!
//! 1. **Fetching** runs on the async runtime, bounded by `store_timeout`.
//! 2. **Decoding** opens the bytes on a blocking worker; the async side waits
//!    at most `open_timeout` for the page count.
//! 3. **Rendering** continues on the same worker, which streams pages to the
//!    returned [`RenderSession`] through a bounded channel.
//!
//! ## Superseding requests
//!
//! Each `list`/`select` call is a new request. It cancels the previous
//! request's token before doing anything else, and bumps a generation
//! counter so a slow, superseded request can never overwrite the state of
//! the newer one.

mod state;
mod worker;

pub use state::PipelineState;

use crate::cancel::CancelToken;
use crate::config::ViewerConfig;
use crate::decoder::DocumentDecoder;
use crate::error::{DecodeError, ErrorKind, PipelineFailure, Stage, StoreError};
use crate::render::{PageRenderer, RenderedPage};
use crate::store::{BlobDescriptor, BlobStore, DocumentBytes};
use crate::stream::RenderSession;
use state::StateHandle;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use worker::RenderJob;

type PageReceiver = mpsc::Receiver<Result<RenderedPage, PipelineFailure>>;

/// Orchestrates one user's document retrieval.
///
/// # Example
///
/// ```rust,no_run
/// use nexus_viewer::decoder::PdfiumDecoder;
/// use nexus_viewer::store::MemoryBlobStore;
/// use nexus_viewer::{RetrievalPipeline, ViewerConfig};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(MemoryBlobStore::new());
/// store.insert("Q1.pdf", std::fs::read("Q1.pdf")?);
/// let decoder = Arc::new(PdfiumDecoder::bind(None)?);
///
/// let mut pipeline = RetrievalPipeline::new(store, decoder, ViewerConfig::default());
/// let documents = pipeline.list().await?;
/// let mut session = pipeline.select(&documents[0].name).await?;
/// while let Some(page) = session.next().await {
///     let page = page?;
///     println!("Page {}: {}x{}", page.number(), page.width(), page.height());
/// }
/// # Ok(())
/// # }
/// ```
pub struct RetrievalPipeline<S: ?Sized, D> {
    store: Arc<S>,
    decoder: Arc<D>,
    config: ViewerConfig,
    renderer: PageRenderer,
    state: Arc<watch::Sender<PipelineState>>,
    generation: Arc<AtomicU64>,
    active: Arc<Mutex<Option<CancelToken>>>,
}

/// Cancels whatever request a pipeline is currently running.
///
/// Obtained from [`RetrievalPipeline::canceller`]; usable from another task
/// while the pipeline itself is busy in `list` or `select`.
#[derive(Debug, Clone)]
pub struct Canceller {
    active: Arc<Mutex<Option<CancelToken>>>,
}

impl Canceller {
    pub fn cancel(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = active.as_ref() {
            token.cancel();
        }
    }
}

impl<S, D> RetrievalPipeline<S, D>
where
    S: BlobStore + ?Sized + 'static,
    D: DocumentDecoder + 'static,
{
    /// Out-of-range values in `config` are repaired, see
    /// [`ViewerConfig::normalized`].
    pub fn new(store: Arc<S>, decoder: Arc<D>, config: ViewerConfig) -> Self {
        let config = config.normalized();
        let (tx, _rx) = watch::channel(PipelineState::Idle);
        Self {
            store,
            decoder,
            renderer: PageRenderer::new(config.render),
            config,
            state: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            active: Arc::clone(&self.active),
        }
    }

    /// Cancel the in-flight request, if any.
    pub fn cancel(&self) {
        self.canceller().cancel();
    }

    /// Supersede the previous request and start a new one.
    fn begin(&mut self) -> (CancelToken, StateHandle) {
        let token = CancelToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = active.replace(token.clone()) {
                previous.cancel();
            }
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = StateHandle::new(
            Arc::clone(&self.state),
            Arc::clone(&self.generation),
            generation,
        );
        (token, handle)
    }

    /// Run a store call under the store timeout, giving up on cancellation.
    async fn store_call<T>(
        &self,
        stage: Stage,
        cancel: &CancelToken,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, PipelineFailure> {
        let limit = self.config.store_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineFailure::cancelled(stage)),
            result = tokio::time::timeout(limit, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(PipelineFailure::from_store(stage, &e)),
                Err(_) => Err(PipelineFailure::from_store(
                    stage,
                    &StoreError::Timeout { secs: limit.as_secs() },
                )),
            },
        }
    }

    /// List the documents in the container.
    ///
    /// Idle (or any state) → Listing → AwaitingSelection | Failed(Listing).
    pub async fn list(&mut self) -> Result<Vec<BlobDescriptor>, PipelineFailure> {
        let (cancel, state) = self.begin();
        state.set(PipelineState::Listing);
        info!("Listing documents ending in '{}'", self.config.extension);

        let result = self
            .store_call(
                Stage::Listing,
                &cancel,
                self.store.list(&self.config.extension),
            )
            .await;

        match result {
            Ok(documents) => {
                info!("Found {} documents", documents.len());
                state.set(PipelineState::AwaitingSelection {
                    documents: documents.clone(),
                });
                Ok(documents)
            }
            Err(failure) => {
                warn!("Listing failed: {}", failure);
                Err(state.fail(failure))
            }
        }
    }

    /// Fetch, open and start rendering `name`.
    ///
    /// Returns once the document is open; pages then arrive on the returned
    /// session. Failures before that point are returned here; per-page
    /// failures arrive as items on the session.
    pub async fn select(&mut self, name: &str) -> Result<RenderSession, PipelineFailure> {
        let (cancel, state) = self.begin();
        let selection = BlobDescriptor::new(name);
        info!("Selected '{}'", name);

        // ── Fetching ─────────────────────────────────────────────────────
        state.set(PipelineState::Fetching {
            name: name.to_string(),
        });
        let bytes = match self
            .store_call(Stage::Fetching, &cancel, self.store.fetch(name))
            .await
        {
            Ok(bytes) => bytes,
            Err(failure) => {
                warn!("Fetching '{}' failed: {}", name, failure);
                return Err(state.fail(failure));
            }
        };
        debug!("Fetched '{}': {} bytes", name, bytes.len());

        // ── Decoding ─────────────────────────────────────────────────────
        if cancel.is_cancelled() {
            return Err(state.fail(PipelineFailure::cancelled(Stage::Decoding)));
        }
        state.set(PipelineState::Decoding {
            name: name.to_string(),
        });
        let (page_count, pages) = self.start_worker(name, bytes, &cancel, &state).await?;

        Ok(RenderSession::new(
            selection,
            page_count,
            Box::pin(ReceiverStream::new(pages)),
        ))
    }

    async fn start_worker(
        &self,
        name: &str,
        bytes: DocumentBytes,
        cancel: &CancelToken,
        state: &StateHandle,
    ) -> Result<(usize, PageReceiver), PipelineFailure> {
        let (pages_tx, pages_rx) = mpsc::channel(self.config.page_buffer.max(1));
        let (opened_tx, opened_rx) = oneshot::channel();

        let job = RenderJob {
            decoder: Arc::clone(&self.decoder),
            bytes,
            renderer: self.renderer,
            name: name.to_string(),
            cancel: cancel.clone(),
            state: state.clone(),
            progress: self.config.progress_callback.clone(),
            runtime: Handle::current(),
            opened: opened_tx,
            pages: pages_tx.clone(),
        };
        let handle = tokio::task::spawn_blocking(move || job.run());
        worker::supervise(handle, state.clone(), pages_tx);

        let limit = self.config.open_timeout();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(state.fail(PipelineFailure::cancelled(Stage::Decoding)));
            }
            opened = tokio::time::timeout(limit, opened_rx) => opened,
        };

        match opened {
            Ok(Ok(Ok(page_count))) => {
                debug!("Opened '{}': {} pages", name, page_count);
                Ok((page_count, pages_rx))
            }
            Ok(Ok(Err(e))) => {
                warn!("'{}' could not be decoded: {}", name, e);
                Err(state.fail(PipelineFailure::from_decode(&e)))
            }
            Ok(Err(_)) => Err(state.fail(PipelineFailure::new(
                Stage::Decoding,
                ErrorKind::Internal,
                "decoder worker exited before reporting",
            ))),
            Err(_) => {
                // The worker cannot be interrupted mid-open; it sees the
                // cancelled token when it returns and closes the document.
                cancel.cancel();
                warn!("Opening '{}' exceeded {}s", name, limit.as_secs());
                Err(state.fail(PipelineFailure::from_decode(&DecodeError::Timeout {
                    secs: limit.as_secs(),
                })))
            }
        }
    }
}

impl<S: ?Sized, D> Drop for RetrievalPipeline<S, D> {
    fn drop(&mut self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = active.as_ref() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::OpenDocument;
    use crate::error::PageRenderError;
    use crate::store::MemoryBlobStore;
    use futures::StreamExt;

    /// `b"pages:N"` opens as N pages of 4×2 points; anything else is corrupt.
    struct CountingDecoder;

    struct CountingDoc {
        pages: usize,
        closed: bool,
    }

    impl OpenDocument for CountingDoc {
        fn page_count(&self) -> usize {
            self.pages
        }
        fn page_dimensions(&self, _i: usize, scale: f32) -> Result<(u32, u32), PageRenderError> {
            Ok(((4.0 * scale) as u32, (2.0 * scale) as u32))
        }
        fn rasterize_page(
            &self,
            _i: usize,
            _w: u32,
            _h: u32,
            pixels: &mut [u8],
        ) -> Result<(), PageRenderError> {
            pixels.fill(0x80);
            Ok(())
        }
        fn close(&mut self) {
            self.closed = true;
        }
        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    impl DocumentDecoder for CountingDecoder {
        type Document<'a> = CountingDoc;

        fn open(&self, bytes: DocumentBytes) -> Result<CountingDoc, DecodeError> {
            std::str::from_utf8(bytes.as_slice())
                .ok()
                .and_then(|s| s.strip_prefix("pages:"))
                .and_then(|n| n.parse().ok())
                .map(|pages| CountingDoc {
                    pages,
                    closed: false,
                })
                .ok_or_else(|| DecodeError::corrupt("not a counting document"))
        }
    }

    fn pipeline() -> (
        Arc<MemoryBlobStore>,
        RetrievalPipeline<MemoryBlobStore, CountingDecoder>,
    ) {
        let store = Arc::new(MemoryBlobStore::new());
        let p = RetrievalPipeline::new(
            Arc::clone(&store),
            Arc::new(CountingDecoder),
            ViewerConfig::default(),
        );
        (store, p)
    }

    #[tokio::test]
    async fn list_moves_to_awaiting_selection() {
        let (store, mut p) = pipeline();
        store.insert("Q1.pdf", b"pages:1".to_vec());
        store.insert("notes.txt", b"x".to_vec());
        assert_eq!(p.state(), PipelineState::Idle);

        let docs = p.list().await.unwrap();
        assert_eq!(docs, vec![BlobDescriptor::new("Q1.pdf")]);
        assert_eq!(
            p.state(),
            PipelineState::AwaitingSelection { documents: docs }
        );
    }

    #[tokio::test]
    async fn select_streams_pages_then_done() {
        let (store, mut p) = pipeline();
        store.insert("Q1.pdf", b"pages:3".to_vec());

        let session = p.select("Q1.pdf").await.unwrap();
        assert_eq!(session.page_count(), 3);
        let indices: Vec<usize> = session
            .map(|r| r.unwrap().index())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(indices, vec![0, 1, 2]);

        let mut rx = p.subscribe();
        let done = rx.wait_for(|s| s.is_terminal()).await.unwrap().clone();
        assert_eq!(
            done,
            PipelineState::Done {
                name: "Q1.pdf".into(),
                rendered: 3,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn corrupt_document_fails_in_decoding() {
        let (store, mut p) = pipeline();
        store.insert("bad.pdf", b"This is not a PDF".to_vec());

        let failure = p.select("bad.pdf").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Decoding);
        assert_eq!(failure.kind, ErrorKind::CorruptDocument);
        assert_eq!(p.state(), PipelineState::Failed(failure));
    }

    #[tokio::test]
    async fn newer_request_cancels_older_stream() {
        let (store, mut p) = pipeline();
        store.insert("long.pdf", b"pages:50".to_vec());
        store.insert("short.pdf", b"pages:1".to_vec());

        let mut first = p.select("long.pdf").await.unwrap();
        let second = p.select("short.pdf").await.unwrap();

        let mut seen = 0;
        let mut last = None;
        while let Some(item) = first.next().await {
            match item {
                Ok(_) => seen += 1,
                Err(f) => last = Some(f),
            }
        }
        assert!(seen < 50);
        if let Some(f) = last {
            assert_eq!(f.kind, ErrorKind::Cancelled);
        }

        let doc = second.collect().await;
        assert_eq!(doc.stats.rendered_pages, 1);
        let mut rx = p.subscribe();
        let state = rx.wait_for(|s| s.is_terminal()).await.unwrap().clone();
        assert_eq!(state.document(), Some("short.pdf"));
    }
}
