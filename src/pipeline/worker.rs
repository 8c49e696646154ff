//! The blocking half of a request: open, render, stream, close.
//!
//! ## Why one blocking worker per request?
//!
//! pdfium is synchronous and CPU-bound, and its document handles must not
//! cross threads. The worker opens the document on a `spawn_blocking`
//! thread, keeps it there for the whole request, and pushes each page into
//! a bounded channel. Every way out of [`RenderJob::run`] (exhaustion,
//! cancellation, an abandoned stream, a panic) releases the handle, the
//! last one through drop during unwinding.

use super::state::{PipelineState, StateHandle};
use crate::cancel::CancelToken;
use crate::decoder::{DocumentDecoder, OpenDocument};
use crate::error::{DecodeError, ErrorKind, PipelineFailure, Stage};
use crate::progress::ProgressCallback;
use crate::render::{PageRenderer, RenderedPage};
use crate::store::DocumentBytes;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub(crate) type PageSender = mpsc::Sender<Result<RenderedPage, PipelineFailure>>;

/// Everything the worker needs, moved onto the blocking thread.
pub(crate) struct RenderJob<D> {
    pub decoder: Arc<D>,
    pub bytes: DocumentBytes,
    pub renderer: PageRenderer,
    pub name: String,
    pub cancel: CancelToken,
    pub state: StateHandle,
    pub progress: Option<ProgressCallback>,
    pub runtime: Handle,
    /// Page count on success, or why the document would not open.
    pub opened: oneshot::Sender<Result<usize, DecodeError>>,
    pub pages: PageSender,
}

enum Outcome {
    Exhausted,
    Cancelled,
    Abandoned,
}

impl<D: DocumentDecoder> RenderJob<D> {
    pub(crate) fn run(self) {
        let RenderJob {
            decoder,
            bytes,
            renderer,
            name,
            cancel,
            state,
            progress,
            runtime,
            opened,
            pages,
        } = self;

        let mut doc = match decoder.open(bytes) {
            Ok(doc) => doc,
            Err(e) => {
                debug!("'{}' did not open: {}", name, e);
                let _ = opened.send(Err(e));
                return;
            }
        };
        let total = doc.page_count();

        // The async side may have timed out or been cancelled while we were
        // opening; in that case it has already published the failure.
        if opened.send(Ok(total)).is_err() || cancel.is_cancelled() {
            debug!("'{}' opened after the request ended; closing", name);
            doc.close();
            return;
        }

        state.set(PipelineState::Rendering {
            name: name.clone(),
            total_pages: total,
        });
        info!("Rendering '{}': {} pages", name, total);
        if let Some(cb) = &progress {
            cb.on_render_start(&name, total);
        }

        let mut rendered = 0usize;
        let mut failed = 0usize;
        let mut sequence = renderer.render_pages(&doc);
        let outcome = loop {
            if cancel.is_cancelled() {
                break Outcome::Cancelled;
            }
            let Some(result) = sequence.next() else {
                break Outcome::Exhausted;
            };

            let item = match result {
                Ok(page) => {
                    rendered += 1;
                    if let Some(cb) = &progress {
                        cb.on_page_complete(page.index(), total, page.width(), page.height());
                    }
                    Ok(page)
                }
                Err(e) => {
                    failed += 1;
                    if let Some(cb) = &progress {
                        cb.on_page_error(e.index(), total, &e.to_string());
                    }
                    Err(PipelineFailure::from(e))
                }
            };

            match runtime.block_on(deliver(&pages, item, &cancel)) {
                Delivery::Sent => {}
                Delivery::Cancelled => break Outcome::Cancelled,
                Delivery::Closed => break Outcome::Abandoned,
            }
        };
        drop(sequence);
        doc.close();

        if let Some(cb) = &progress {
            cb.on_render_complete(total, rendered, failed);
        }

        match outcome {
            Outcome::Exhausted => {
                info!(
                    "Finished '{}': {} rendered, {} failed",
                    name, rendered, failed
                );
                state.set(PipelineState::Done {
                    name,
                    rendered,
                    failed,
                });
            }
            Outcome::Cancelled => {
                info!("Rendering '{}' cancelled after {} pages", name, rendered + failed);
                let failure = state.fail(PipelineFailure::cancelled(Stage::Rendering));
                // Best effort: a consumer that is still reading learns why
                // the stream ended.
                let _ = pages.try_send(Err(failure));
            }
            Outcome::Abandoned => {
                debug!("Consumer of '{}' went away; stopping", name);
                state.fail(PipelineFailure::cancelled(Stage::Rendering));
            }
        }
    }
}

enum Delivery {
    Sent,
    Cancelled,
    Closed,
}

/// Wait for channel capacity, giving up if the request is cancelled.
async fn deliver(
    pages: &PageSender,
    item: Result<RenderedPage, PipelineFailure>,
    cancel: &CancelToken,
) -> Delivery {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Delivery::Cancelled,
        sent = pages.send(item) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Closed,
        },
    }
}

/// Watch the worker and turn a panic into `Failed(Internal)`.
pub(crate) fn supervise(worker: JoinHandle<()>, state: StateHandle, pages: PageSender) {
    tokio::spawn(async move {
        let Err(e) = worker.await else {
            return;
        };
        if !e.is_panic() {
            warn!("Render worker did not finish: {}", e);
            return;
        }
        error!("Render worker panicked: {}", e);
        let stage = match state.current() {
            PipelineState::Rendering { .. } => Stage::Rendering,
            _ => Stage::Decoding,
        };
        let failure = state.fail(PipelineFailure::new(
            stage,
            ErrorKind::Internal,
            "render worker panicked",
        ));
        let _ = pages.try_send(Err(failure));
    });
}
