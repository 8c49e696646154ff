//! Observable pipeline state and the per-request write handle.

use crate::error::PipelineFailure;
use crate::store::BlobDescriptor;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Where the pipeline is in the list → select → fetch → decode → render flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Listing,
    AwaitingSelection {
        documents: Vec<BlobDescriptor>,
    },
    Fetching {
        name: String,
    },
    Decoding {
        name: String,
    },
    Rendering {
        name: String,
        total_pages: usize,
    },
    Done {
        name: String,
        rendered: usize,
        failed: usize,
    },
    Failed(PipelineFailure),
}

impl PipelineState {
    /// `Done` or `Failed`: the request that produced it will not change it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done { .. } | PipelineState::Failed(_))
    }

    /// The selected document, for states that have one.
    pub fn document(&self) -> Option<&str> {
        match self {
            PipelineState::Fetching { name }
            | PipelineState::Decoding { name }
            | PipelineState::Rendering { name, .. }
            | PipelineState::Done { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&PipelineFailure> {
        match self {
            PipelineState::Failed(f) => Some(f),
            _ => None,
        }
    }
}

/// Write access to the shared state for one request.
///
/// A handle only writes while its request is the newest one, and stops
/// writing once it has published a terminal state.
#[derive(Debug, Clone)]
pub(crate) struct StateHandle {
    tx: Arc<watch::Sender<PipelineState>>,
    latest: Arc<AtomicU64>,
    generation: u64,
    settled: Arc<AtomicBool>,
}

impl StateHandle {
    pub(crate) fn new(
        tx: Arc<watch::Sender<PipelineState>>,
        latest: Arc<AtomicU64>,
        generation: u64,
    ) -> Self {
        Self {
            tx,
            latest,
            generation,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish `next`. Returns `false` when the write was refused.
    pub(crate) fn set(&self, next: PipelineState) -> bool {
        let terminal = next.is_terminal();
        // The check runs under the channel's write lock, so a newer request
        // cannot slip in between the check and the store.
        self.tx.send_if_modified(|current| {
            if self.latest.load(Ordering::SeqCst) != self.generation
                || self.settled.load(Ordering::SeqCst)
            {
                return false;
            }
            if terminal {
                self.settled.store(true, Ordering::SeqCst);
            }
            *current = next;
            true
        })
    }

    /// Publish `Failed(failure)` and hand the failure back.
    pub(crate) fn fail(&self, failure: PipelineFailure) -> PipelineFailure {
        self.set(PipelineState::Failed(failure.clone()));
        failure
    }

    pub(crate) fn current(&self) -> PipelineState {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    fn handles() -> (Arc<watch::Sender<PipelineState>>, Arc<AtomicU64>) {
        let (tx, _rx) = watch::channel(PipelineState::Idle);
        (Arc::new(tx), Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn stale_generation_cannot_write() {
        let (tx, latest) = handles();
        let old = StateHandle::new(Arc::clone(&tx), Arc::clone(&latest), 1);
        latest.store(1, Ordering::SeqCst);
        assert!(old.set(PipelineState::Listing));

        latest.store(2, Ordering::SeqCst);
        let new = StateHandle::new(Arc::clone(&tx), Arc::clone(&latest), 2);
        assert!(new.set(PipelineState::Fetching { name: "b.pdf".into() }));
        assert!(!old.set(PipelineState::Done {
            name: "a.pdf".into(),
            rendered: 1,
            failed: 0,
        }));
        assert_eq!(new.current().document(), Some("b.pdf"));
    }

    #[test]
    fn terminal_state_is_final_for_its_request() {
        let (tx, latest) = handles();
        latest.store(1, Ordering::SeqCst);
        let handle = StateHandle::new(tx, latest, 1);

        handle.fail(PipelineFailure::cancelled(Stage::Decoding));
        assert!(!handle.set(PipelineState::Rendering {
            name: "a.pdf".into(),
            total_pages: 3,
        }));
        assert!(handle.current().failure().is_some());
    }

    #[test]
    fn state_serialises_with_tag() {
        let json = serde_json::to_value(PipelineState::Rendering {
            name: "Q1.pdf".into(),
            total_pages: 3,
        })
        .unwrap();
        assert_eq!(json["state"], "rendering");
        assert_eq!(json["total_pages"], 3);
    }
}
