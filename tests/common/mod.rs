//! Shared fixtures for the integration tests.
//!
//! `SynDecoder` opens a tiny text format so pipeline behaviour can be tested
//! without a pdfium library:
//!
//! ```text
//! SYNDOC
//! 612x792          one page, 612×792 points
//! corrupt          a page whose rasterisation fails
//! 100x50 slow      a page that takes 25 ms to rasterise
//! ```
//!
//! Anything not starting with `SYNDOC` fails to open. `SYNDOC` alone is a
//! valid document with zero pages.

#![allow(dead_code)]

use async_trait::async_trait;
use nexus_viewer::decoder::TrackedDecoder;
use nexus_viewer::store::MemoryBlobStore;
use nexus_viewer::{
    BlobDescriptor, BlobStore, DecodeError, DocumentBytes, DocumentDecoder, OpenDocument,
    PageRenderError, RenderProgressCallback, StoreError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MAGIC: &str = "SYNDOC";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SynPage {
    Ok { width: u32, height: u32, slow: bool },
    Corrupt,
}

/// Build a synthetic document from page specs.
pub fn syn_document(pages: &[&str]) -> Vec<u8> {
    let mut text = String::from(MAGIC);
    for p in pages {
        text.push('\n');
        text.push_str(p);
    }
    text.into_bytes()
}

/// `n` letter-sized pages.
pub fn letter_pages(n: usize) -> Vec<u8> {
    syn_document(&vec!["612x792"; n])
}

pub struct SynDecoder {
    open_delay: Duration,
}

impl SynDecoder {
    pub fn new() -> Self {
        Self {
            open_delay: Duration::ZERO,
        }
    }

    /// Every `open` blocks for `delay` first.
    pub fn with_open_delay(delay: Duration) -> Self {
        Self { open_delay: delay }
    }

    pub fn tracked() -> TrackedDecoder<Self> {
        TrackedDecoder::new(Self::new())
    }
}

pub struct SynDocument {
    pages: Vec<SynPage>,
    closed: bool,
}

fn parse_page(line: &str) -> Option<SynPage> {
    let mut parts = line.split_whitespace();
    let size = parts.next()?;
    if size == "corrupt" {
        return Some(SynPage::Corrupt);
    }
    let (w, h) = size.split_once('x')?;
    Some(SynPage::Ok {
        width: w.parse().ok()?,
        height: h.parse().ok()?,
        slow: parts.next() == Some("slow"),
    })
}

impl DocumentDecoder for SynDecoder {
    type Document<'a> = SynDocument;

    fn open(&self, bytes: DocumentBytes) -> Result<SynDocument, DecodeError> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        let text = std::str::from_utf8(bytes.as_slice()).map_err(|_| DecodeError::Corrupt {
            detail: "not text".into(),
        })?;
        let mut lines = text.lines();
        if lines.next() != Some(MAGIC) {
            return Err(DecodeError::Corrupt {
                detail: "missing SYNDOC header".into(),
            });
        }
        let pages = lines
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                parse_page(l).ok_or_else(|| DecodeError::Corrupt {
                    detail: format!("bad page line {l:?}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SynDocument {
            pages,
            closed: false,
        })
    }
}

impl OpenDocument for SynDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_dimensions(&self, index: usize, scale: f32) -> Result<(u32, u32), PageRenderError> {
        match self.pages.get(index) {
            Some(SynPage::Ok { width, height, .. }) => Ok((
                ((*width as f32 * scale).round() as u32).max(1),
                ((*height as f32 * scale).round() as u32).max(1),
            )),
            Some(SynPage::Corrupt) => Ok((10, 10)),
            None => Err(PageRenderError::PageLoad {
                index,
                detail: "out of range".into(),
            }),
        }
    }

    fn rasterize_page(
        &self,
        index: usize,
        _width: u32,
        _height: u32,
        pixels: &mut [u8],
    ) -> Result<(), PageRenderError> {
        if self.closed {
            return Err(PageRenderError::PageLoad {
                index,
                detail: "document is closed".into(),
            });
        }
        match self.pages.get(index) {
            Some(SynPage::Ok { slow, .. }) => {
                if *slow {
                    std::thread::sleep(Duration::from_millis(25));
                }
                // White page with the index in the first byte.
                pixels.fill(0xff);
                pixels[0] = index as u8;
                Ok(())
            }
            _ => Err(PageRenderError::Rasterisation {
                index,
                detail: "object graph is corrupt".into(),
            }),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Memory store whose calls take `delay` before answering.
pub struct DelayedStore {
    pub inner: MemoryBlobStore,
    pub delay: Duration,
}

#[async_trait]
impl BlobStore for DelayedStore {
    async fn enumerate(&self) -> Result<Vec<BlobDescriptor>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.enumerate().await
    }

    async fn fetch(&self, name: &str) -> Result<DocumentBytes, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch(name).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start(String, usize),
    Page(usize),
    PageError(usize),
    Complete(usize, usize, usize),
}

/// Progress callback that records every event.
#[derive(Default)]
pub struct RecordingCallback {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl RenderProgressCallback for RecordingCallback {
    fn on_render_start(&self, name: &str, total_pages: usize) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Start(name.to_string(), total_pages));
    }

    fn on_page_complete(&self, index: usize, _total: usize, _w: u32, _h: u32) {
        self.events.lock().unwrap().push(Event::Page(index));
    }

    fn on_page_error(&self, index: usize, _total: usize, _error: &str) {
        self.events.lock().unwrap().push(Event::PageError(index));
    }

    fn on_render_complete(&self, total: usize, rendered: usize, failed: usize) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Complete(total, rendered, failed));
    }
}
