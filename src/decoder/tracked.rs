//! Live-handle accounting around any decoder.
//!
//! Wrapping a decoder in [`TrackedDecoder`] counts every handle it opens and
//! every handle released, whether through `close` or drop. A non-zero
//! [`HandleCounters::live`] after a request has finished means a leak.

use super::{DocumentDecoder, OpenDocument};
use crate::error::{DecodeError, PageRenderError};
use crate::store::DocumentBytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct HandleCounters {
    opened: AtomicUsize,
    released: AtomicUsize,
    failed_opens: AtomicUsize,
}

impl HandleCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn failed_opens(&self) -> usize {
        self.failed_opens.load(Ordering::SeqCst)
    }

    /// Handles opened and not yet released.
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.released())
    }
}

pub struct TrackedDecoder<D> {
    inner: D,
    counters: Arc<HandleCounters>,
}

impl<D> TrackedDecoder<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            counters: Arc::new(HandleCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<HandleCounters> {
        Arc::clone(&self.counters)
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: DocumentDecoder> DocumentDecoder for TrackedDecoder<D> {
    type Document<'a>
        = TrackedDocument<D::Document<'a>>
    where
        Self: 'a;

    fn open(&self, bytes: DocumentBytes) -> Result<Self::Document<'_>, DecodeError> {
        match self.inner.open(bytes) {
            Ok(doc) => {
                self.counters.opened.fetch_add(1, Ordering::SeqCst);
                Ok(TrackedDocument {
                    inner: doc,
                    counters: Arc::clone(&self.counters),
                    released: false,
                })
            }
            Err(e) => {
                self.counters.failed_opens.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

pub struct TrackedDocument<T: OpenDocument> {
    inner: T,
    counters: Arc<HandleCounters>,
    released: bool,
}

impl<T: OpenDocument> OpenDocument for TrackedDocument<T> {
    fn page_count(&self) -> usize {
        self.inner.page_count()
    }

    fn page_dimensions(&self, index: usize, scale: f32) -> Result<(u32, u32), PageRenderError> {
        self.inner.page_dimensions(index, scale)
    }

    fn rasterize_page(
        &self,
        index: usize,
        width: u32,
        height: u32,
        pixels: &mut [u8],
    ) -> Result<(), PageRenderError> {
        self.inner.rasterize_page(index, width, height, pixels)
    }

    fn close(&mut self) {
        self.inner.close();
        if !self.released {
            self.released = true;
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T: OpenDocument> Drop for TrackedDocument<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pages are `[b'P', n]`: `n` pages of 2×1 points.
    struct TinyDecoder;

    struct TinyDocument {
        pages: usize,
        closed: bool,
    }

    impl OpenDocument for TinyDocument {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn page_dimensions(&self, _index: usize, scale: f32) -> Result<(u32, u32), PageRenderError> {
            Ok(((2.0 * scale) as u32, scale as u32))
        }

        fn rasterize_page(
            &self,
            _index: usize,
            _width: u32,
            _height: u32,
            pixels: &mut [u8],
        ) -> Result<(), PageRenderError> {
            pixels.fill(0xff);
            Ok(())
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    impl DocumentDecoder for TinyDecoder {
        type Document<'a> = TinyDocument;

        fn open(&self, bytes: DocumentBytes) -> Result<TinyDocument, DecodeError> {
            match bytes.as_slice() {
                [b'P', n] => Ok(TinyDocument {
                    pages: *n as usize,
                    closed: false,
                }),
                _ => Err(DecodeError::corrupt("not a tiny document")),
            }
        }
    }

    #[test]
    fn counts_close_and_drop_once_each() {
        let decoder = TrackedDecoder::new(TinyDecoder);
        let counters = decoder.counters();

        let mut a = decoder.open(DocumentBytes::new(vec![b'P', 3])).unwrap();
        let b = decoder.open(DocumentBytes::new(vec![b'P', 3])).unwrap();
        assert_eq!(counters.live(), 2);

        a.close();
        a.close();
        assert!(a.is_closed());
        assert_eq!(counters.live(), 1);
        drop(a);
        assert_eq!(counters.released(), 1);

        drop(b);
        assert_eq!(counters.live(), 0);
        assert_eq!(counters.opened(), 2);
    }

    #[test]
    fn independent_handles_share_page_count() {
        let decoder = TrackedDecoder::new(TinyDecoder);
        let bytes = DocumentBytes::new(vec![b'P', 4]);
        let mut first = decoder.open(bytes.clone()).unwrap();
        let second = decoder.open(bytes).unwrap();
        assert_eq!(first.page_count(), second.page_count());

        first.close();
        assert!(!second.is_closed());
        let mut buf = vec![0u8; 2 * 3];
        assert!(second.rasterize_page(0, 2, 1, &mut buf).is_ok());
    }

    #[test]
    fn failed_open_leaves_nothing_live() {
        let decoder = TrackedDecoder::new(TinyDecoder);
        assert!(decoder.open(DocumentBytes::new(b"junk".to_vec())).is_err());
        assert_eq!(decoder.counters().failed_opens(), 1);
        assert_eq!(decoder.counters().live(), 0);
    }
}
