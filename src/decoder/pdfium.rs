//! [`DocumentDecoder`] backed by pdfium via `pdfium-render`.
//!
//! ## Why bind once?
//!
//! Loading the shared library is the slow part and may fail for reasons the
//! user has to fix (missing library, wrong architecture). Binding happens at
//! startup so that failure is fatal and immediate; every request then reuses
//! the same [`Pdfium`] instance.
//!
//! ## Threading
//!
//! The `sync` feature makes [`Pdfium`] `Send + Sync`, so one decoder can be
//! shared across blocking workers; `thread_safe` serialises every call into
//! the library behind a global lock. Documents themselves never leave the
//! worker that opened them.

use super::{DocumentDecoder, OpenDocument};
use crate::config::ViewerConfig;
use crate::error::{DecodeError, PageRenderError, ViewerError};
use crate::store::DocumentBytes;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a pdfium shared library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// pdfium refuses bitmaps with an edge beyond this.
const MAX_EDGE_PX: f32 = 32_767.0;

/// Real PDFs may carry junk before the header; pdfium accepts it within
/// the first kilobyte.
const HEADER_SEARCH_WINDOW: usize = 1024;

pub struct PdfiumDecoder {
    pdfium: Pdfium,
    password: Option<String>,
}

impl PdfiumDecoder {
    /// Bind to pdfium.
    ///
    /// Resolution order: `library`, then `PDFIUM_LIB_PATH`, then the platform
    /// library in the working directory, then the system loader.
    pub fn bind(library: Option<&Path>) -> Result<Self, ViewerError> {
        let bindings = bind_library(library)?;
        Ok(Self {
            pdfium: Pdfium::new(bindings),
            password: None,
        })
    }

    /// Bind using the library path and password from `config`.
    pub fn from_config(config: &ViewerConfig) -> Result<Self, ViewerError> {
        let decoder = Self::bind(config.pdfium_library.as_deref())?;
        Ok(match &config.password {
            Some(pwd) => decoder.with_password(pwd.clone()),
            None => decoder,
        })
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

fn bind_library(
    library: Option<&Path>,
) -> Result<Box<dyn PdfiumLibraryBindings>, ViewerError> {
    let failed = |path: Option<PathBuf>, e: PdfiumError| ViewerError::PdfiumBindingFailed {
        reason: format!("{e:?}"),
        path,
    };

    if let Some(path) = library {
        info!("Binding pdfium from {}", path.display());
        return Pdfium::bind_to_library(path).map_err(|e| failed(Some(path.to_path_buf()), e));
    }

    if let Some(path) = std::env::var_os(PDFIUM_LIB_PATH_ENV).filter(|p| !p.is_empty()) {
        let path = PathBuf::from(path);
        info!("Binding pdfium from {} ({PDFIUM_LIB_PATH_ENV})", path.display());
        return Pdfium::bind_to_library(&path).map_err(|e| failed(Some(path), e));
    }

    let local = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&local) {
        Ok(bindings) => {
            info!("Bound pdfium from {}", local.display());
            Ok(bindings)
        }
        Err(e) => {
            debug!("No pdfium at {}: {e:?}; trying system library", local.display());
            Pdfium::bind_to_system_library().map_err(|e| failed(None, e))
        }
    }
}

fn has_pdf_header(data: &[u8]) -> bool {
    let window = &data[..data.len().min(HEADER_SEARCH_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

impl DocumentDecoder for PdfiumDecoder {
    type Document<'a> = PdfiumDocument<'a>;

    fn open(&self, bytes: DocumentBytes) -> Result<PdfiumDocument<'_>, DecodeError> {
        let data = bytes.into_vec();
        if !has_pdf_header(&data) {
            return Err(DecodeError::corrupt("missing %PDF- header"));
        }

        let password = self.password.as_deref();
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(data, password)
            .map_err(|e| {
                let detail = format!("{e:?}");
                if detail.contains("Password") || detail.contains("password") {
                    if password.is_some() {
                        DecodeError::WrongPassword
                    } else {
                        DecodeError::PasswordRequired
                    }
                } else {
                    DecodeError::Corrupt { detail }
                }
            })?;

        let page_count = document.pages().len() as usize;
        debug!("pdfium opened document: {page_count} pages");
        Ok(PdfiumDocument {
            document: Some(document),
            page_count,
        })
    }
}

/// An open pdfium document. Closing drops the native handle.
pub struct PdfiumDocument<'a> {
    document: Option<PdfDocument<'a>>,
    page_count: usize,
}

impl PdfiumDocument<'_> {
    fn with_page<T>(
        &self,
        index: usize,
        f: impl FnOnce(&PdfPage) -> Result<T, PageRenderError>,
    ) -> Result<T, PageRenderError> {
        let load_err = |detail: String| PageRenderError::PageLoad { index, detail };
        let document = self
            .document
            .as_ref()
            .ok_or_else(|| load_err("document is closed".to_string()))?;
        if index >= self.page_count {
            return Err(load_err(format!("out of range (total={})", self.page_count)));
        }
        let idx = u16::try_from(index).map_err(|_| load_err("index exceeds u16".to_string()))?;
        let page = document
            .pages()
            .get(idx)
            .map_err(|e| load_err(format!("{e:?}")))?;
        f(&page)
    }
}

impl OpenDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_dimensions(&self, index: usize, scale: f32) -> Result<(u32, u32), PageRenderError> {
        let (w, h) = self.with_page(index, |page| {
            Ok((
                (page.width().value * scale).round().max(1.0),
                (page.height().value * scale).round().max(1.0),
            ))
        })?;
        if !w.is_finite() || !h.is_finite() || w > MAX_EDGE_PX || h > MAX_EDGE_PX {
            return Err(PageRenderError::InvalidDimensions {
                index,
                width: if w.is_finite() { w as u32 } else { 0 },
                height: if h.is_finite() { h as u32 } else { 0 },
            });
        }
        Ok((w as u32, h as u32))
    }

    fn rasterize_page(
        &self,
        index: usize,
        width: u32,
        height: u32,
        pixels: &mut [u8],
    ) -> Result<(), PageRenderError> {
        let raster_err = |detail: String| PageRenderError::Rasterisation { index, detail };
        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32);

        let image = self.with_page(index, |page| {
            page.render_with_config(&config)
                .map(|bitmap| bitmap.as_image().into_rgb8())
                .map_err(|e| raster_err(format!("{e:?}")))
        })?;
        if image.width() != width || image.height() != height {
            return Err(raster_err(format!(
                "produced {}x{} px, expected {width}x{height}",
                image.width(),
                image.height()
            )));
        }

        let raw = image.as_raw();
        if raw.len() != pixels.len() {
            return Err(PageRenderError::BufferSize {
                index,
                expected: pixels.len(),
                actual: raw.len(),
            });
        }
        pixels.copy_from_slice(raw);
        Ok(())
    }

    fn close(&mut self) {
        if self.document.take().is_some() {
            debug!("pdfium document closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.document.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shareable<T: DocumentDecoder + 'static>() {}

    #[test]
    fn decoder_is_shareable_across_workers() {
        assert_shareable::<PdfiumDecoder>();
        assert_shareable::<std::sync::Arc<PdfiumDecoder>>();
    }

    #[test]
    fn header_found_at_start_or_after_junk() {
        assert!(has_pdf_header(b"%PDF-1.7\n..."));
        let mut junk = vec![b' '; 200];
        junk.extend_from_slice(b"%PDF-1.4");
        assert!(has_pdf_header(&junk));
    }

    #[test]
    fn header_missing_or_too_late() {
        assert!(!has_pdf_header(b""));
        assert!(!has_pdf_header(b"This is not a PDF"));
        let mut late = vec![0u8; HEADER_SEARCH_WINDOW];
        late.extend_from_slice(b"%PDF-1.4");
        assert!(!has_pdf_header(&late));
    }

    #[test]
    fn bad_explicit_library_is_a_binding_error() {
        let err = PdfiumDecoder::bind(Some(Path::new("/nonexistent/libpdfium.so")))
            .err()
            .unwrap();
        match err {
            ViewerError::PdfiumBindingFailed { path, .. } => {
                assert_eq!(path, Some(PathBuf::from("/nonexistent/libpdfium.so")));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
