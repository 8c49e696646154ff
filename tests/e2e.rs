//! End-to-end tests against a real pdfium library.
//!
//! PDFs are generated on the fly, written to a temporary directory and
//! served through the `file://` store, so the whole path from connection
//! string to RGB pixels is exercised. Gated behind `E2E_ENABLED` because a
//! pdfium shared library must be available.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test e2e -- --nocapture

use futures::StreamExt;
use nexus_viewer::decoder::{PdfiumDecoder, TrackedDecoder};
use nexus_viewer::{
    encode, store, BlobStore, DocumentBytes, DocumentDecoder, ErrorKind, OpenDocument,
    PageRenderer, PipelineState, RetrievalPipeline, Stage, StoreConfig, ViewerConfig,
};
use std::path::Path;
use std::sync::{Arc, OnceLock};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// pdfium can be bound once per process; every test shares this decoder.
fn shared_decoder() -> Option<Arc<PdfiumDecoder>> {
    static DECODER: OnceLock<Option<Arc<PdfiumDecoder>>> = OnceLock::new();
    DECODER
        .get_or_init(|| match PdfiumDecoder::bind(None) {
            Ok(d) => Some(Arc::new(d)),
            Err(e) => {
                println!("pdfium unavailable: {e}");
                None
            }
        })
        .clone()
}

/// Skip unless E2E_ENABLED is set and pdfium can be bound.
macro_rules! e2e_decoder_or_skip {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        match shared_decoder() {
            Some(d) => d,
            None => {
                println!("SKIP — pdfium could not be bound");
                return;
            }
        }
    }};
}

/// A minimal valid PDF with one page per `(width, height)` in points.
///
/// Each page draws a black rectangle in its lower-left quarter so rendered
/// output is not uniformly white.
fn make_pdf(pages: &[(u32, u32)]) -> Vec<u8> {
    let mut objects: Vec<String> = Vec::new();
    let n = pages.len();
    // 1: catalog, 2: pages, then (page, content) pairs.
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        n
    ));
    for (i, (w, h)) in pages.iter().enumerate() {
        let content_id = 4 + 2 * i;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {w} {h}] /Contents {content_id} 0 R >>"
        ));
        let stream = format!("0 0 0 rg 0 0 {} {} re f", w / 2, h / 2);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for off in offsets {
        out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}

fn file_store(root: &Path) -> Arc<dyn BlobStore> {
    let config = StoreConfig::new(format!("file://{}", root.display()), "salesdata");
    let store = store::connect(&config, std::time::Duration::from_secs(5)).expect("file store");
    Arc::from(store)
}

fn write_container(root: &Path, files: &[(&str, Vec<u8>)]) {
    let dir = root.join("salesdata");
    std::fs::create_dir_all(&dir).unwrap();
    for (name, data) in files {
        std::fs::write(dir.join(name), data).unwrap();
    }
}

// ── Decoder tests ────────────────────────────────────────────────────────────

#[test]
fn test_pdfium_page_count_and_dimensions() {
    let decoder = e2e_decoder_or_skip!();
    let doc = decoder
        .open(DocumentBytes::new(make_pdf(&[(612, 792), (792, 612)])))
        .expect("generated PDF should open");

    assert_eq!(doc.page_count(), 2);
    assert_eq!(doc.page_dimensions(0, 1.0).unwrap(), (612, 792));
    assert_eq!(doc.page_dimensions(1, 1.0).unwrap(), (792, 612));
    assert_eq!(doc.page_dimensions(0, 0.5).unwrap(), (306, 396));
}

#[test]
fn test_pdfium_renders_exact_rgb_buffers() {
    let decoder = e2e_decoder_or_skip!();
    let doc = decoder
        .open(DocumentBytes::new(make_pdf(&[(200, 100)])))
        .unwrap();

    for scale in [1.0_f32, 1.5, 2.0] {
        let page = PageRenderer::new(nexus_viewer::RenderOptions::with_scale(scale))
            .render_page(&doc, 0)
            .expect("page should render");
        assert_eq!(
            page.pixels().len(),
            page.width() as usize * page.height() as usize * 3
        );

        // Lower-left is the black rectangle, upper-right is white paper.
        let px = |x: u32, y: u32| {
            let i = (y as usize * page.width() as usize + x as usize) * 3;
            &page.pixels()[i..i + 3]
        };
        assert!(px(2, page.height() - 3).iter().all(|&c| c < 64), "scale {scale}");
        assert!(px(page.width() - 3, 2).iter().all(|&c| c > 192), "scale {scale}");
    }
}

#[test]
fn test_pdfium_rejects_non_pdf_without_leaking() {
    let decoder = TrackedDecoder::new(e2e_decoder_or_skip!());

    assert!(decoder
        .open(DocumentBytes::new(b"This is not a PDF".to_vec()))
        .is_err());
    let mut truncated = make_pdf(&[(612, 792)]);
    truncated.truncate(40);
    assert!(decoder.open(DocumentBytes::new(truncated)).is_err());

    assert_eq!(decoder.counters().failed_opens(), 2);
    assert_eq!(decoder.counters().live(), 0);
}

#[test]
fn test_pdfium_open_twice_independent() {
    let decoder = e2e_decoder_or_skip!();
    let bytes = DocumentBytes::new(make_pdf(&[(100, 100), (100, 100)]));

    let mut a = decoder.open(bytes.clone()).unwrap();
    let b = decoder.open(bytes).unwrap();
    a.close();
    a.close();
    assert!(a.is_closed());
    assert_eq!(b.page_count(), 2);
    assert!(PageRenderer::default().render_page(&b, 1).is_ok());
    assert!(PageRenderer::default().render_page(&a, 0).is_err());
}

// ── Full pipeline over the file store ───────────────────────────────────────

#[tokio::test]
async fn test_pipeline_lists_and_renders_generated_reports() {
    let decoder = e2e_decoder_or_skip!();
    let tmp = tempfile::tempdir().unwrap();
    write_container(
        tmp.path(),
        &[
            ("Q1.pdf", make_pdf(&[(612, 792); 3])),
            ("notes.txt", b"not a report".to_vec()),
            ("Q2.PDF", make_pdf(&[(612, 792)])),
        ],
    );

    let mut pipeline = RetrievalPipeline::new(
        file_store(tmp.path()),
        decoder,
        ViewerConfig::default(),
    );

    let docs = pipeline.list().await.unwrap();
    let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["Q1.pdf"]);

    let mut session = pipeline.select("Q1.pdf").await.unwrap();
    assert_eq!(session.page_count(), 3);
    let mut expected = 0;
    while let Some(page) = session.next().await {
        let page = page.expect("generated page should render");
        assert_eq!(page.index(), expected);
        assert_eq!((page.width(), page.height()), (612, 792));

        let png = encode::encode_png(&page).unwrap();
        assert!(png.starts_with(b"\x89PNG"));
        expected += 1;
    }
    assert_eq!(expected, 3);

    let mut rx = pipeline.subscribe();
    let state = rx.wait_for(|s| s.is_terminal()).await.unwrap().clone();
    assert_eq!(
        state,
        PipelineState::Done {
            name: "Q1.pdf".into(),
            rendered: 3,
            failed: 0
        }
    );
}

#[tokio::test]
async fn test_pipeline_reports_corrupt_blob_and_missing_blob() {
    let decoder = e2e_decoder_or_skip!();
    let tmp = tempfile::tempdir().unwrap();
    write_container(tmp.path(), &[("broken.pdf", b"%PDF-1.4\ngarbage".to_vec())]);

    let mut pipeline = RetrievalPipeline::new(
        file_store(tmp.path()),
        decoder,
        ViewerConfig::default(),
    );

    let corrupt = pipeline.select("broken.pdf").await.unwrap_err();
    assert_eq!(corrupt.stage, Stage::Decoding);
    assert_eq!(corrupt.kind, ErrorKind::CorruptDocument);

    let missing = pipeline.select("gone.pdf").await.unwrap_err();
    assert_eq!(missing.stage, Stage::Fetching);
    assert_eq!(missing.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_pipeline_zero_page_pdf_is_empty() {
    let decoder = e2e_decoder_or_skip!();
    let tmp = tempfile::tempdir().unwrap();
    write_container(tmp.path(), &[("blank.pdf", make_pdf(&[]))]);

    let mut pipeline = RetrievalPipeline::new(
        file_store(tmp.path()),
        decoder,
        ViewerConfig::default(),
    );

    match pipeline.select("blank.pdf").await {
        Ok(session) => {
            let doc = session.collect().await;
            assert!(doc.pages.is_empty());
            assert!(doc.failures.is_empty());
        }
        // Some pdfium builds refuse an empty page tree outright.
        Err(f) => assert_eq!(f.kind, ErrorKind::CorruptDocument),
    }
}
