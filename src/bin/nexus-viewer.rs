//! CLI binary for nexus-viewer.
//!
//! A thin shim over the library crate: maps flags to `StoreConfig` and
//! `ViewerConfig`, lists the container, renders the chosen report and
//! writes its pages as PNG files and/or an HTML gallery.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use nexus_viewer::config::{CONNECTION_STRING_ENV, CONTAINER_ENV};
use nexus_viewer::decoder::PdfiumDecoder;
use nexus_viewer::{
    encode, store, ErrorKind, PipelineFailure, ProgressCallback, RenderProgressCallback,
    RenderedPage, RetrievalPipeline, StoreConfig, ViewerConfig,
};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const NO_REPORTS: &str = "No PDF reports found in the container.";

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    /// When the previous page finished, for per-page timings.
    last_tick: Mutex<Instant>,
}

impl CliProgressCallback {
    /// Spinner until `on_render_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Fetching report…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            last_tick: Mutex::new(Instant::now()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }

    fn lap(&self) -> f64 {
        let mut last = self.last_tick.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = last.elapsed().as_secs_f64();
        *last = Instant::now();
        elapsed
    }

    fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_render_start(&self, name: &str, total_pages: usize) {
        self.activate_bar(total_pages);
        self.lap();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {name} ({total_pages} pages)…"))
        ));
    }

    fn on_page_complete(&self, index: usize, total: usize, width: u32, height: u32) {
        let secs = self.lap();
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{width}x{height} px")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.lap();

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_render_complete(&self, total_pages: usize, rendered: usize, failed: usize) {
        self.bar.finish_and_clear();

        if failed == 0 && rendered == total_pages {
            eprintln!(
                "{} {} pages rendered",
                green("✔"),
                bold(&rendered.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages rendered  ({} failed)",
                if rendered == 0 { red("✘") } else { cyan("⚠") },
                bold(&rendered.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List the reports in the container
  nexus-viewer --list

  # Render the first report to ./pages/page-0001.png, ...
  nexus-viewer

  # Render a specific report at 2x into a directory and an HTML gallery
  nexus-viewer Q1.pdf --scale 2 -o q1-pages --html q1.html

  # Browse a local directory instead of Azure
  nexus-viewer --connection-string file:///srv/reports --container salesdata --list

  # Machine-readable summary
  nexus-viewer Q1.pdf --json > summary.json

ENVIRONMENT VARIABLES:
  AZURE_CONNECTION_STRING  Storage connection string (or file:///path)
  NEXUS_CONTAINER          Container holding the reports
  PDFIUM_LIB_PATH          Path to libpdfium; otherwise ./ then the system loader
  RUST_LOG                 Overrides the log filter
"#;

/// List and render PDF reports stored in a blob container.
#[derive(Parser, Debug)]
#[command(
    name = "nexus-viewer",
    version,
    about = "List and render PDF reports stored in a blob container",
    long_about = "Lists the PDF reports in an Azure Blob Storage container (or a local \
directory), fetches the chosen one and renders every page to an RGB raster, written as PNG \
files and optionally an HTML gallery.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Report to render. Defaults to the first report listed.
    document: Option<String>,

    /// Storage connection string, or file:///path for a local directory.
    #[arg(long, env = CONNECTION_STRING_ENV, hide_env_values = true)]
    connection_string: Option<String>,

    /// Container holding the reports.
    #[arg(long, env = CONTAINER_ENV)]
    container: Option<String>,

    /// Only list the reports in the container.
    #[arg(long)]
    list: bool,

    /// Directory for page-NNNN.png files.
    #[arg(short, long, env = "NEXUS_OUTPUT_DIR", default_value = "pages")]
    output: PathBuf,

    /// Skip writing PNG files.
    #[arg(long)]
    no_png: bool,

    /// Also write an HTML gallery with every page inline.
    #[arg(long, env = "NEXUS_HTML")]
    html: Option<PathBuf>,

    /// Pixels per PDF point (1.0 = 72 DPI).
    #[arg(long, env = "NEXUS_SCALE", default_value_t = 1.0)]
    scale: f32,

    /// Suffix a blob name must end with (case-sensitive).
    #[arg(long, env = "NEXUS_EXTENSION", default_value = ".pdf")]
    extension: String,

    /// Timeout for each store round-trip in seconds.
    #[arg(long, env = "NEXUS_STORE_TIMEOUT", default_value_t = 60)]
    store_timeout: u64,

    /// Timeout for opening a document in seconds.
    #[arg(long, env = "NEXUS_OPEN_TIMEOUT", default_value_t = 30)]
    open_timeout: u64,

    /// Path to the pdfium shared library.
    #[arg(long)]
    pdfium_lib: Option<PathBuf>,

    /// User password for encrypted reports.
    #[arg(long, env = "NEXUS_PDF_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Output a JSON summary instead of human-readable text.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "NEXUS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "NEXUS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "NEXUS_QUIET")]
    quiet: bool,
}

#[derive(Serialize)]
struct PageRecord {
    page: usize,
    width: u32,
    height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<PathBuf>,
}

#[derive(Serialize)]
struct RenderSummary<'a> {
    document: &'a str,
    page_count: usize,
    pages: Vec<PageRecord>,
    failures: Vec<PipelineFailure>,
    elapsed_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.list;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let store_config = StoreConfig::from_lookup(|name| match name {
        CONNECTION_STRING_ENV => cli.connection_string.clone(),
        CONTAINER_ENV => cli.container.clone(),
        _ => None,
    })
    .context("Missing store configuration")?;

    let progress = show_progress.then(CliProgressCallback::new_dynamic);
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as ProgressCallback),
    )?;

    let store: Arc<dyn store::BlobStore> = Arc::from(
        store::connect(&store_config, config.store_timeout())
            .context("Failed to set up the blob store")?,
    );
    let decoder = Arc::new(PdfiumDecoder::from_config(&config).context("PDF engine unavailable")?);
    let mut pipeline = RetrievalPipeline::new(store, decoder, config);

    // ── List ─────────────────────────────────────────────────────────────
    let documents = pipeline
        .list()
        .await
        .with_context(|| format!("Could not list container '{}'", store_config.container))?;

    if cli.list {
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&documents).context("Failed to serialise listing")?
            );
        } else if documents.is_empty() {
            eprintln!("{}", cyan(NO_REPORTS));
        } else {
            for doc in &documents {
                println!("{doc}");
            }
        }
        return Ok(());
    }

    let selected = match (&cli.document, documents.first()) {
        (Some(name), _) => name.clone(),
        (None, Some(first)) => first.name.clone(),
        (None, None) => {
            if let Some(cb) = &progress {
                cb.abandon();
            }
            if !cli.quiet {
                eprintln!("{}", cyan(NO_REPORTS));
            }
            return Ok(());
        }
    };

    // ── Render ───────────────────────────────────────────────────────────
    let started = Instant::now();
    let mut session = match pipeline.select(&selected).await {
        Ok(session) => session,
        Err(failure) => {
            if let Some(cb) = &progress {
                cb.abandon();
            }
            return Err(explain(failure, &selected));
        }
    };

    if !cli.no_png {
        std::fs::create_dir_all(&cli.output)
            .with_context(|| format!("Failed to create {}", cli.output.display()))?;
    }
    let mut gallery = match &cli.html {
        Some(path) => Some(Gallery::create(path, &selected)?),
        None => None,
    };

    let mut summary = RenderSummary {
        document: &selected,
        page_count: session.page_count(),
        pages: Vec::with_capacity(session.page_count()),
        failures: Vec::new(),
        elapsed_ms: 0,
    };

    while let Some(item) = session.next().await {
        match item {
            Ok(page) => {
                let file = if cli.no_png {
                    None
                } else {
                    Some(write_png(&page, &cli.output)?)
                };
                if let Some(g) = gallery.as_mut() {
                    g.add(&page)?;
                }
                summary.pages.push(PageRecord {
                    page: page.number(),
                    width: page.width(),
                    height: page.height(),
                    file,
                });
            }
            Err(failure) => summary.failures.push(failure),
        }
    }
    summary.elapsed_ms = started.elapsed().as_millis() as u64;

    if let Some(g) = gallery {
        g.finish()?;
    }

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        if !show_progress {
            eprintln!(
                "Rendered {}/{} pages of {} in {}ms",
                summary.pages.len(),
                summary.page_count,
                selected,
                summary.elapsed_ms
            );
            for f in &summary.failures {
                eprintln!("  {} {}", red("✗"), f);
            }
        }
        if !cli.no_png && !summary.pages.is_empty() {
            eprintln!("   {}", dim(&format!("pages → {}", cli.output.display())));
        }
        if let Some(path) = &cli.html {
            eprintln!("   {}", dim(&format!("gallery → {}", path.display())));
        }
    }

    if let Some(stop) = summary
        .failures
        .iter()
        .find(|f| f.kind != ErrorKind::PageRender)
    {
        anyhow::bail!("Rendering stopped early: {stop}");
    }
    Ok(())
}

/// Map CLI args to `ViewerConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ViewerConfig> {
    let mut builder = ViewerConfig::builder()
        .extension(cli.extension.clone())
        .scale(cli.scale)
        .store_timeout_secs(cli.store_timeout)
        .open_timeout_secs(cli.open_timeout);

    if let Some(pwd) = &cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(lib) = &cli.pdfium_lib {
        builder = builder.pdfium_library(lib.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Turn a pipeline failure into a user-facing error with a hint.
fn explain(failure: PipelineFailure, name: &str) -> anyhow::Error {
    let hint = match failure.kind {
        ErrorKind::NotFound => "check the name with --list",
        ErrorKind::StoreUnavailable => "the store may be unreachable; retrying can help",
        ErrorKind::CorruptDocument => "the report could not be opened as a PDF",
        _ => "",
    };
    let err = anyhow::Error::new(failure).context(format!("Failed to render '{name}'"));
    if hint.is_empty() {
        err
    } else {
        err.context(hint.to_string())
    }
}

fn write_png(page: &RenderedPage, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(encode::page_file_name(page));
    let png = encode::encode_png(page)
        .with_context(|| format!("Failed to encode page {}", page.number()))?;
    std::fs::write(&path, png).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Self-contained HTML page, written as pages arrive.
struct Gallery {
    out: BufWriter<File>,
}

impl Gallery {
    fn create(path: &Path, title: &str) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        let title = escape_html(title);
        write!(
            out,
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
             <style>body{{font-family:sans-serif;max-width:60rem;margin:auto}}\
             figure{{margin:2rem 0}}img{{max-width:100%;border:1px solid #ddd}}\
             figcaption{{color:#666;text-align:center}}</style>\n</head>\n<body>\n\
             <h1>{title}</h1>\n"
        )?;
        Ok(Self { out })
    }

    fn add(&mut self, page: &RenderedPage) -> Result<()> {
        let uri = encode::encode_data_uri(page)
            .with_context(|| format!("Failed to encode page {}", page.number()))?;
        writeln!(
            self.out,
            "<figure><img src=\"{uri}\" width=\"{}\" height=\"{}\" alt=\"Page {n}\">\
             <figcaption>Page {n}</figcaption></figure>",
            page.width(),
            page.height(),
            n = page.number(),
        )?;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        writeln!(self.out, "</body>\n</html>")?;
        self.out.flush().context("Failed to write gallery")
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
