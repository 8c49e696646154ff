//! Configuration types for the retrieval pipeline.
//!
//! Two structs split what is fixed at process start from what may vary per
//! pipeline:
//!
//! * [`StoreConfig`]: the connection string and container name. Both are
//!   required; their absence is a startup error, never a per-request one.
//! * [`ViewerConfig`]: extension filter, render options, timeouts and the
//!   optional progress callback, built through [`ViewerConfigBuilder`].

use crate::error::ViewerError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable holding the store connection string.
pub const CONNECTION_STRING_ENV: &str = "AZURE_CONNECTION_STRING";

/// Environment variable holding the container name.
pub const CONTAINER_ENV: &str = "NEXUS_CONTAINER";

/// Upper bound for [`RenderOptions::scale`].
pub const MAX_SCALE: f32 = 10.0;

// ── Store configuration ──────────────────────────────────────────────────

/// Where the documents live.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Azure storage connection string, or `file:///path` for a local
    /// directory acting as the store.
    pub connection_string: String,
    /// Container (or sub-directory for `file://` stores) to list.
    pub container: String,
}

impl StoreConfig {
    pub fn new(connection_string: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            container: container.into(),
        }
    }

    /// Read both values from the process environment.
    pub fn from_env() -> Result<Self, ViewerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read both values through `lookup`; blank values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ViewerError> {
        let fetch = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ViewerError::MissingConfig { name })
        };
        Ok(Self {
            connection_string: fetch(CONNECTION_STRING_ENV)?,
            container: fetch(CONTAINER_ENV)?,
        })
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Connection strings carry account keys.
        f.debug_struct("StoreConfig")
            .field("connection_string", &"<redacted>")
            .field("container", &self.container)
            .finish()
    }
}

// ── Render options ───────────────────────────────────────────────────────

/// Pixel layout of a rendered page. RGB is the only supported layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    /// 8-bit red, green, blue; no alpha, no row padding.
    #[default]
    Rgb,
}

impl ColorSpace {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorSpace::Rgb => 3,
        }
    }
}

/// Settings recognised by [`crate::render::PageRenderer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Multiplier on the page's native size. 1.0 renders one pixel per PDF
    /// point (72 DPI).
    pub scale: f32,
    pub color_space: ColorSpace,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            color_space: ColorSpace::Rgb,
        }
    }
}

impl RenderOptions {
    pub fn with_scale(scale: f32) -> Self {
        Self {
            scale,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ViewerError> {
        if !self.scale.is_finite() || self.scale <= 0.0 || self.scale > MAX_SCALE {
            return Err(ViewerError::InvalidConfig(format!(
                "scale must be in (0, {MAX_SCALE}], got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

// ── Viewer configuration ─────────────────────────────────────────────────

/// Configuration for a [`crate::pipeline::RetrievalPipeline`].
///
/// # Example
/// ```rust
/// use nexus_viewer::ViewerConfig;
///
/// let config = ViewerConfig::builder()
///     .scale(1.5)
///     .store_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.render.scale, 1.5);
/// ```
#[derive(Clone)]
pub struct ViewerConfig {
    /// Case-sensitive suffix a blob name must end with. Default: `.pdf`.
    pub extension: String,

    /// Scale and colour space used for every page. Default: 1.0, RGB.
    pub render: RenderOptions,

    /// Bound on each list/fetch round-trip in seconds. Default: 60.
    pub store_timeout_secs: u64,

    /// Bound on opening a document in seconds. Default: 30.
    pub open_timeout_secs: u64,

    /// Rendered pages buffered ahead of the consumer. Default: 2.
    ///
    /// Keeps at most this many page buffers in memory besides the one the
    /// consumer is holding.
    pub page_buffer: usize,

    /// User password for encrypted PDFs.
    pub password: Option<String>,

    /// Explicit pdfium library path; falls back to `PDFIUM_LIB_PATH` and the
    /// system loader when unset.
    pub pdfium_library: Option<PathBuf>,

    /// Optional per-page event sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            extension: ".pdf".to_string(),
            render: RenderOptions::default(),
            store_timeout_secs: 60,
            open_timeout_secs: 30,
            page_buffer: 2,
            password: None,
            pdfium_library: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ViewerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerConfig")
            .field("extension", &self.extension)
            .field("render", &self.render)
            .field("store_timeout_secs", &self.store_timeout_secs)
            .field("open_timeout_secs", &self.open_timeout_secs)
            .field("page_buffer", &self.page_buffer)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_library", &self.pdfium_library)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn RenderProgressCallback>"),
            )
            .finish()
    }
}

impl ViewerConfig {
    pub fn builder() -> ViewerConfigBuilder {
        ViewerConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    /// Repair values that bypassed [`ViewerConfigBuilder::build`] through the
    /// public fields.
    ///
    /// Zero buffers and timeouts are raised to 1, an out-of-range scale is
    /// clamped (or reset to 1.0 when not a positive finite number) and an
    /// empty extension falls back to `.pdf`. Each repair is logged.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.page_buffer == 0 {
            warn!("page_buffer 0 raised to 1");
            self.page_buffer = 1;
        }
        if self.store_timeout_secs == 0 {
            warn!("store_timeout_secs 0 raised to 1");
            self.store_timeout_secs = 1;
        }
        if self.open_timeout_secs == 0 {
            warn!("open_timeout_secs 0 raised to 1");
            self.open_timeout_secs = 1;
        }
        let scale = self.render.scale;
        if !scale.is_finite() || scale <= 0.0 {
            warn!("scale {} replaced by {}", scale, defaults.render.scale);
            self.render.scale = defaults.render.scale;
        } else if scale > MAX_SCALE {
            warn!("scale {} clamped to {}", scale, MAX_SCALE);
            self.render.scale = MAX_SCALE;
        }
        if self.extension.is_empty() {
            warn!("empty extension replaced by '{}'", defaults.extension);
            self.extension = defaults.extension;
        }
        self
    }
}

/// Builder for [`ViewerConfig`].
#[derive(Debug)]
pub struct ViewerConfigBuilder {
    config: ViewerConfig,
}

impl ViewerConfigBuilder {
    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.config.extension = ext.into();
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.config.render.scale = scale;
        self
    }

    pub fn render_options(mut self, options: RenderOptions) -> Self {
        self.config.render = options;
        self
    }

    pub fn store_timeout_secs(mut self, secs: u64) -> Self {
        self.config.store_timeout_secs = secs;
        self
    }

    pub fn open_timeout_secs(mut self, secs: u64) -> Self {
        self.config.open_timeout_secs = secs;
        self
    }

    pub fn page_buffer(mut self, n: usize) -> Self {
        self.config.page_buffer = n.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ViewerConfig, ViewerError> {
        let c = &self.config;
        if c.extension.is_empty() {
            return Err(ViewerError::InvalidConfig(
                "document extension must not be empty".into(),
            ));
        }
        c.render.validate()?;
        if c.store_timeout_secs == 0 || c.open_timeout_secs == 0 {
            return Err(ViewerError::InvalidConfig("timeouts must be ≥ 1s".into()));
        }
        Ok(self.config)
    }
}
