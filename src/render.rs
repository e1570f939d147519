//! Headless browser rendering for client-rendered pages.
//!
//! The arena schedule is sometimes built by JavaScript, in which case the
//! plain HTTP response contains no table. [`PageRenderer`] is the capability
//! used to get the post-script DOM instead. The default implementation drives
//! a locally installed Chromium-family browser in headless mode and reads the
//! serialized DOM from stdout.
//!
//! A missing browser is not an error: [`ChromeRenderer::discover`] returns
//! `None` and the scrape simply yields nothing for that run.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Binary names probed on `PATH`, in order.
const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

/// Milliseconds of virtual time the page gets to settle its network activity
/// before the DOM is dumped.
const VIRTUAL_TIME_BUDGET_MS: u32 = 10_000;

/// Renders a URL and returns the resulting DOM as HTML.
pub trait PageRenderer {
    async fn render(&self, url: &str) -> Result<String, Box<dyn Error>>;
}

/// [`PageRenderer`] backed by `chromium --headless --dump-dom`.
#[derive(Debug, Clone)]
pub struct ChromeRenderer {
    binary: PathBuf,
    timeout: Duration,
}

impl ChromeRenderer {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Locate a browser: the explicit path if it exists, else the first
    /// candidate on `PATH`.
    pub fn discover(explicit: Option<&str>, timeout: Duration) -> Option<Self> {
        Self::discover_among(explicit, BROWSER_CANDIDATES, timeout)
    }

    fn discover_among(
        explicit: Option<&str>,
        candidates: &[&str],
        timeout: Duration,
    ) -> Option<Self> {
        if let Some(path) = explicit {
            if Path::new(path).exists() {
                return Some(Self::new(path, timeout));
            }
            warn!(path, "Configured browser does not exist; probing PATH");
        }
        for name in candidates {
            if let Ok(found) = which::which(name) {
                debug!(path = %found.display(), "Found headless browser");
                return Some(Self::new(found, timeout));
            }
        }
        info!("No headless browser found; render fallback disabled");
        None
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl PageRenderer for ChromeRenderer {
    #[instrument(level = "info", skip(self), fields(browser = %self.binary.display()))]
    async fn render(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let child = Command::new(&self.binary)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg(format!("--virtual-time-budget={VIRTUAL_TIME_BUDGET_MS}"))
            .arg("--dump-dom")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("render timed out after {:?}", self.timeout))??;

        if !output.status.success() {
            return Err(format!("browser exited with {}", output.status).into());
        }
        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        info!(bytes = html.len(), "Rendered page");
        Ok(html)
    }
}
