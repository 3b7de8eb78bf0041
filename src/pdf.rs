use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use tracing::{info, warn};

/// How long to leave the tab alone after navigation so the embedded chart
/// scripts finish drawing before print.
const RENDER_SETTLE: Duration = Duration::from_secs(3);

/// Renders HTML to PDF through a pooled headless browser. The browser is
/// launched lazily on first use and reused across renders; a dead instance
/// is replaced transparently on the next call.
#[derive(Clone)]
pub struct PdfRenderer {
    browser: Arc<Mutex<Option<Browser>>>,
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfRenderer {
    pub fn new() -> Self {
        Self { browser: Arc::new(Mutex::new(None)) }
    }

    /// Renders on the blocking pool; the devtools protocol client is
    /// synchronous.
    pub async fn render(&self, html: String) -> Result<Vec<u8>> {
        let slot = Arc::clone(&self.browser);
        tokio::task::spawn_blocking(move || render_with_pool(&slot, &html))
            .await
            .context("PDF render task panicked")?
    }
}

fn render_with_pool(slot: &Mutex<Option<Browser>>, html: &str) -> Result<Vec<u8>> {
    let mut guard = slot
        .lock()
        .map_err(|_| anyhow!("PDF renderer lock poisoned"))?;

    if let Some(browser) = guard.as_ref() {
        match print_to_pdf(browser, html) {
            Ok(pdf) => return Ok(pdf),
            Err(e) => {
                warn!("Pooled browser failed, relaunching: {:#}", e);
            }
        }
    }

    let browser = launch_browser()?;
    let pdf = print_to_pdf(&browser, html);
    *guard = Some(browser);
    pdf
}

fn launch_browser() -> Result<Browser> {
    info!("Launching headless browser for PDF rendering");
    let options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .build()
        .map_err(|e| anyhow!("Failed to build browser launch options: {}", e))?;
    Browser::new(options).context("Failed to launch headless browser")
}

fn print_to_pdf(browser: &Browser, html: &str) -> Result<Vec<u8>> {
    let tab = browser.new_tab()?;
    let url = format!("data:text/html;charset=utf-8,{}", urlencoding::encode(html));
    tab.navigate_to(&url)?;
    tab.wait_until_navigated()?;
    std::thread::sleep(RENDER_SETTLE);

    let pdf = tab.print_to_pdf(Some(a4_options()))?;
    let _ = tab.close(true);
    Ok(pdf)
}

/// A4 portrait with 20mm vertical and 15mm horizontal margins, in inches.
fn a4_options() -> PrintToPdfOptions {
    PrintToPdfOptions {
        print_background: Some(true),
        paper_width: Some(8.27),
        paper_height: Some(11.69),
        margin_top: Some(0.79),
        margin_bottom: Some(0.79),
        margin_left: Some(0.59),
        margin_right: Some(0.59),
        ..Default::default()
    }
}
