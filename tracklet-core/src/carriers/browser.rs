//! Headless-browser page fetching for carriers whose tracking pages only
//! render under JavaScript.

use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions};
use tracing::debug;

use super::CarrierError;

/// How long the tab may spend rendering before we read the DOM.
const RENDER_WAIT: Duration = Duration::from_secs(8);

/// Navigation timeout inside the browser; the caller's outer deadline
/// still applies on top.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Load `url` in a headless Chrome tab and return the rendered DOM.
///
/// headless_chrome is a blocking API, so the whole session runs on the
/// blocking pool. Browser startup failures (no Chrome binary on the host)
/// surface as transient errors so the fallback strategy gets its turn.
pub(crate) async fn rendered_page(
    url: String,
) -> Result<String, CarrierError> {
    debug!(%url, "headless browser fetch");
    tokio::task::spawn_blocking(move || fetch_blocking(&url))
        .await
        .map_err(|e| {
            CarrierError::Transient(format!("browser task panicked: {e}"))
        })?
}

fn fetch_blocking(url: &str) -> Result<String, CarrierError> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .idle_browser_timeout(NAVIGATION_TIMEOUT)
        .build()
        .map_err(|e| {
            CarrierError::Transient(format!(
                "browser launch options: {e}"
            ))
        })?;

    let browser = Browser::new(options).map_err(|e| {
        CarrierError::Transient(format!("browser launch failed: {e}"))
    })?;

    let tab = browser.new_tab().map_err(|e| {
        CarrierError::Transient(format!("browser tab failed: {e}"))
    })?;

    tab.navigate_to(url)
        .and_then(|t| t.wait_until_navigated())
        .map_err(|e| {
            CarrierError::Transient(format!("navigation failed: {e}"))
        })?;

    // Tracking pages populate event lists after load; give the scripts a
    // beat before reading the DOM.
    std::thread::sleep(RENDER_WAIT);

    tab.get_content().map_err(|e| {
        CarrierError::Transient(format!("could not read page: {e}"))
    })
}
