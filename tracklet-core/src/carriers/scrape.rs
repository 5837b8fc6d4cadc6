//! Plain-HTTP scraping support shared by the web clients.

use reqwest::StatusCode;

use super::CarrierError;

/// Carriers serve different markup to obvious bots; present as a desktop
/// browser.
pub(crate) const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// GET a tracking page and hand back the body, mapping HTTP status onto
/// the carrier error taxonomy.
pub(crate) async fn fetch_page(
    http: &reqwest::Client,
    url: &str,
) -> Result<String, CarrierError> {
    let response = http
        .get(url)
        .header("Accept", "text/html,application/xhtml+xml")
        .header("Accept-Language", "en-US,en;q=0.9")
        .send()
        .await?;

    match response.status() {
        StatusCode::OK => Ok(response.text().await?),
        StatusCode::NOT_FOUND => Err(CarrierError::NotFound(format!(
            "tracking page returned 404 for {url}"
        ))),
        StatusCode::TOO_MANY_REQUESTS => Err(CarrierError::RateLimited(
            format!("tracking page throttled {url}"),
        )),
        status if status.is_server_error() => Err(
            CarrierError::Transient(format!("{status} from {url}")),
        ),
        status => Err(CarrierError::Permanent(format!(
            "{status} from {url}"
        ))),
    }
}

/// Decode the handful of HTML entities that show up in carrier event text.
pub(crate) fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Collapse runs of whitespace left behind by tag stripping.
pub(crate) fn tidy_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
