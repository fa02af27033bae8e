use crate::core::error::SourceError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("xrate/", env!("CARGO_PKG_VERSION"));

/// Client shared by all sources. The per-request timeout backs up the
/// per-source timeout applied by the fetch cycle.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

async fn get_text(
    client: &reqwest::Client,
    source_name: &str,
    url: &str,
) -> Result<String, SourceError> {
    debug!(source = source_name, "Requesting {}", url);
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(SourceError::Status {
            source_name: source_name.to_string(),
            status: response.status().as_u16(),
        });
    }

    Ok(response.text().await?)
}

fn parse_error(source_name: &str, e: impl std::fmt::Display) -> SourceError {
    SourceError::Parse {
        source_name: source_name.to_string(),
        message: e.to_string(),
    }
}

/// GETs `url` and decodes the JSON body, mapping failures to `SourceError`.
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    source_name: &str,
    url: &str,
) -> Result<T, SourceError> {
    let text = get_text(client, source_name, url).await?;
    serde_json::from_str(&text).map_err(|e| parse_error(source_name, e))
}

/// GETs `url` and decodes the XML body. Attributes map to `@`-prefixed
/// field names.
pub async fn get_xml<T: DeserializeOwned>(
    client: &reqwest::Client,
    source_name: &str,
    url: &str,
) -> Result<T, SourceError> {
    let text = get_text(client, source_name, url).await?;
    quick_xml::de::from_str(&text).map_err(|e| parse_error(source_name, e))
}

/// Parses a decimal price string, rejecting anything that is not a
/// positive finite number.
pub fn parse_price(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p > 0.0)
}

/// Strips the first matching quote-currency suffix from a venue symbol.
pub fn strip_quote_suffix<'a>(symbol: &'a str, suffixes: &[&str]) -> Option<&'a str> {
    suffixes
        .iter()
        .find_map(|suffix| symbol.strip_suffix(suffix))
        .filter(|base| !base.is_empty())
}
