//! Target URL validation.

use reqwest::Url;

/// Parse a user-entered target into an absolute http(s) URL.
///
/// The raw text is tried first; if that fails (or yields something other
/// than an http(s) URL with a host) and the text carries no `://`,
/// `https://` is prepended and parsing is retried. The error carries the
/// reason from the last attempt.
pub fn normalize(raw: &str) -> Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("target is empty".to_string());
    }

    match parse_web_url(trimmed) {
        Ok(url) => Ok(url),
        // An explicit scheme separator means the caller chose a scheme.
        Err(e) if trimmed.contains("://") => Err(e),
        Err(_) => parse_web_url(&format!("https://{}", trimmed)),
    }
}

fn parse_web_url(candidate: &str) -> Result<Url, String> {
    let url = Url::parse(candidate).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err("URL has no host".to_string()),
    }
}
