use crate::error::ProxyError;
use url::Url;

/// Validate a caller-supplied target and return it parsed.
///
/// Accepts only absolute `http://` and `https://` URLs with a host. Private
/// and loopback addresses are allowed: reaching origins the caller cannot
/// reach directly is the relay's whole purpose.
///
/// # Errors
/// Returns [`ProxyError::InvalidUrl`] for:
/// - A missing or blank `url` parameter
/// - Relative or unparseable URLs
/// - Non-HTTP(S) schemes
pub fn validate_target_url(raw: Option<&str>) -> Result<Url, ProxyError> {
    let raw = raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| ProxyError::InvalidUrl("missing required 'url' parameter".to_string()))?;

    let parsed =
        Url::parse(raw).map_err(|e| ProxyError::InvalidUrl(format!("{raw}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ProxyError::InvalidUrl(format!(
                "scheme '{scheme}' not allowed, only http/https permitted"
            )));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ProxyError::InvalidUrl(format!("no host in URL: {raw}")));
    }

    Ok(parsed)
}
