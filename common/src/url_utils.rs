use anyhow::anyhow;
use url::Url;

/// Validate an HTTP-probe target. Only http and https URLs are accepted.
pub fn validate_probe_url(addr: &str) -> anyhow::Result<Url> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(anyhow!("URL cannot be empty"));
    }

    if addr.contains('\0') || addr.contains('\r') || addr.contains('\n') {
        return Err(anyhow!("URL contains invalid control characters"));
    }

    let parsed = Url::parse(addr).map_err(|e| anyhow!("invalid URL format: {}", e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("invalid url scheme: '{}' in address", other)),
    }

    Ok(parsed)
}

/// Base URL for a peer call. IPv6 addresses get bracketed.
pub fn peer_base_url(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("http://[{}]:{}", ip, port)
    } else {
        format!("http://{}:{}", ip, port)
    }
}
