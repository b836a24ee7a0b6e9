use url::Url;

/// Domain key shared by every URL whose host cannot be determined
pub const UNDEFINED_DOMAIN: &str = "undefined";

/// Longest accepted domain key, leaving room for log suffixes under the
/// usual 255-byte file name limit
pub const MAX_DOMAIN_KEY_LEN: usize = 200;

/// Extracts the domain key from a parsed URL
///
/// The host is lowercased and a leading `www.` is removed. Hosts containing
/// anything other than ASCII letters, digits, `.` and `-` (IPv6 literals, for
/// instance) are rejected, as are keys longer than [`MAX_DOMAIN_KEY_LEN`].
///
/// # Arguments
///
/// * `url` - The URL to extract the domain from
///
/// # Returns
///
/// * `Some(String)` - The domain key
/// * `None` - If the URL has no usable host
///
/// # Examples
///
/// ```
/// use url::Url;
/// use onion_crawler::url::extract_domain;
///
/// let url = Url::parse("http://WWW.Example.onion/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.onion".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    if !host
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return None;
    }

    let key = match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    };

    // The key doubles as a file name
    if key.is_empty() || key == "." || key == ".." || key.len() > MAX_DOMAIN_KEY_LEN {
        return None;
    }

    Some(key)
}

/// Routing key of a raw URL string, falling back to [`UNDEFINED_DOMAIN`]
pub fn domain_key(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| extract_domain(&parsed))
        .unwrap_or_else(|| UNDEFINED_DOMAIN.to_string())
}
