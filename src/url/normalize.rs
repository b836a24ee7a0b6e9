use crate::UrlError;
use url::Url;

/// Normalizes a link found on a page before it is offered to the queue
///
/// # Normalization Steps
///
/// 1. Trim surrounding whitespace
/// 2. Replace every remaining whitespace character with `%20`
/// 3. Parse the URL; reject if malformed
/// 4. Reject anything that is not HTTP or HTTPS
/// 5. Remove the fragment
///
/// Host case and dot segments are handled by the parser itself.
///
/// # Examples
///
/// ```
/// use onion_crawler::url::normalize_url;
///
/// let url = normalize_url("  http://example.onion/a page#top ").unwrap();
/// assert_eq!(url.as_str(), "http://example.onion/a%20page");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut cleaned = String::with_capacity(url_str.len());
    for c in url_str.trim().chars() {
        if c.is_whitespace() {
            cleaned.push_str("%20");
        } else {
            cleaned.push(c);
        }
    }

    let mut url = Url::parse(&cleaned).map_err(|e| UrlError::Parse(format!("{}: {}", cleaned, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    url.set_fragment(None);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_surrounding_whitespace() {
        let result = normalize_url("  http://example.onion/page \n").unwrap();
        assert_eq!(result.as_str(), "http://example.onion/page");
    }

    #[test]
    fn test_interior_whitespace_is_encoded() {
        let result = normalize_url("http://example.onion/a b\tc").unwrap();
        assert_eq!(result.as_str(), "http://example.onion/a%20b%20c");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("http://example.onion/page#section").unwrap();
        assert_eq!(result.as_str(), "http://example.onion/page");
    }

    #[test]
    fn test_scheme_is_preserved() {
        let result = normalize_url("https://example.onion/").unwrap();
        assert_eq!(result.scheme(), "https");
    }

    #[test]
    fn test_query_is_preserved() {
        let result = normalize_url("http://example.onion/search?q=tor&page=2").unwrap();
        assert_eq!(result.as_str(), "http://example.onion/search?q=tor&page=2");
    }

    #[test]
    fn test_lowercase_domain() {
        let result = normalize_url("http://EXAMPLE.ONION/Page").unwrap();
        assert_eq!(result.as_str(), "http://example.onion/Page");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.onion/file");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_mailto_is_rejected() {
        assert!(normalize_url("mailto:admin@example.onion").is_err());
    }

    #[test]
    fn test_malformed_url() {
        let result = normalize_url("not a url");
        assert!(matches!(result.unwrap_err(), UrlError::Parse(_)));
    }

    #[test]
    fn test_empty_input() {
        assert!(normalize_url("   ").is_err());
    }
}
