use super::domain::extract_domain;
use url::{Host, Url};

/// Extensions of resources the crawler cannot parse or does not care about
const EXCLUDED_EXTENSIONS: &[&str] = &[
    "apk", "deb", "cab", "iso", "gif", "jpg", "png", "svg", "ico", "css", "sit", "eps", "wmf",
    "rar", "tar", "jar", "zip", "gz", "bz2", "rpm", "tgz", "mov", "exe", "jpeg", "jpe", "bmp",
    "js", "mpg", "mp3", "mp4", "m4a", "ogv", "kml", "wmv", "swf", "flv", "mkv", "m4v", "webm",
    "ra", "wma", "wav", "avi", "xspf", "m3u",
];

/// Admission predicate applied to every URL before it is queued
pub type UrlFilter = fn(&str) -> bool;

/// Decides whether a URL is worth crawling
///
/// A URL is kept when all of the following hold:
/// - it parses and uses `http` or `https`
/// - its domain key contains `.onion`
/// - it does not point at a loopback host
/// - no path or query component ends in an excluded file extension
///
/// # Examples
///
/// ```
/// use onion_crawler::url::is_crawlable;
///
/// assert!(is_crawlable("http://example.onion/index.html"));
/// assert!(!is_crawlable("http://example.onion/logo.PNG"));
/// assert!(!is_crawlable("https://example.com/"));
/// ```
pub fn is_crawlable(url_str: &str) -> bool {
    let url = match Url::parse(url_str) {
        Ok(url) => url,
        Err(_) => return false,
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }

    let onion = extract_domain(&url)
        .map(|domain| domain.contains(".onion"))
        .unwrap_or(false);

    onion && !is_loopback(&url) && !has_excluded_extension(url_str)
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(addr)) => addr.is_loopback(),
        Some(Host::Ipv6(addr)) => addr.is_loopback(),
        None => false,
    }
}

/// True when any piece of the URL that ends at `?`, `&` or the end of the
/// string (fragment excluded) has an excluded extension
fn has_excluded_extension(url_str: &str) -> bool {
    let without_fragment = url_str.split('#').next().unwrap_or(url_str);

    without_fragment.split(['?', '&']).any(|piece| {
        piece
            .rsplit_once('.')
            .map(|(_, ext)| {
                EXCLUDED_EXTENSIONS
                    .iter()
                    .any(|excluded| ext.eq_ignore_ascii_case(excluded))
            })
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_onion_pages() {
        assert!(is_crawlable("http://abcdefghijklmnop.onion/"));
        assert!(is_crawlable("https://www.example.onion/forum/thread?id=3"));
        assert!(is_crawlable("http://example.onion/page.html"));
        assert!(is_crawlable("http://sub.example.onion:8080/"));
    }

    #[test]
    fn test_rejects_clearnet() {
        assert!(!is_crawlable("https://example.com/"));
        assert!(!is_crawlable("http://onion.example.com/"));
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(!is_crawlable("ftp://example.onion/"));
        assert!(!is_crawlable("mailto:admin@example.onion"));
        assert!(!is_crawlable("javascript:void(0)"));
    }

    #[test]
    fn test_rejects_unparseable() {
        assert!(!is_crawlable(""));
        assert!(!is_crawlable("not a url"));
    }

    #[test]
    fn test_rejects_excluded_extensions() {
        assert!(!is_crawlable("http://example.onion/image.jpg"));
        assert!(!is_crawlable("http://example.onion/archive.tar.gz"));
        assert!(!is_crawlable("http://example.onion/app.JS"));
        assert!(!is_crawlable("http://example.onion/movie.mp4?download=1"));
        assert!(!is_crawlable("http://example.onion/get?file=song.mp3"));
    }

    #[test]
    fn test_extension_must_end_the_component() {
        assert!(is_crawlable("http://example.onion/jpg-gallery/"));
        assert!(is_crawlable("http://example.onion/style.css.html"));
        assert!(is_crawlable("http://example.onion/page.php#image.png"));
    }

    #[test]
    fn test_rejects_loopback() {
        assert!(!is_crawlable("http://localhost/"));
        assert!(!is_crawlable("http://127.0.0.1:9050/"));
        assert!(!is_crawlable("http://[::1]/"));
    }
}
