//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `DiscoveredUrls`: every URL ever queued, plus the ones not yet archived
//! - `CookieJar`: per-domain cookies sent along with requests

mod cookies;
mod discovered;

pub use cookies::CookieJar;
pub use discovered::DiscoveredUrls;
