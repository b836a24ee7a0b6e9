//! URL handling module for the onion crawler
//!
//! This module provides domain key derivation (the queue's routing key),
//! link normalization, and the admission filter that decides which URLs are
//! worth queueing.

mod domain;
mod filter;
mod normalize;

pub use domain::{domain_key, extract_domain, MAX_DOMAIN_KEY_LEN, UNDEFINED_DOMAIN};
pub use filter::{is_crawlable, UrlFilter};
pub use normalize::normalize_url;
