//! Integration tests for the onion crawler
//!
//! - `queue_tests`: the fair queue across process-like restarts and threads
//! - `crawl_tests`: full create / restore cycles against a mock server

mod crawl_tests;
mod queue_tests;
