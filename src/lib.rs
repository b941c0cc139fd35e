//! CORS-friendly HLS relay.
//!
//! Fetches playlists and segments from an origin with browser-like identity
//! headers, rewrites playlist URIs to route back through the relay, and
//! streams segments through with range support.

pub mod config;
pub mod error;
pub mod headers;
pub mod hls;
pub mod server;
pub mod upstream;
