pub mod rewriter;

pub use rewriter::{PlaylistLine, ProxyRoute, rewrite_playlist};

/// Content type for every playlist the relay serves
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Fallback content type for relayed segments
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Cheap textual check for whether a fetched body is an HLS playlist.
///
/// Matches on any of: a content type containing `mpegurl`, a URL
/// containing `.m3u8`, or the `#EXTM3U` / `#EXTINF` markers in the body.
pub fn looks_like_playlist(content_type: Option<&str>, url: &str, body: &[u8]) -> bool {
    content_type_is_playlist(content_type)
        || is_playlist_url(url)
        || contains(body, b"#EXTM3U")
        || contains(body, b"#EXTINF")
}

pub fn content_type_is_playlist(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("mpegurl"))
}

pub fn is_playlist_url(url: &str) -> bool {
    url.contains(".m3u8")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
