//! Line-oriented playlist rewriting.
//!
//! Every URI a playlist references is resolved against the playlist's own
//! URL and replaced with a link back into the relay, carrying the resolved
//! target and the caller's header overrides:
//!
//! - plain URI lines become `/m3u8-proxy` (nested playlist) or `/ts-proxy`
//!   (segment) links
//! - every `URI="..."` attribute inside a `#` directive is rewritten in place,
//!   the rest of the directive is left byte-for-byte intact
//!
//! Rewriting is best-effort: a line whose URI cannot be resolved is kept as
//! it was, never dropped.

use crate::headers::HeaderOverrides;
use tracing::debug;
use url::Url;

const URI_MARKER: &str = "URI=\"";

/// One classified playlist line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistLine<'a> {
    Blank,
    /// A `#` line, with the first `URI="..."` value it carries, if any
    Directive { raw: &'a str, uri: Option<&'a str> },
    /// A segment or nested playlist reference
    MediaReference(&'a str),
}

impl<'a> PlaylistLine<'a> {
    pub fn classify(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            PlaylistLine::Blank
        } else if trimmed.starts_with('#') {
            PlaylistLine::Directive {
                raw: line,
                uri: extract_quoted_uri(line).map(|(value, _, _)| value),
            }
        } else {
            PlaylistLine::MediaReference(trimmed)
        }
    }
}

/// Relay endpoint a rewritten link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRoute {
    Playlist,
    Segment,
}

impl ProxyRoute {
    /// Nested playlists are recognised by `.m3u8` anywhere in the URL
    pub fn for_target(target: &Url) -> Self {
        if target.as_str().contains(".m3u8") {
            ProxyRoute::Playlist
        } else {
            ProxyRoute::Segment
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            ProxyRoute::Playlist => "m3u8-proxy",
            ProxyRoute::Segment => "ts-proxy",
        }
    }
}

/// Builds relay links for one playlist.
struct LinkBuilder<'a> {
    playlist_url: &'a Url,
    base: &'a str,
    /// Percent-encoded JSON of the caller's overrides, shared by every link
    headers_param: String,
}

impl LinkBuilder<'_> {
    /// Resolve `uri` and build its relay link. `None` if it cannot be resolved.
    fn link(&self, uri: &str) -> Option<String> {
        let uri = uri.trim();
        if uri.is_empty() {
            return None;
        }

        let resolved = match self.playlist_url.join(uri) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("Keeping unresolvable URI {:?}: {}", uri, e);
                return None;
            }
        };

        let route = ProxyRoute::for_target(&resolved);
        Some(format!(
            "{}/{}?url={}&headers={}",
            self.base,
            route.path(),
            urlencoding::encode(resolved.as_str()),
            self.headers_param
        ))
    }

    /// Rewrite every `URI="..."` attribute of a directive line.
    fn directive(&self, line: &str) -> String {
        let mut result = String::with_capacity(line.len() + 128);
        let mut rest = line;

        while let Some((value, quote_start, quote_end)) = extract_quoted_uri(rest) {
            match self.link(value) {
                Some(link) => {
                    result.push_str(&rest[..quote_start]);
                    result.push('"');
                    result.push_str(&link);
                    result.push('"');
                }
                None => result.push_str(&rest[..quote_end]),
            }
            rest = &rest[quote_end..];
        }

        result.push_str(rest);
        result
    }
}

/// Rewrite a playlist so every referenced URI routes back through the relay.
///
/// `playlist_url` is the URL the playlist was served from; `proxy_base` is
/// the relay's public base URL (no trailing slash required). Line endings,
/// blank lines and directives without URIs are preserved exactly.
pub fn rewrite_playlist(
    text: &str,
    playlist_url: &Url,
    overrides: &HeaderOverrides,
    proxy_base: &str,
) -> String {
    let links = LinkBuilder {
        playlist_url,
        base: proxy_base.trim_end_matches('/'),
        headers_param: urlencoding::encode(&overrides.to_json()).into_owned(),
    };

    let mut output = String::with_capacity(text.len() * 2);

    for (idx, raw) in text.split('\n').enumerate() {
        if idx > 0 {
            output.push('\n');
        }

        let (line, line_end) = match raw.strip_suffix('\r') {
            Some(line) => (line, "\r"),
            None => (raw, ""),
        };

        match PlaylistLine::classify(line) {
            PlaylistLine::Blank => output.push_str(raw),
            PlaylistLine::Directive { uri: None, .. } => output.push_str(raw),
            PlaylistLine::Directive { raw: directive, .. } => {
                output.push_str(&links.directive(directive));
                output.push_str(line_end);
            }
            PlaylistLine::MediaReference(uri) => match links.link(uri) {
                Some(link) => {
                    output.push_str(&link);
                    output.push_str(line_end);
                }
                None => output.push_str(raw),
            },
        }
    }

    output
}

/// Find the first `URI="..."` attribute in `line`.
///
/// Returns the value (without quotes), the byte offset of the opening quote
/// and the byte offset one past the closing quote. `None` when the marker is
/// missing or the value is unterminated.
pub fn extract_quoted_uri(line: &str) -> Option<(&str, usize, usize)> {
    let marker_pos = line.find(URI_MARKER)?;
    let value_start = marker_pos + URI_MARKER.len();
    let closing_quote = line[value_start..].find('"')?;

    let quote_start = value_start - 1;
    let quote_end = value_start + closing_quote + 1;

    Some((&line[value_start..value_start + closing_quote], quote_start, quote_end))
}

// -- Tests -------------------------------------------------------------------
