//! Outbound identity headers.
//!
//! Callers pass a JSON object of header overrides (`?headers=...`). The
//! overrides are kept in the order the caller wrote them so they can be
//! echoed verbatim into rewritten playlist URLs, and resolved into a
//! [`HeaderSet`] that always carries a `Referer` and an `Origin`.

use crate::config::{Config, DEFAULT_REFERER, RefererFallback};
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER, USER_AGENT,
};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Modern desktop browser identity sent on every upstream request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const DEFAULT_ACCEPT: &str = "*/*";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Why a `headers` query value was discarded.
#[derive(Debug, Error)]
pub enum HeaderParseError {
    #[error("headers value is not a JSON object of strings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid header name: {0:?}")]
    InvalidName(String),

    #[error("invalid value for header {0:?}")]
    InvalidValue(String),
}

/// Caller-supplied header overrides.
///
/// Names are matched case-insensitively; a later duplicate replaces the
/// earlier value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderOverrides {
    entries: Vec<(String, String)>,
}

impl HeaderOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Parse a JSON object of string values, validating every name and value
    /// as an HTTP header.
    pub fn from_json(raw: &str) -> Result<Self, HeaderParseError> {
        let overrides: HeaderOverrides = serde_json::from_str(raw)?;

        for (name, value) in overrides.iter() {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| HeaderParseError::InvalidName(name.to_string()))?;
            HeaderValue::from_str(value)
                .map_err(|_| HeaderParseError::InvalidValue(name.to_string()))?;
        }

        Ok(overrides)
    }

    /// Parse the optional `headers` query value.
    ///
    /// Anything unusable downgrades to an empty set; the request proceeds
    /// exactly as if the parameter had been absent.
    pub fn from_query(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Self::default();
        };

        match Self::from_json(raw) {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!("Ignoring headers parameter: {}", e);
                Self::default()
            }
        }
    }

    /// Compact JSON in caller order, as carried in rewritten proxy URLs
    pub fn to_json(&self) -> String {
        // Serializing string pairs into a map cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Serialize for HeaderOverrides {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HeaderOverrides {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OverridesVisitor;

        impl<'de> Visitor<'de> for OverridesVisitor {
            type Value = HeaderOverrides;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping header names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut overrides = HeaderOverrides::new();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    if name.is_empty() {
                        return Err(de::Error::custom("empty header name"));
                    }
                    overrides.insert(name, value);
                }
                Ok(overrides)
            }
        }

        deserializer.deserialize_map(OverridesVisitor)
    }
}

/// Resolved identity for one upstream request.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderSet {
    pub referer: String,
    pub origin: String,
    /// Every override other than `Referer` and `Origin`, in caller order
    pub extras: HeaderOverrides,
}

impl HeaderSet {
    /// Full outbound header map: browser defaults, identity, then extras.
    ///
    /// Extras are applied last so a caller can replace `User-Agent`,
    /// `Accept` or `Accept-Language`.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
        );

        if let Ok(value) = HeaderValue::from_str(&self.referer) {
            headers.insert(REFERER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.origin) {
            headers.insert(ORIGIN, value);
        }

        for (name, value) in self.extras.iter() {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                continue;
            };
            headers.insert(name, value);
        }

        headers
    }
}

/// Computes a [`HeaderSet`] from overrides and the target URL.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    default_referer: String,
    fallback: RefererFallback,
}

impl HeaderPolicy {
    /// A default referer that is not a usable header value is replaced by
    /// [`DEFAULT_REFERER`].
    pub fn new(default_referer: impl Into<String>, fallback: RefererFallback) -> Self {
        let mut default_referer = default_referer.into();
        if !is_header_value(&default_referer) {
            warn!(
                "Default referer {:?} is not a valid header value, using {}",
                default_referer, DEFAULT_REFERER
            );
            default_referer = DEFAULT_REFERER.to_string();
        }

        Self {
            default_referer,
            fallback,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.default_referer.clone(),
            config.referer_fallback.clone(),
        )
    }

    /// Referer: explicit override, then (optionally) the target's own
    /// origin, then the configured default. Origin: explicit override, then
    /// the origin of the chosen referer.
    pub fn resolve(&self, overrides: &HeaderOverrides, target: &Url) -> HeaderSet {
        let explicit_referer = overrides
            .get("referer")
            .filter(|v| !v.trim().is_empty() && is_header_value(v));

        let referer = match explicit_referer {
            Some(referer) => referer.to_string(),
            None => match self.fallback {
                RefererFallback::TargetOrigin => origin_of_url(target)
                    .map(|origin| format!("{origin}/"))
                    .unwrap_or_else(|| self.default_referer.clone()),
                RefererFallback::Fixed => self.default_referer.clone(),
            },
        };

        let origin = overrides
            .get("origin")
            .filter(|v| !v.trim().is_empty() && is_header_value(v))
            .map(str::to_string)
            .or_else(|| origin_of(&referer))
            .or_else(|| origin_of(&self.default_referer))
            .unwrap_or_else(|| self.default_referer.trim_end_matches('/').to_string());

        let mut extras = HeaderOverrides::new();
        for (name, value) in overrides.iter() {
            if !name.eq_ignore_ascii_case("referer") && !name.eq_ignore_ascii_case("origin") {
                extras.insert(name, value);
            }
        }

        HeaderSet {
            referer,
            origin,
            extras,
        }
    }
}

fn is_header_value(value: &str) -> bool {
    HeaderValue::from_str(value).is_ok()
}

/// `scheme://host[:port]` of a URL string, if it has a tuple origin
pub fn origin_of(url: &str) -> Option<String> {
    Url::parse(url).ok().as_ref().and_then(origin_of_url)
}

fn origin_of_url(url: &Url) -> Option<String> {
    let origin = url.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization())
}
