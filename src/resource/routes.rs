//! Route URI resolution
//!
//! Maps a free-form route URI (`host.domain.com/path`, `tcp.domain.com:1024`,
//! `https://host.domain.com/path`) onto a [`RouteDescriptor`] by matching its
//! hostname against the set of domains the caller can see.

use crate::error::{CfError, CfResult};
use serde::Serialize;
use std::fmt;
use url::Url;

/// The addressable parts of a route.
///
/// `None` and empty host/path are equivalent; compare with
/// [`RouteDescriptor::describes_the_same_uri`], which normalizes first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteDescriptor {
    pub host: Option<String>,
    pub domain: String,
    pub path: Option<String>,
    pub port: Option<u16>,
}

impl RouteDescriptor {
    pub fn new(host: Option<&str>, domain: &str, path: Option<&str>, port: Option<u16>) -> Self {
        Self {
            host: host.map(str::to_string),
            domain: domain.to_string(),
            path: path.map(str::to_string),
            port,
        }
    }

    pub fn host_or_empty(&self) -> &str {
        self.host.as_deref().unwrap_or("")
    }

    pub fn path_or_empty(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }

    fn normalized(&self) -> (&str, &str, &str, Option<u16>) {
        (
            self.host_or_empty(),
            self.domain.as_str(),
            self.path_or_empty(),
            self.port,
        )
    }

    /// Field-wise comparison after normalizing absent host/path to empty.
    /// Identity (GUIDs) plays no part.
    pub fn describes_the_same_uri(&self, other: &RouteDescriptor) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.host_or_empty();
        if !host.is_empty() {
            write!(f, "{}.", host)?;
        }
        write!(f, "{}", self.domain)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.path_or_empty())
    }
}

/// Hostname, port and path split out of a URI string.
#[derive(Debug, PartialEq, Eq)]
struct ParsedUri {
    hostname: String,
    port: Option<u16>,
    path: String,
}

fn parse_uri(uri: &str) -> CfResult<ParsedUri> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(CfError::Invalid("Empty route URI".to_string()));
    }

    if uri.contains("://") {
        let url = Url::parse(uri)
            .map_err(|e| CfError::Invalid(format!("Invalid route URI '{}': {}", uri, e)))?;
        let hostname = url
            .host_str()
            .ok_or_else(|| CfError::Invalid(format!("Route URI '{}' has no host", uri)))?
            .to_string();
        return Ok(ParsedUri {
            hostname,
            port: url.port(),
            path: normalize_path(url.path()),
        });
    }

    let (authority, path) = match uri.find('/') {
        Some(idx) => (&uri[..idx], &uri[idx..]),
        None => (uri, ""),
    };

    let (hostname, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| CfError::Invalid(format!("Invalid port in route URI '{}'", uri)))?;
            (host, Some(port))
        },
        None => (authority, None),
    };

    Ok(ParsedUri {
        hostname: hostname.to_string(),
        port,
        path: normalize_path(path),
    })
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Known domain for `hostname`: either the whole hostname, or the part
/// after its first dot with a single-label host in front. An exact match
/// wins over the split. Returns the host (without the joining dot) and domain.
fn match_domain<'a, I>(hostname: &str, known_domains: I) -> Option<(String, &'a str)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(String, &'a str)> = None;

    for domain in known_domains {
        let host = if hostname == domain {
            Some(String::new())
        } else {
            hostname
                .strip_suffix(domain)
                .and_then(|prefix| prefix.strip_suffix('.'))
                .filter(|prefix| !prefix.is_empty() && !prefix.contains('.'))
                .map(str::to_string)
        };

        if let Some(host) = host {
            let longer = best
                .as_ref()
                .map(|(_, current)| domain.len() > current.len())
                .unwrap_or(true);
            if longer {
                best = Some((host, domain));
            }
        }
    }

    best
}

/// Resolve `uri` against the domains the caller knows about.
///
/// The hostname is matched first. If no domain fits, the first path segment
/// is tried as an exact domain name, with the whole (single-label) hostname
/// as host.
/// Fails with `NotFound` when neither attempt matches.
pub fn resolve<'a, I>(uri: &str, known_domains: I) -> CfResult<RouteDescriptor>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    let parsed = parse_uri(uri)?;

    if let Some((host, domain)) = match_domain(&parsed.hostname, known_domains.clone()) {
        return Ok(RouteDescriptor {
            host: Some(host),
            domain: domain.to_string(),
            path: Some(parsed.path),
            port: parsed.port,
        });
    }

    // Fallback: `host/domain.com/rest`
    let segments = parsed.path.trim_start_matches('/');
    let (first, rest) = match segments.find('/') {
        Some(idx) => (&segments[..idx], &segments[idx..]),
        None => (segments, ""),
    };
    if !first.is_empty() && !parsed.hostname.contains('.') {
        if let Some(domain) = known_domains.into_iter().find(|d| *d == first) {
            tracing::debug!("Route URI '{}' matched domain '{}' from its path", uri, domain);
            return Ok(RouteDescriptor {
                host: Some(parsed.hostname),
                domain: domain.to_string(),
                path: Some(normalize_path(rest)),
                port: parsed.port,
            });
        }
    }

    Err(CfError::NotFound(format!(
        "No known domain matches route URI '{}'",
        uri
    )))
}
