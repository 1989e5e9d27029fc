//! The host→exchange-policy resolver (spec.md §4.B): deterministic
//! first-match semantics over an ordered list of host glob patterns.

mod glob;

use std::path::Path;

use authbridge_core::Route;
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("failed to read route config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse route config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Read-heavy: a shared lock allows concurrent readers; a reload takes
/// the exclusive lock once and replaces the whole list atomically. The
/// list itself is never mutated in place.
pub struct Resolver {
    routes: RwLock<Vec<Route>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
        }
    }

    pub fn with_routes(routes: Vec<Route>) -> Self {
        Self {
            routes: RwLock::new(routes),
        }
    }

    /// Loads a route table from a YAML file at the given path. A
    /// missing file is not an error — it yields an empty resolver that
    /// reports "no match" for every lookup, permitting the caller's
    /// default policy to apply (spec.md §4.B point 4).
    pub fn from_file(path: &Path) -> Result<Self, ResolverError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::with_routes(load_routes_from_yaml(&content))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(err) => Err(ResolverError::Read {
                path: path.display().to_string(),
                source: err,
            }),
        }
    }

    /// Replaces the route list atomically. Never errors: individual
    /// invalid entries were already filtered out by the loader.
    pub fn reload(&self, routes: Vec<Route>) {
        *self.routes.write() = routes;
    }

    /// Strips the port (and IPv6 brackets) from `host`, then returns the
    /// first route whose pattern matches, or `None` if no route matches
    /// (caller falls back to default policy).
    pub fn resolve(&self, host: &str) -> Option<Route> {
        let normalized = normalize_host(host);
        self.routes
            .read()
            .iter()
            .find(|route| glob::matches(&route.host_pattern, &normalized))
            .cloned()
    }
}

/// Strips `:port` from `host:port`, and normalizes a bracketed IPv6
/// literal `[::1]:port` to `::1`.
pub fn normalize_host(input: &str) -> String {
    let input = input.trim();

    if let Some(rest) = input.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_string();
        }
        return input.to_string();
    }

    if let Some(idx) = input.rfind(':') {
        let (host_part, port_part) = (&input[..idx], &input[idx + 1..]);
        let looks_like_port = !port_part.is_empty() && port_part.chars().all(|c| c.is_ascii_digit());
        // A bare (unbracketed) IPv6 literal has more than one colon; only
        // strip when there's exactly one, so we don't mangle it.
        if looks_like_port && !host_part.contains(':') {
            return host_part.to_string();
        }
    }

    input.to_string()
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    host: String,
    #[serde(default)]
    target_audience: String,
    #[serde(default)]
    token_scopes: String,
    #[serde(default)]
    token_url: Option<String>,
    #[serde(default)]
    passthrough: bool,
    #[serde(default)]
    authorization_check: bool,
}

/// Parses the §6 YAML route-list format. Entries with an invalid glob
/// pattern are logged and skipped; the rest of the table remains valid.
/// A malformed document (not a YAML list of route records at all)
/// yields an empty table rather than panicking the caller.
pub fn load_routes_from_yaml(content: &str) -> Vec<Route> {
    let entries: Vec<RouteEntry> = match serde_yaml::from_str(content) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(error = %err, "route config is not a valid route list; ignoring");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            if !glob::is_valid_pattern(&entry.host) {
                tracing::warn!(pattern = %entry.host, "skipping route with invalid glob pattern");
                return None;
            }
            Some(Route {
                host_pattern: entry.host,
                target_audience: entry.target_audience,
                scopes: entry.token_scopes,
                token_endpoint: entry.token_url,
                passthrough: entry.passthrough,
                authorization_check: entry.authorization_check,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_port() {
        assert_eq!(normalize_host("api.internal:8443"), "api.internal");
        assert_eq!(normalize_host("api.internal"), "api.internal");
    }

    #[test]
    fn normalize_strips_ipv6_brackets_and_port() {
        assert_eq!(normalize_host("[::1]:9090"), "::1");
        assert_eq!(normalize_host("[::1]"), "::1");
    }

    #[test]
    fn first_match_wins_even_when_a_later_route_is_more_specific() {
        let resolver = Resolver::with_routes(vec![
            Route::new("*.example.com"),
            Route::new("specific.example.com"),
        ]);
        let matched = resolver.resolve("specific.example.com").expect("match");
        assert_eq!(matched.host_pattern, "*.example.com");
    }

    #[test]
    fn host_with_port_matches_route_without_port() {
        let mut route = Route::new("api.internal");
        route.target_audience = "svc-c".to_string();
        let resolver = Resolver::with_routes(vec![route]);
        let matched = resolver.resolve("api.internal:8443").expect("match");
        assert_eq!(matched.target_audience, "svc-c");
    }

    #[test]
    fn missing_file_yields_empty_resolver_not_an_error() {
        let resolver = Resolver::from_file(Path::new("/nonexistent/routes.yaml")).unwrap();
        assert!(resolver.resolve("anything.example.com").is_none());
    }

    #[test]
    fn invalid_glob_entries_are_skipped_valid_ones_kept() {
        let yaml = r#"
- host: "a*b.example.com"
  target_audience: "bad"
- host: "*.example.com"
  target_audience: "good"
"#;
        let routes = load_routes_from_yaml(yaml);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].target_audience, "good");
    }

    #[test]
    fn reload_replaces_table_atomically() {
        let resolver = Resolver::with_routes(vec![Route::new("old.example.com")]);
        assert!(resolver.resolve("new.example.com").is_none());
        resolver.reload(vec![Route::new("new.example.com")]);
        assert!(resolver.resolve("new.example.com").is_some());
        assert!(resolver.resolve("old.example.com").is_none());
    }

    #[test]
    fn passthrough_route_is_reported_as_is() {
        let mut route = Route::new("passthrough.example.com");
        route.passthrough = true;
        let resolver = Resolver::with_routes(vec![route]);
        let matched = resolver.resolve("passthrough.example.com").unwrap();
        assert!(matched.passthrough);
    }
}
