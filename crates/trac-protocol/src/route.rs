// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route Resolver (C7): an ordered list of routes, each with a matcher over
//! method and URI; the first match wins and is bound for the connection's
//! lifetime once a WebSocket upgrade is chosen.

use crate::TranslationError;

/// Which wire family a route speaks on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteProtocol {
    Grpc,
    Rest,
    Custom,
}

/// Where a matched request is forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// A single routing rule. `matcher` is evaluated against `(method, uri)`;
/// the first route in the table whose matcher returns `true` wins.
pub struct Route {
    pub name: String,
    pub protocol: RouteProtocol,
    pub target: RouteTarget,
    matcher: Box<dyn Fn(&str, &str) -> bool + Send + Sync>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Route {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        protocol: RouteProtocol,
        target: RouteTarget,
        matcher: impl Fn(&str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            target,
            matcher: Box::new(matcher),
        }
    }

    /// A gRPC route: matches any request whose path starts with
    /// `/<fully-qualified-service>/`.
    #[must_use]
    pub fn grpc(name: impl Into<String>, service: impl Into<String>, target: RouteTarget) -> Self {
        let prefix = format!("/{}/", service.into());
        Self::new(name, RouteProtocol::Grpc, target, move |_method, uri| uri.starts_with(&prefix))
    }

    /// A REST route bound to a configured path prefix, independent of method
    /// (per-method/template matching from the protobuf HTTP binding is
    /// resolved downstream once a route is selected, by [`crate::rest`]).
    #[must_use]
    pub fn rest(name: impl Into<String>, path_prefix: impl Into<String>, target: RouteTarget) -> Self {
        let prefix = path_prefix.into();
        Self::new(name, RouteProtocol::Rest, target, move |_method, uri| uri.starts_with(&prefix))
    }

    /// A custom route bound to an explicit path prefix.
    #[must_use]
    pub fn custom(name: impl Into<String>, path_prefix: impl Into<String>, target: RouteTarget) -> Self {
        let prefix = path_prefix.into();
        Self::new(name, RouteProtocol::Custom, target, move |_method, uri| uri.starts_with(&prefix))
    }

    #[must_use]
    pub fn matches(&self, method: &str, uri: &str) -> bool {
        (self.matcher)(method, uri)
    }
}

/// The ordered list of routes a gateway was configured with. Immutable
/// after startup, per the concurrency model — route tables never mutate
/// once a listener starts accepting connections.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Resolve `(method, uri)` to a route index: the first matcher in
    /// insertion order that returns `true`.
    pub fn resolve(&self, method: &str, uri: &str) -> Result<usize, TranslationError> {
        self.routes
            .iter()
            .position(|r| r.matches(method, uri))
            .ok_or_else(|| TranslationError::NoRouteMatched {
                method: method.to_string(),
                path: uri.to_string(),
            })
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Route> {
        self.routes.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
