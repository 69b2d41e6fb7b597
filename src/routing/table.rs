//! Versioned route table and its publication point.
//!
//! # Responsibilities
//! - Hold an ordered, immutable set of routes under a version number
//! - Precompute match precedence at build time
//! - Publish new versions atomically; hand out snapshots to readers
//!
//! # Design Decisions
//! - Copy-on-write: a table is replaced as a whole, never edited in place
//! - Readers take an `Arc` snapshot through `ArcSwap` without a lock and keep
//!   it for the whole request, so one request only ever sees one version
//! - A rejected publish leaves the active version untouched

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Bytes;
use axum::http::Request;

use crate::error::ConfigurationError;
use crate::observability::{EventSink, GatewayEvent};
use crate::routing::matcher::{match_route, RouteMatch};
use crate::routing::route::Route;

/// An immutable, versioned set of routes.
#[derive(Debug)]
pub struct RouteTable {
    version: u64,
    /// Routes in declaration order.
    routes: Vec<Arc<Route>>,
    /// Indices into `routes`, most specific first, declaration order on ties.
    precedence: Vec<usize>,
}

impl RouteTable {
    /// Build a table, rejecting duplicate route ids.
    pub fn new(version: u64, routes: Vec<Arc<Route>>) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::with_capacity(routes.len());
        for route in &routes {
            if !seen.insert(route.id.as_str()) {
                return Err(ConfigurationError::DuplicateRouteId(route.id.clone()));
            }
        }

        let mut precedence: Vec<usize> = (0..routes.len()).collect();
        // Stable sort keeps declaration order among equally specific routes.
        precedence.sort_by(|&a, &b| routes[b].specificity().cmp(&routes[a].specificity()));

        Ok(Self {
            version,
            routes,
            precedence,
        })
    }

    fn with_version(&self, version: u64) -> Self {
        Self {
            version,
            routes: self.routes.clone(),
            precedence: self.precedence.clone(),
        }
    }

    pub fn empty() -> Self {
        Self {
            version: 0,
            routes: Vec::new(),
            precedence: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes in declaration order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|r| r.id == id)
    }

    /// Routes in match precedence order.
    pub fn by_precedence(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.precedence.iter().map(|&i| &self.routes[i])
    }

    pub fn match_request(&self, req: &Request<Bytes>) -> RouteMatch {
        match_route(self, req)
    }
}

/// Holder of the active route table.
#[derive(Debug)]
pub struct RouteStore {
    current: ArcSwap<RouteTable>,
    events: Arc<dyn EventSink>,
}

impl RouteStore {
    /// Start with an empty table (version 0).
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteTable::empty()),
            events,
        }
    }

    /// Snapshot of the active table.
    pub fn lookup(&self) -> Arc<RouteTable> {
        self.current.load_full()
    }

    /// Replace the active table with `routes`. Returns the new version.
    pub fn publish(&self, routes: Vec<Route>) -> Result<u64, ConfigurationError> {
        let candidate = match RouteTable::new(0, routes.into_iter().map(Arc::new).collect()) {
            Ok(table) => table,
            Err(e) => {
                self.reject(&e);
                return Err(e);
            }
        };

        let mut published = 0;
        self.current.rcu(|current| {
            published = current.version() + 1;
            candidate.with_version(published)
        });

        self.events.emit(&GatewayEvent::TablePublished {
            version: published,
            routes: candidate.len(),
        });
        Ok(published)
    }

    /// Report a table that failed before reaching `publish` (e.g. compile errors).
    pub fn reject(&self, error: &ConfigurationError) {
        self.events.emit(&GatewayEvent::PublishRejected {
            reason: error.to_string(),
        });
    }
}
