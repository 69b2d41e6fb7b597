//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, host, path, headers)
//!     → table.rs (RouteStore::lookup, one snapshot per request)
//!     → matcher.rs (evaluate predicates in precedence order)
//!     → Return: RouteMatch::Matched(route) or RouteMatch::NoMatch
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → route.rs (compile predicates, bind upstream and policies)
//!     → table.rs (check ids, precompute precedence)
//!     → Publish as a new immutable version
//! ```
//!
//! # Design Decisions
//! - Tables are immutable; reloads publish a whole new version
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - Most specific match wins, declaration order breaks ties

pub mod matcher;
pub mod route;
pub mod table;

pub use matcher::{Condition, PathPattern, RouteMatch};
pub use route::{compile_routes, Route};
pub use table::{RouteStore, RouteTable};
