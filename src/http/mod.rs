//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, body limit, middleware)
//!     → request.rs (request ID)
//!     → gateway (route, admit, dispatch)
//!         → headers.rs (hop-by-hop stripping, forwarding headers)
//!     → response.rs (shape outcome, transform headers)
//!     → Send to client
//! ```

pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::{Outcome, ResponsePipeline};
pub use server::HttpServer;
