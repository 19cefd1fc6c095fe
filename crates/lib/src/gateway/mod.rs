//! Gateway: HTTP webhook receiver.
//!
//! Single port serves the health check and the LINE callback. Verified text messages are
//! handed to the dispatcher in the background; the callback answers immediately.

mod server;

pub use server::{build_dispatcher, router, run_gateway, GatewayState};
