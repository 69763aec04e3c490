//! Daemon side: control socket, sensor pipeline and action dispatch.

mod dispatch;
mod pipeline;
mod runtime;
mod server;

pub use server::{client_request, run_daemon, watch};
