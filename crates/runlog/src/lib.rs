//! runlog: experiment-tracking client.
//!
//! Re-exports the client library and the stand-in tracking server.

pub use runlog_core::*;
pub use runlog_server as server;
