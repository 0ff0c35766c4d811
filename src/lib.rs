//! An embeddable, completion-based (Windows I/O Completion Port) TCP server core.
//!
//! The host process links this crate, supplies a callback, and the engine accepts connections,
//! reads inbound bytes, invokes the callback, and writes a response back — sustaining many
//! concurrent connections via a bounded pool of worker threads draining a single completion
//! queue.
//!
//! Two surfaces are exposed:
//! - [`ServerConfig`]/[`ServerBuilder`]/[`Engine`]: the safe Rust-native API, for embedders
//!   linking this crate as an `rlib`.
//! - The `extern "C"` functions in `ffi` (`initialize_server`, `start_server`,
//!   `shutdown_server`): the stable ABI for non-Rust hosts linking the `cdylib`.

mod completion_port;
mod config;
mod conn;
mod dispatcher;
mod engine;
mod error;
mod ffi;
mod listener;
mod op;
mod submit;
mod winsock;

pub use config::{ServerBuilder, ServerConfig};
pub use engine::{Engine, RawCallback};
pub use error::{Error, Result};
pub use op::READ_BUFFER_LEN;
