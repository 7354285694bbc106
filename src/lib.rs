//! Library half of the model worker: everything `main.rs` wires together.
//!
//! The wire codec, error taxonomy, message validation, and metrics live in
//! the separate `worker-protocol` crate; this crate owns the pieces that are
//! specific to running a worker process -- configuration, the model loader,
//! the handler capability contract, the service manager, and the worker loop
//! itself.

pub mod config;
pub mod handler;
pub mod loader;
pub mod service;
pub mod worker;

pub use config::WorkerConfig;
pub use handler::{HandlerRegistry, ServiceHandler};
pub use service::ServiceManager;
pub use worker::Worker;
