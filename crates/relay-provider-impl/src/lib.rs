//! Built-in upstream provider implementations.
//!
//! This crate does not perform network IO. It builds `TargetRequest`s that the
//! transfer layer executes.

mod auth_extractor;
mod providers;
mod registry;

pub use providers::OpenAICompatibleProvider;
pub use registry::build_registry;
