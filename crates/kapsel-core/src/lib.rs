//! # kapsel-core
//!
//! Shared data model for the kapsel sandbox SDK.
//!
//! This crate provides:
//! - [`ExecutionResult`] / [`CommandResult`] / [`Artifact`] - execution outcomes
//! - [`ExecutionOptions`] - per-call options with documented merge semantics
//! - [`CreateOptions`] / [`Capabilities`] / [`InstanceStatus`] - the provider
//!   data model
//! - [`FileSystem`] - the sandbox file abstraction
//! - [`ErrorKind`] / [`SandboxError`] / [`ExecutionError`] - the error taxonomy
//!
//! Everything here is backend-agnostic; no type in this crate knows what a
//! container, VM or HTTP request is.

mod error;
mod exec;
mod fs;
mod instance;

pub use error::{BoxError, ErrorKind, ExecutionError, SandboxError};
pub use exec::{Artifact, CommandResult, ExecutionOptions, ExecutionResult};
pub use fs::{FileInfo, FileSystem, NoopFileSystem, WatchEvent, WatchEventType, Watcher};
pub use instance::{Capabilities, CreateOptions, InstanceStatus, PublishedPort, ResourceConfig};
