//! # hostpath-backup
//! Backs up and restores the host path volumes of a Kubernetes release, holding the workloads
//! that mount them at zero replicas while their data is archived or replaced.
//!

pub mod archive;
pub mod claim;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod context;
pub mod naming;
pub mod orchestrator;
pub mod remote;
pub mod resolver;
pub mod scaler;
pub mod workload;

pub use config::{Config, LoadConfigError, LoadCredentialsError, RemoteCredentials};
pub use context::Context;
pub use orchestrator::{Orchestrator, RunError, RunOptions};
