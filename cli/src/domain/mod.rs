//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod cluster;
pub mod config;
pub mod error;
pub mod keys;
pub mod report;
pub mod ssh;

pub use cluster::{ClusterState, StatePair};
pub use config::{DesiredSpec, ProfileRef};
pub use error::{
    BootstrapError, BootstrapStep, ConfigError, DeadlineExceeded, ProfilesFailed, ReconcileError, RegistryError,
};
pub use keys::{DeployKey, GitRepository, RegistryCredentials};
pub use report::{ProfileFailure, RunReport};
pub use ssh::{KeyPairPath, SshSession};
