// src/config/mod.rs

//! Agent configuration.
//!
//! - [`model`] holds the validated configuration types.
//! - [`validate`] turns parsed CLI arguments into an [`AgentConfig`].
//! - [`loader`] is the entry point used by `lib.rs`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load, load_with_aliases};
pub use model::{
    AgentConfig, BackendConfig, DockerConfig, DockerTaskDefinition, EcsConfig, ExitAliases,
    RegistryAuth, SourceConfig,
};
pub use validate::parse_registry_auth;
