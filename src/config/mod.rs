//! Configuration module
//!
//! Configuration types, defaults, loading (TOML file, upstream URIs,
//! environment variables) and validation.

mod defaults;
mod loading;
mod types;
mod validation;

pub use loading::{
    UPSTREAM_ENV_PREFIX, load_config, parse_upstream_uri, upstreams_from_vars,
};
pub use types::{Config, LogFormat, LoggingConfig, UpstreamConfig};
