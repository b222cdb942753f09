//! Upstream endpoint description

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::connection_error::ConnectionError;
use crate::network;
use crate::stream::ConnectionStream;

/// Transport family used to reach an upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    #[default]
    Tcp,
    Unix,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Unix => f.write_str("unix"),
        }
    }
}

/// Where a pool's connections go, and which database they select
///
/// Immutable once a proxy is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamTarget {
    address: String,
    family: Family,
    database: Option<u32>,
}

impl UpstreamTarget {
    /// `address` is `host:port` for TCP or a socket path for unix
    pub fn new(address: impl Into<String>, family: Family, database: Option<u32>) -> Self {
        Self {
            address: address.into(),
            family,
            database,
        }
    }

    /// TCP target without database selection
    pub fn tcp(address: impl Into<String>) -> Self {
        Self::new(address, Family::Tcp, None)
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn family(&self) -> Family {
        self.family
    }

    #[must_use]
    pub fn database(&self) -> Option<u32> {
        self.database
    }

    /// Same endpoint with a different database selection
    #[must_use]
    pub fn with_database(mut self, database: Option<u32>) -> Self {
        self.database = database;
        self
    }

    /// Open a transport to this target
    pub async fn dial(&self, timeout: Duration) -> Result<ConnectionStream, ConnectionError> {
        let result = match self.family {
            Family::Tcp => network::dial_tcp(&self.address, timeout).await,
            Family::Unix => network::dial_unix(&self.address, timeout).await,
        };
        result.map_err(|source| ConnectionError::Dial {
            target: self.to_string(),
            source,
        })
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            Family::Tcp => write!(f, "{}", self.address)?,
            Family::Unix => write!(f, "unix:{}", self.address)?,
        }
        if let Some(db) = self.database {
            write!(f, "/{db}")?;
        }
        Ok(())
    }
}
