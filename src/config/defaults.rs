//! Default values for configuration fields
//!
//! Used as serde `default` functions and by the `Default` impls.

use std::time::Duration;

use crate::constants::listener::{
    DEFAULT_CLUSTER_LISTEN_HOST, DEFAULT_SOCKET_PREFIX, DEFAULT_SOCKET_SUFFIX,
};
use crate::constants::pool::{
    DEFAULT_CHECKOUT_TIMEOUT, DEFAULT_DIAL_TIMEOUT, DEFAULT_MIN_SIZE, DEFAULT_READ_TIMEOUT,
    DEFAULT_WRITE_TIMEOUT,
};
use crate::constants::DEFAULT_STATS_INTERVAL;

#[inline]
pub fn local_socket_prefix() -> String {
    DEFAULT_SOCKET_PREFIX.to_string()
}

#[inline]
pub fn local_socket_suffix() -> String {
    DEFAULT_SOCKET_SUFFIX.to_string()
}

#[inline]
pub fn cluster_listen_host() -> String {
    DEFAULT_CLUSTER_LISTEN_HOST.to_string()
}

#[inline]
pub fn stats_interval() -> Duration {
    DEFAULT_STATS_INTERVAL
}

#[inline]
pub fn log_level() -> String {
    "info".to_string()
}

/// Connections opened at startup per pool
#[inline]
pub fn min_pool_size() -> usize {
    DEFAULT_MIN_SIZE
}

#[inline]
pub fn checkout_timeout() -> Duration {
    DEFAULT_CHECKOUT_TIMEOUT
}

#[inline]
pub fn dial_timeout() -> Duration {
    DEFAULT_DIAL_TIMEOUT
}

#[inline]
pub fn read_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

#[inline]
pub fn write_timeout() -> Duration {
    DEFAULT_WRITE_TIMEOUT
}
