//! Pool sizing and runtime sizing newtypes

use nutype::nutype;

/// Maximum number of live upstream connections in one pool
///
/// Zero would make every checkout wait forever, so it is rejected at
/// construction.
///
/// # Examples
/// ```
/// use redis_local_proxy::types::MaxPoolSize;
///
/// let max = MaxPoolSize::try_new(10).unwrap();
/// assert_eq!(max.get(), 10);
/// assert!(MaxPoolSize::try_new(0).is_err());
/// ```
#[nutype(
    validate(greater = 0),
    default = 10,
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Default, TryFrom,
        Into, Serialize, Deserialize,
    )
)]
pub struct MaxPoolSize(usize);

impl MaxPoolSize {
    /// Get the raw value
    #[inline]
    #[must_use]
    pub fn get(&self) -> usize {
        self.into_inner()
    }
}

impl std::str::FromStr for MaxPoolSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<usize>()
            .map_err(|e| format!("invalid pool size '{s}': {e}"))?;
        Self::try_new(value).map_err(|e| e.to_string())
    }
}

/// Number of tokio worker threads
///
/// `0` on the command line means "one per CPU core".
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFrom, Into)
)]
pub struct ThreadCount(usize);

impl ThreadCount {
    /// Resolve a requested count, mapping 0 to the number of CPU cores
    #[must_use]
    pub fn from_requested(requested: usize) -> Self {
        let count = if requested == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            requested
        };
        Self::try_new(count.max(1)).unwrap_or_else(|_| Self::single())
    }

    /// A single worker thread
    #[must_use]
    pub fn single() -> Self {
        match Self::try_new(1) {
            Ok(count) => count,
            Err(_) => unreachable!("1 is greater than 0"),
        }
    }

    /// Get the raw value
    #[inline]
    #[must_use]
    pub fn get(&self) -> usize {
        self.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::pool::DEFAULT_MAX_SIZE;

    #[test]
    fn test_max_pool_size_rejects_zero() {
        assert!(MaxPoolSize::try_new(0).is_err());
        assert_eq!(MaxPoolSize::try_new(3).unwrap().get(), 3);
    }

    #[test]
    fn test_max_pool_size_default_matches_constant() {
        assert_eq!(MaxPoolSize::default().get(), DEFAULT_MAX_SIZE);
    }

    #[test]
    fn test_max_pool_size_from_str() {
        assert_eq!("5".parse::<MaxPoolSize>().unwrap().get(), 5);
        assert!("0".parse::<MaxPoolSize>().is_err());
        assert!("many".parse::<MaxPoolSize>().is_err());
    }

    #[test]
    fn test_max_pool_size_deserializes_from_toml() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            size: MaxPoolSize,
        }
        let parsed: Wrapper = toml::from_str("size = 4").unwrap();
        assert_eq!(parsed.size.get(), 4);
        assert!(toml::from_str::<Wrapper>("size = 0").is_err());
    }

    #[test]
    fn test_thread_count_zero_means_cpu_count() {
        assert!(ThreadCount::from_requested(0).get() >= 1);
        assert_eq!(ThreadCount::from_requested(3).get(), 3);
        assert_eq!(ThreadCount::single().get(), 1);
    }
}
