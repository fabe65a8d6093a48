// Valve Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};

/// Rate valve configuration: at most `rate` items are admitted per
/// `window`, and at most `max_backlog` items may wait for admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValveConfig {
    /// Maximum items admitted per window
    pub rate: u32,
    /// Fixed window length
    pub window: Duration,
    /// Backlog depth before enqueue refuses with backpressure
    pub max_backlog: usize,
}

impl ValveConfig {
    /// Validate and build a valve configuration.
    ///
    /// Zero `rate` or zero `window` is a configuration error: no ticks
    /// would ever admit work, so construction fails fast instead.
    pub fn new(rate: u32, window: Duration, max_backlog: usize) -> Result<Self> {
        if rate == 0 {
            return Err(DomainError::Configuration(
                "valve rate must be greater than zero".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(DomainError::Configuration(
                "valve window must be greater than zero".to_string(),
            ));
        }
        if max_backlog == 0 {
            return Err(DomainError::Configuration(
                "valve backlog bound must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            rate,
            window,
            max_backlog,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = ValveConfig::new(5, Duration::from_secs(1), 100).unwrap();
        assert_eq!(config.rate, 5);
        assert_eq!(config.window, Duration::from_secs(1));
        assert_eq!(config.max_backlog, 100);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let result = ValveConfig::new(0, Duration::from_secs(1), 100);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("rate"));
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = ValveConfig::new(5, Duration::ZERO, 100);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("window"));
    }

    #[test]
    fn test_zero_backlog_rejected() {
        let result = ValveConfig::new(5, Duration::from_secs(1), 0);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("backlog"));
    }
}
