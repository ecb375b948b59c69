use anyhow::bail;
use std::time::Duration;

/// Deliberate handshake mutations used to verify that peers with a version
///  mismatch degrade gracefully. Applied at most once per connection, as a
///  transform just before the encode, so the codec itself stays untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct HelloTestHook {
    /// Advertise a minor version one higher than the real one.
    pub bump_minor: bool,
    /// Send the legacy magic instead of the versioned one.
    pub legacy_magic: bool,
}

pub struct ProtocolConfig {
    /// Timeout applied to each handshake read and write.
    pub hello_timeout: Duration,

    /// Number of pre-allocated frames for standalone acknowledgments. When
    ///  the pool is exhausted, a ZC request that cannot be piggybacked fails
    ///  with an out-of-memory error and the caller retries.
    pub ack_frame_pool_size: usize,

    pub hello_test_hook: Option<HelloTestHook>,
}

impl ProtocolConfig {
    pub fn default_config() -> ProtocolConfig {
        ProtocolConfig {
            hello_timeout: Duration::from_secs(50),
            ack_frame_pool_size: 256,
            hello_test_hook: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hello_timeout.is_zero() {
            bail!("handshake timeout must be non-zero");
        }
        if self.ack_frame_pool_size == 0 {
            bail!("ACK frame pool must hold at least one frame");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ProtocolConfig::default_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let mut config = ProtocolConfig::default_config();
        config.ack_frame_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = ProtocolConfig::default_config();
        config.hello_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
