//! Server configuration read from the environment

use crate::error::ConfigError;
use std::time::Duration;

/// Participants allowed in a room unless `ROOM_CAPACITY` says otherwise.
pub const DEFAULT_ROOM_CAPACITY: usize = 2;

/// Runtime settings for the signaling server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    /// Maximum participants per room, at least 2
    pub room_capacity: usize,
    /// Age after which a room nobody has joined is reaped
    pub unclaimed_room_ttl: Duration,
    pub reaper_interval: Duration,
    pub ping_interval: Duration,
    /// A connection that sends nothing for this long is dropped
    pub idle_timeout: Duration,
    /// Depth of each participant's outbound queue
    pub outbound_buffer: usize,
    /// Largest inbound WebSocket message, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8000,
            room_capacity: DEFAULT_ROOM_CAPACITY,
            unclaimed_room_ttl: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            outbound_buffer: 64,
            max_message_size: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Build the configuration from environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            http_port: parse(&lookup, "HTTP_PORT", "a port number")?
                .unwrap_or(defaults.http_port),
            room_capacity: parse(&lookup, "ROOM_CAPACITY", "an integer of at least 2")?
                .unwrap_or(defaults.room_capacity),
            unclaimed_room_ttl: secs(&lookup, "UNCLAIMED_ROOM_TTL_SECS")?
                .unwrap_or(defaults.unclaimed_room_ttl),
            reaper_interval: secs(&lookup, "REAPER_INTERVAL_SECS")?
                .unwrap_or(defaults.reaper_interval),
            ping_interval: secs(&lookup, "PING_INTERVAL_SECS")?
                .unwrap_or(defaults.ping_interval),
            idle_timeout: secs(&lookup, "IDLE_TIMEOUT_SECS")?.unwrap_or(defaults.idle_timeout),
            outbound_buffer: parse(&lookup, "OUTBOUND_BUFFER", "a positive integer")?
                .unwrap_or(defaults.outbound_buffer),
            max_message_size: parse(&lookup, "MAX_MESSAGE_BYTES", "a positive integer")?
                .unwrap_or(defaults.max_message_size),
        };
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.room_capacity < 2 {
            return Err(ConfigError::Invalid {
                name: "ROOM_CAPACITY",
                expected: "an integer of at least 2",
                value: self.room_capacity.to_string(),
            });
        }
        for (name, value) in [
            ("OUTBOUND_BUFFER", self.outbound_buffer),
            ("MAX_MESSAGE_BYTES", self.max_message_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    expected: "a positive integer",
                    value: "0".to_string(),
                });
            }
        }
        // tokio intervals panic on a zero period
        for (name, value) in [
            ("REAPER_INTERVAL_SECS", self.reaper_interval),
            ("PING_INTERVAL_SECS", self.ping_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    name,
                    expected: "a positive number of seconds",
                    value: "0".to_string(),
                });
            }
        }
        // the first keepalive tick must find the connection still within its timeout
        if self.idle_timeout <= self.ping_interval {
            return Err(ConfigError::Invalid {
                name: "IDLE_TIMEOUT_SECS",
                expected: "more seconds than PING_INTERVAL_SECS",
                value: self.idle_timeout.as_secs().to_string(),
            });
        }
        Ok(self)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                name,
                expected,
                value: raw,
            }),
    }
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(lookup, name, "a whole number of seconds")?.map(Duration::from_secs))
}
