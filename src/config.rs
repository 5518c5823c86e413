use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::commissioner::petition::validate_commissioner_id;
use crate::commissioner::{CommissionerSettings, KEEP_ALIVE_GRACE_FACTOR, KEEP_ALIVE_INTERVAL};
use crate::meshcop::steering::STEERING_DATA_MAX_LEN;
use crate::meshcop::{CommissioningState, Eui64, NetworkCandidate};
use crate::InterfaceId;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub commissioner: CommissionerConfig,
    pub link: LinkConfig,
    #[serde(default)]
    pub joiners: Vec<JoinerConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct CommissionerConfig {
    pub interface_id: InterfaceId,
    pub commissioner_id: String,
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,
    #[serde(default = "default_keep_alive_grace_factor")]
    pub keep_alive_grace_factor: u32,
    #[serde(default)]
    pub purge_on_accept: bool,
    #[serde(default = "default_steering_data_len")]
    pub steering_data_len: usize,
}

/// Loopback leader used in place of a radio
#[derive(Debug, Deserialize)]
pub struct LinkConfig {
    /// Interface already holds the network credentials
    pub secured: bool,
    pub leader_verdict: CommissioningState,
    /// Network "found" by discovery, for unsecure commissioning
    pub network: Option<NetworkCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct JoinerConfig {
    pub eui64: Eui64,
    pub pskd: String,
    #[serde(default)]
    pub short_eui64: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Longest keep-alive cadence accepted from configuration (one hour)
pub const MAX_KEEP_ALIVE_INTERVAL_SECS: u64 = 3600;
/// Largest grace factor accepted from configuration
pub const MAX_KEEP_ALIVE_GRACE_FACTOR: u32 = 16;

fn default_keep_alive_interval_secs() -> u64 {
    KEEP_ALIVE_INTERVAL.as_secs()
}

fn default_keep_alive_grace_factor() -> u32 {
    KEEP_ALIVE_GRACE_FACTOR
}

fn default_steering_data_len() -> usize {
    STEERING_DATA_MAX_LEN
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        config.commissioner.validate()?;
        Ok(config)
    }
}

impl CommissionerConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if !(1..=MAX_KEEP_ALIVE_INTERVAL_SECS).contains(&self.keep_alive_interval_secs) {
            anyhow::bail!(
                "keep_alive_interval_secs must be 1-{}, got {}",
                MAX_KEEP_ALIVE_INTERVAL_SECS,
                self.keep_alive_interval_secs
            );
        }
        if !(1..=MAX_KEEP_ALIVE_GRACE_FACTOR).contains(&self.keep_alive_grace_factor) {
            anyhow::bail!(
                "keep_alive_grace_factor must be 1-{}, got {}",
                MAX_KEEP_ALIVE_GRACE_FACTOR,
                self.keep_alive_grace_factor
            );
        }
        if !(1..=STEERING_DATA_MAX_LEN).contains(&self.steering_data_len) {
            anyhow::bail!(
                "steering_data_len must be 1-{}, got {}",
                STEERING_DATA_MAX_LEN,
                self.steering_data_len
            );
        }
        validate_commissioner_id(&self.commissioner_id)
            .map_err(|e| anyhow::anyhow!("commissioner_id: {}", e))?;
        Ok(())
    }

    pub fn settings(&self) -> CommissionerSettings {
        CommissionerSettings {
            keep_alive_interval: Duration::from_secs(self.keep_alive_interval_secs),
            keep_alive_grace_factor: self.keep_alive_grace_factor,
            purge_on_accept: self.purge_on_accept,
            steering_data_len: self.steering_data_len,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            commissioner: CommissionerConfig {
                interface_id: 1,
                commissioner_id: "mesh-commissioner".to_string(),
                keep_alive_interval_secs: default_keep_alive_interval_secs(),
                keep_alive_grace_factor: default_keep_alive_grace_factor(),
                purge_on_accept: false,
                steering_data_len: default_steering_data_len(),
            },
            link: LinkConfig {
                secured: true,
                leader_verdict: CommissioningState::Accept,
                network: None,
            },
            joiners: Vec::new(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [commissioner]
            interface_id = 2
            commissioner_id = "comm-1"
            purge_on_accept = true

            [link]
            secured = false
            leader_verdict = "pending"
            network = { network_name = "OpenThread", pan_id = 0xface, channel = 15 }

            [[joiners]]
            eui64 = "01:02:03:04:05:06:07:08"
            pskd = "ABCDE"

            [[joiners]]
            eui64 = "1122334455667788"
            pskd = "J01NME"
            short_eui64 = true

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.commissioner.interface_id, 2);
        let settings = config.commissioner.settings();
        assert_eq!(settings.keep_alive_interval, Duration::from_secs(40));
        assert_eq!(settings.keep_alive_grace(), Duration::from_secs(80));
        assert!(settings.purge_on_accept);
        assert_eq!(config.link.leader_verdict, CommissioningState::Pending);
        assert_eq!(config.link.network.as_ref().map(|n| n.pan_id), Some(0xFACE));
        assert_eq!(config.joiners.len(), 2);
        assert_eq!(config.joiners[0].eui64, Eui64::new([1, 2, 3, 4, 5, 6, 7, 8]));
        assert!(config.joiners[1].short_eui64);
    }

    #[test]
    fn test_bad_eui64_fails_parse() {
        let result = Config::parse(
            r#"
            [commissioner]
            interface_id = 1
            commissioner_id = "comm"

            [link]
            secured = true
            leader_verdict = "accept"

            [[joiners]]
            eui64 = "0102"
            pskd = "ABCDE"

            [logging]
            level = "info"
            "#,
        );
        assert!(result.is_err());
    }

    fn with_commissioner(extra: &str) -> String {
        format!(
            r#"
            [commissioner]
            interface_id = 1
            commissioner_id = "comm"
            {}

            [link]
            secured = true
            leader_verdict = "accept"

            [logging]
            level = "info"
            "#,
            extra
        )
    }

    #[test]
    fn test_defaults_pass_validation() {
        let config = Config::parse(&with_commissioner("")).unwrap();
        assert_eq!(config.commissioner.keep_alive_interval_secs, 40);
        assert_eq!(config.commissioner.keep_alive_grace_factor, 2);
        assert_eq!(config.commissioner.steering_data_len, 16);
        assert!(config.joiners.is_empty());
        assert!(Config::default().commissioner.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for bad in [
            "keep_alive_interval_secs = 0",
            "keep_alive_interval_secs = 10000000000000",
            "keep_alive_grace_factor = 0",
            "keep_alive_grace_factor = 4000000000",
            "steering_data_len = 0",
            "steering_data_len = 17",
        ] {
            let err = Config::parse(&with_commissioner(bad)).unwrap_err();
            let field = bad.split(' ').next().unwrap();
            assert!(err.to_string().contains(field), "{}: {}", bad, err);
        }
        assert!(Config::parse(&with_commissioner("keep_alive_interval_secs = 3600")).is_ok());
        assert!(Config::parse(&with_commissioner("steering_data_len = 1")).is_ok());
    }

    #[test]
    fn test_empty_commissioner_id_rejected() {
        let content = with_commissioner("").replace("\"comm\"", "\"\"");
        assert!(Config::parse(&content).is_err());
    }
}
