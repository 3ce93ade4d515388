//! Configuration loading via `ortho-config`.
//!
//! Credentials and tuning knobs merge from configuration files, environment
//! variables, and CLI flags. Per-request values (image, regions, names) are
//! never configured here; they live on the request itself.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::gateway::wait::{PollPolicy, PollSettings, LAUNCH_POLL_INTERVAL, TEARDOWN_POLL_INTERVAL};

/// Environment variable carrying the access key for a provider CLI child
/// process.
pub const ENV_ACCESS_KEY: &str = "AWS_ACCESS_KEY_ID";
/// Environment variable carrying the secret key for a provider CLI child
/// process.
pub const ENV_SECRET_KEY: &str = "AWS_SECRET_ACCESS_KEY";

/// Ambient settings shared by every copy run.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "AMIFERRY")]
pub struct FerryConfig {
    /// Provider CLI binary to drive. Defaults to `aws` on the `PATH`.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Access key for the source account. When unset the CLI child inherits
    /// the ambient credential chain.
    pub access_key: Option<String>,
    /// Secret key paired with `access_key`.
    pub secret_key: Option<String>,
    /// Access key for the destination account. Defaults to the source key.
    pub destination_access_key: Option<String>,
    /// Secret key paired with `destination_access_key`.
    pub destination_secret_key: Option<String>,
    /// Seconds between polls while waiting on launches, snapshots, and
    /// images.
    pub launch_poll_secs: Option<u64>,
    /// Seconds between polls while waiting on detaches and deletes.
    pub teardown_poll_secs: Option<u64>,
    /// Overall budget, in seconds, applied to every wait. Unset waits
    /// indefinitely.
    pub wait_deadline_secs: Option<u64>,
}

impl FerryConfig {
    /// Loads configuration from files and environment variables only.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("amiferry")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that keys were supplied in matched pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnpairedCredential`] when one half of a key
    /// pair is missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(ConfigError::UnpairedCredential {
                account: "source",
            });
        }
        if self.destination_access_key.is_some() != self.destination_secret_key.is_some() {
            return Err(ConfigError::UnpairedCredential {
                account: "destination",
            });
        }
        Ok(())
    }

    /// Environment overrides for CLI children talking to the source account.
    #[must_use]
    pub fn source_credentials(&self) -> Vec<(String, String)> {
        credential_envs(self.access_key.as_deref(), self.secret_key.as_deref())
    }

    /// Environment overrides for CLI children talking to the destination
    /// account, falling back to the source credentials.
    #[must_use]
    pub fn destination_credentials(&self) -> Vec<(String, String)> {
        let access = self
            .destination_access_key
            .as_deref()
            .or(self.access_key.as_deref());
        let secret = self
            .destination_secret_key
            .as_deref()
            .or(self.secret_key.as_deref());
        credential_envs(access, secret)
    }

    /// Polling intervals and deadline assembled from the configured knobs.
    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        let launch = self
            .launch_poll_secs
            .map_or(LAUNCH_POLL_INTERVAL, Duration::from_secs);
        let teardown = self
            .teardown_poll_secs
            .map_or(TEARDOWN_POLL_INTERVAL, Duration::from_secs);
        let mut settings = PollSettings {
            launch: PollPolicy::unbounded(launch),
            teardown: PollPolicy::unbounded(teardown),
        };
        if let Some(deadline) = self.wait_deadline_secs.map(Duration::from_secs) {
            settings.launch = settings.launch.with_deadline(deadline);
            settings.teardown = settings.teardown.with_deadline(deadline);
        }
        settings
    }
}

fn credential_envs(access: Option<&str>, secret: Option<&str>) -> Vec<(String, String)> {
    match (access, secret) {
        (Some(access), Some(secret)) => vec![
            (String::from(ENV_ACCESS_KEY), access.to_owned()),
            (String::from(ENV_SECRET_KEY), secret.to_owned()),
        ],
        _ => Vec::new(),
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates an access key was supplied without its secret, or vice
    /// versa.
    #[error("{account} credentials need both an access key and a secret key")]
    UnpairedCredential {
        /// Which account half-configured its keys.
        account: &'static str,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base_config() -> FerryConfig {
        FerryConfig {
            aws_bin: String::from("aws"),
            access_key: None,
            secret_key: None,
            destination_access_key: None,
            destination_secret_key: None,
            launch_poll_secs: None,
            teardown_poll_secs: None,
            wait_deadline_secs: None,
        }
    }

    #[rstest]
    fn absent_credentials_inherit_the_environment() {
        let config = base_config();
        assert!(config.validate().is_ok());
        assert!(config.source_credentials().is_empty());
        assert!(config.destination_credentials().is_empty());
    }

    #[rstest]
    fn destination_falls_back_to_source_credentials() {
        let mut config = base_config();
        config.access_key = Some(String::from("AKIASRC"));
        config.secret_key = Some(String::from("s3cr3t"));
        let envs = config.destination_credentials();
        assert_eq!(
            envs,
            vec![
                (String::from(ENV_ACCESS_KEY), String::from("AKIASRC")),
                (String::from(ENV_SECRET_KEY), String::from("s3cr3t")),
            ]
        );
    }

    #[rstest]
    fn destination_keys_override_the_fallback() {
        let mut config = base_config();
        config.access_key = Some(String::from("AKIASRC"));
        config.secret_key = Some(String::from("s3cr3t"));
        config.destination_access_key = Some(String::from("AKIADST"));
        config.destination_secret_key = Some(String::from("other"));
        let envs = config.destination_credentials();
        assert_eq!(envs[0].1, "AKIADST");
        assert_eq!(envs[1].1, "other");
    }

    #[rstest]
    #[case(Some("AKIA"), None, "source")]
    #[case(None, Some("s3cr3t"), "source")]
    fn unpaired_source_credentials_are_rejected(
        #[case] access: Option<&str>,
        #[case] secret: Option<&str>,
        #[case] account: &'static str,
    ) {
        let mut config = base_config();
        config.access_key = access.map(str::to_owned);
        config.secret_key = secret.map(str::to_owned);
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnpairedCredential { account })
        );
    }

    #[rstest]
    fn poll_overrides_take_effect() {
        let mut config = base_config();
        config.launch_poll_secs = Some(2);
        config.teardown_poll_secs = Some(1);
        config.wait_deadline_secs = Some(600);
        let polls = config.poll_settings();
        assert_eq!(polls.launch.interval, Duration::from_secs(2));
        assert_eq!(polls.teardown.interval, Duration::from_secs(1));
        assert_eq!(polls.launch.deadline, Some(Duration::from_secs(600)));
        assert_eq!(polls.teardown.deadline, Some(Duration::from_secs(600)));
    }
}
