//! Operator configuration for reaching a deployed instance.
//!
//! [`InstanceConfig`] carries the SSH client settings and the log filter.
//! Values are merged by `ortho-config` from defaults, `bbr.toml` discovered
//! on the usual search path (or named by `BBR_CONFIG_PATH`) and `BBR_*`
//! environment variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default SSH user on BOSH-deployed VMs.
pub const DEFAULT_SSH_USER: &str = "vcap";

/// SSH and logging settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BBR",
    discovery(
        app_name = "bbr",
        env_var = "BBR_CONFIG_PATH",
        config_file_name = "bbr.toml",
        dotfile_name = ".bbr.toml",
        project_file_name = "bbr.toml"
    )
)]
pub struct InstanceConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub ssh_user: String,
    /// Remote SSH port.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Private key used for authentication. Supports `~/` expansion. When
    /// absent the client falls back to its default identities.
    pub ssh_identity_file: Option<String>,
    /// Whether to force batch mode so the client never prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; `/dev/null` suits short-lived VMs.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Log filter directive, overridden by `RUST_LOG` when set.
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
}

/// Errors raised while loading or validating [`InstanceConfig`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required value is empty or whitespace.
    #[error("missing {field}: set BBR_{env_suffix} or add {field} to bbr.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Parsing or merging configuration layers failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl InstanceConfig {
    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConfig`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Self::require_value(&self.log_level, "log_level")?;
        if self.ssh_port == 0 {
            return Err(ConfigError::InvalidConfig {
                field: String::from("ssh_port"),
            });
        }
        Ok(())
    }

    /// Loads configuration from defaults, files and environment variables
    /// without consuming the process arguments, which belong to the CLI.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("bbr-instance")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), ConfigError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(ConfigError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        Self::require_optional_value(Some(value), field)
    }
}
