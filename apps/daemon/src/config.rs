//! Daemon configuration.
//!
//! Stored as TOML at `$NIMBUS_CONFIG`, or `~/.config/nimbus/server.toml`
//! when that is unset. A missing file is created with defaults.

use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use nimbus_auth::KdfParams;
use nimbus_server::{ProvisionPolicy, ServerConfig};
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "NIMBUS_CONFIG";
const CREDENTIALS_FILE: &str = "users.json";

#[cfg(target_os = "windows")]
const BASE_ENV: &str = "APPDATA";
#[cfg(not(target_os = "windows"))]
const BASE_ENV: &str = "HOME";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Parent of every account's storage root.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Credential file; `users.json` next to the config file when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,

    #[serde(default)]
    pub provision: ProvisionPolicy,

    #[serde(default = "default_kdf_log_n")]
    pub kdf_log_n: u8,

    #[serde(default = "default_kdf_r")]
    pub kdf_r: u32,

    #[serde(default = "default_kdf_p")]
    pub kdf_p: u32,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    ServerConfig::default().port
}

fn default_storage_dir() -> PathBuf {
    ServerConfig::default().storage_dir
}

fn default_kdf_log_n() -> u8 {
    KdfParams::default().log_n
}

fn default_kdf_r() -> u32 {
    KdfParams::default().r
}

fn default_kdf_p() -> u32 {
    KdfParams::default().p
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            storage_dir: default_storage_dir(),
            credentials_path: None,
            provision: ProvisionPolicy::default(),
            kdf_log_n: default_kdf_log_n(),
            kdf_r: default_kdf_r(),
            kdf_p: default_kdf_p(),
        }
    }
}

impl Config {
    /// Loads `path`, writing a default file first if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "default configuration written");
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_address: self.bind_address,
            port: self.port,
            storage_dir: self.storage_dir.clone(),
            provision: self.provision,
            ..ServerConfig::default()
        }
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            log_n: self.kdf_log_n,
            r: self.kdf_r,
            p: self.kdf_p,
            ..KdfParams::default()
        }
    }

    /// Resolves the credential file for a config loaded from `config_path`.
    pub fn credentials_path(&self, config_path: &Path) -> PathBuf {
        match &self.credentials_path {
            Some(path) => path.clone(),
            None => config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(CREDENTIALS_FILE),
        }
    }
}

/// Returns the configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_base_dir()?.join("nimbus").join("server.toml"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    base_dir_from(std::env::var_os(BASE_ENV))
}

fn base_dir_from(value: Option<OsString>) -> anyhow::Result<PathBuf> {
    let base = value
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{BASE_ENV} is not set; set {CONFIG_ENV} to pick a config file"))?;

    #[cfg(target_os = "windows")]
    {
        Ok(PathBuf::from(base))
    }

    #[cfg(not(target_os = "windows"))]
    {
        Ok(PathBuf::from(base).join(".config"))
    }
}
