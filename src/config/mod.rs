//! Startup configuration
//!
//! Values come from an optional TOML file, then the environment (a `.env`
//! file is loaded into it by `main`), then command-line flags. The result is
//! validated once into [`Settings`]; any error aborts startup.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{bail, Context as _, Result};
use serde::Deserialize;

use crate::core::backoff::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
use crate::core::context::{DEFAULT_CONFIRMATION_POLL, MAINNET_CHAIN_ID, TRANSFER_GAS_LIMIT};
use crate::core::{ConcurrencyPolicy, Context, RetryPolicy};
use crate::infrastructure::{ChainClient, ProviderConfig};

/// Raw, unvalidated configuration. Every field is optional here.
#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub infura_id: Option<String>,
    pub ws_url: Option<String>,
    pub ipc_path: Option<String>,
    pub deposit_wallet_private_key: Option<String>,
    pub vault_wallet_address: Option<String>,
    pub confirmations_before_withdrawal: Option<u64>,
    pub chain_id: Option<u64>,
    pub gas_limit: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub confirmation_poll_ms: Option<u64>,
    pub withdrawal_policy: Option<ConcurrencyPolicy>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("infura_id", &self.infura_id.as_ref().map(|_| "<redacted>"))
            .field("ws_url", &self.ws_url)
            .field("ipc_path", &self.ipc_path)
            .field(
                "deposit_wallet_private_key",
                &self.deposit_wallet_private_key.as_ref().map(|_| "<redacted>"),
            )
            .field("vault_wallet_address", &self.vault_wallet_address)
            .field(
                "confirmations_before_withdrawal",
                &self.confirmations_before_withdrawal,
            )
            .field("chain_id", &self.chain_id)
            .field("gas_limit", &self.gas_limit)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("confirmation_poll_ms", &self.confirmation_poll_ms)
            .field("withdrawal_policy", &self.withdrawal_policy)
            .finish()
    }
}

/// Load the TOML config file.
///
/// An explicitly given path must exist; a missing file at the default
/// location yields an empty config.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(Config::default()),
        },
    };
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str::<Config>(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

/// Default config file location
pub fn config_path() -> Option<PathBuf> {
    config_path_with(|key| std::env::var_os(key), Path::new(LOCAL_CONFIG_FILE))
}

const LOCAL_CONFIG_FILE: &str = "sweep.toml";

/// `SWEEP_CONFIG` if set, else `local` when it exists, else the platform
/// config dir (`~/.config/sweep/config.toml` on Linux)
fn config_path_with<F>(lookup: F, local: &Path) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<std::ffi::OsString>,
{
    if let Some(path) = lookup("SWEEP_CONFIG").filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    if local.is_file() {
        return Some(local.to_path_buf());
    }
    directories::ProjectDirs::from("io", "sweep", "sweep")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Overlay environment variables, e.g. `merge_env(|k| std::env::var(k).ok())`
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("INFURA_ID") {
            self.infura_id = Some(v);
        }
        if let Some(v) = get("WS_URL") {
            self.ws_url = Some(v);
        }
        if let Some(v) = get("IPC_PATH") {
            self.ipc_path = Some(v);
        }
        if let Some(v) = get("DEPOSIT_WALLET_PRIVATE_KEY") {
            self.deposit_wallet_private_key = Some(v);
        }
        if let Some(v) = get("VAULT_WALLET_ADDRESS") {
            self.vault_wallet_address = Some(v);
        }
        if let Some(v) = get("CONFIRMATIONS_BEFORE_WITHDRAWAL") {
            self.confirmations_before_withdrawal =
                Some(parse_env("CONFIRMATIONS_BEFORE_WITHDRAWAL", &v)?);
        }
        if let Some(v) = get("CHAIN_ID") {
            self.chain_id = Some(parse_env("CHAIN_ID", &v)?);
        }
        if let Some(v) = get("GAS_LIMIT") {
            self.gas_limit = Some(parse_env("GAS_LIMIT", &v)?);
        }
        if let Some(v) = get("MAX_ATTEMPTS") {
            self.max_attempts = Some(parse_env("MAX_ATTEMPTS", &v)?);
        }
        if let Some(v) = get("RETRY_BASE_DELAY_MS") {
            self.retry_base_delay_ms = Some(parse_env("RETRY_BASE_DELAY_MS", &v)?);
        }
        if let Some(v) = get("RETRY_MAX_DELAY_MS") {
            self.retry_max_delay_ms = Some(parse_env("RETRY_MAX_DELAY_MS", &v)?);
        }
        if let Some(v) = get("CONFIRMATION_POLL_MS") {
            self.confirmation_poll_ms = Some(parse_env("CONFIRMATION_POLL_MS", &v)?);
        }
        if let Some(v) = get("WITHDRAWAL_POLICY") {
            self.withdrawal_policy = Some(parse_env("WITHDRAWAL_POLICY", &v)?);
        }

        Ok(self)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|err| anyhow::anyhow!("{}: invalid value `{}`: {}", key, value.trim(), err))
}

/// Validated configuration
#[derive(Clone)]
pub struct Settings {
    pub endpoint: ProviderConfig,
    pub signer: PrivateKeySigner,
    pub vault_address: Address,
    pub confirmations: u64,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub retry: RetryPolicy,
    pub confirmation_poll: Duration,
    pub policy: ConcurrencyPolicy,
}

impl Settings {
    /// Address controlled by the deposit key
    pub fn deposit_address(&self) -> Address {
        self.signer.address()
    }

    /// Build the shared context around a connected client
    pub fn context(&self, client: Arc<dyn ChainClient>) -> Context {
        Context::new(
            client,
            self.deposit_address(),
            self.vault_address,
            self.confirmations,
        )
        .with_chain_id(self.chain_id)
        .with_gas_limit(self.gas_limit)
        .with_retry(self.retry)
        .with_confirmation_poll(self.confirmation_poll)
        .with_policy(self.policy)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("endpoint", &self.endpoint.display())
            .field("deposit_address", &self.deposit_address())
            .field("vault_address", &self.vault_address)
            .field("confirmations", &self.confirmations)
            .field("chain_id", &self.chain_id)
            .field("gas_limit", &self.gas_limit)
            .field("retry", &self.retry)
            .field("confirmation_poll", &self.confirmation_poll)
            .field("policy", &self.policy)
            .finish()
    }
}

impl TryFrom<Config> for Settings {
    type Error = anyhow::Error;

    fn try_from(config: Config) -> Result<Self> {
        let endpoint = endpoint_from_config(&config)?;

        let key = config
            .deposit_wallet_private_key
            .context("DEPOSIT_WALLET_PRIVATE_KEY is not set")?;
        let signer = PrivateKeySigner::from_str(key.trim())
            .map_err(|_| anyhow::anyhow!("DEPOSIT_WALLET_PRIVATE_KEY is not a valid private key"))?;

        let vault = config
            .vault_wallet_address
            .context("VAULT_WALLET_ADDRESS is not set")?;
        let vault_address = Address::from_str(vault.trim())
            .with_context(|| format!("VAULT_WALLET_ADDRESS: invalid address `{}`", vault.trim()))?;
        if vault_address == signer.address() {
            bail!("VAULT_WALLET_ADDRESS must differ from the deposit address");
        }

        let confirmations = config
            .confirmations_before_withdrawal
            .context("CONFIRMATIONS_BEFORE_WITHDRAWAL is not set")?;

        let max_attempts = config.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            bail!("MAX_ATTEMPTS must be at least 1");
        }
        let retry = RetryPolicy {
            max_attempts,
            base_delay: config
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_BASE_DELAY),
            max_delay: config
                .retry_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MAX_DELAY),
        };

        let confirmation_poll = config
            .confirmation_poll_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONFIRMATION_POLL);
        if confirmation_poll.is_zero() {
            bail!("CONFIRMATION_POLL_MS must be greater than zero");
        }

        Ok(Settings {
            endpoint,
            signer,
            vault_address,
            confirmations,
            chain_id: config.chain_id.unwrap_or(MAINNET_CHAIN_ID),
            gas_limit: config.gas_limit.unwrap_or(TRANSFER_GAS_LIMIT),
            retry,
            confirmation_poll,
            policy: config.withdrawal_policy.unwrap_or_default(),
        })
    }
}

/// IPC wins over an explicit WebSocket URL, which wins over Infura
fn endpoint_from_config(config: &Config) -> Result<ProviderConfig> {
    if let Some(path) = &config.ipc_path {
        #[cfg(unix)]
        return Ok(ProviderConfig::Ipc(PathBuf::from(path)));
        #[cfg(not(unix))]
        bail!("IPC_PATH {} is only supported on Unix", path);
    }
    if let Some(url) = &config.ws_url {
        let url = url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            bail!("WS_URL must be a ws:// or wss:// endpoint; HTTP cannot stream pending transactions");
        }
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            bail!("WS_URL must start with ws:// or wss://, got `{}`", url);
        }
        return Ok(ProviderConfig::WebSocket(url.to_string()));
    }
    if let Some(id) = &config.infura_id {
        return Ok(ProviderConfig::infura(id.trim()));
    }
    bail!("no node endpoint configured (set INFURA_ID, WS_URL or IPC_PATH)")
}
