//! Service configuration.
//!
//! Every option can be given as a flag but is normally taken from the
//! environment. The struct is parsed once in `main` and handed to
//! [`crate::server::Server`]; nothing reads the environment after that.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::chain::ChainConfig;
use crate::llm::LlmConfig;
use crate::transform::SourceTransform;

#[derive(Parser, Clone)]
#[command(name = "duna-server", about = "DUNA records with generated, deployed Solidity contracts")]
pub struct Config {
    /// HTTP listen address.
    #[arg(long, env = "DUNA_LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    pub listen_addr: String,

    /// SQLite database path.
    #[arg(long, env = "DUNA_DB_PATH", default_value = "duna.db")]
    pub db_path: String,

    /// Chat-completions endpoint used for contract generation.
    #[arg(long, env = "DUNA_LLM_ENDPOINT", default_value = "https://api.openai.com/v1/chat/completions")]
    pub llm_endpoint: String,

    /// Bearer token for the generation endpoint.
    #[arg(long, env = "DUNA_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Model name sent with each generation request.
    #[arg(long, env = "DUNA_LLM_MODEL", default_value = "gpt-4o-mini")]
    pub llm_model: String,

    /// Upper bound on generated tokens.
    #[arg(long, env = "DUNA_LLM_MAX_TOKENS", default_value_t = 2048)]
    pub llm_max_tokens: u32,

    /// Sampling temperature.
    #[arg(long, env = "DUNA_LLM_TEMPERATURE", default_value_t = 0.2)]
    pub llm_temperature: f32,

    /// Extra generation attempts after a failure (0 = no retry).
    #[arg(long, env = "DUNA_LLM_RETRIES", default_value_t = 0)]
    pub llm_retries: u32,

    /// Delay between generation attempts, in milliseconds.
    #[arg(long, env = "DUNA_LLM_RETRY_BACKOFF_MS", default_value_t = 1000)]
    pub llm_retry_backoff_ms: u64,

    /// Path to the `solc` binary.
    #[arg(long, env = "DUNA_SOLC_PATH", default_value = "solc")]
    pub solc_path: PathBuf,

    /// Kill `solc` after this many seconds.
    #[arg(long, env = "DUNA_COMPILE_TIMEOUT_SECS", default_value_t = 60)]
    pub compile_timeout_secs: u64,

    /// Ethereum JSON-RPC endpoint.
    #[arg(long, env = "DUNA_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,

    /// Hex-encoded secp256k1 private key of the deploying account.
    #[arg(long, env = "DUNA_DEPLOYER_KEY", hide_env_values = true)]
    pub deployer_key: Option<String>,

    /// File holding the deployer key (used when DUNA_DEPLOYER_KEY is unset).
    #[arg(long, env = "DUNA_DEPLOYER_KEY_FILE")]
    pub deployer_key_file: Option<PathBuf>,

    /// Chain id to sign for; queried from the node when unset.
    #[arg(long, env = "DUNA_CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Give up waiting for a deployment receipt after this many seconds.
    #[arg(long, env = "DUNA_CONFIRM_TIMEOUT_SECS", default_value_t = 120)]
    pub confirm_timeout_secs: u64,

    /// Receipt polling interval, in milliseconds.
    #[arg(long, env = "DUNA_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Transform applied to generated source before it is stored.
    #[arg(long, env = "DUNA_SOURCE_TRANSFORM", value_enum, default_value_t = SourceTransform::Identity)]
    pub source_transform: SourceTransform,

    /// Emit JSON log lines.
    #[arg(long, env = "DUNA_LOG_JSON")]
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            db_path: "duna.db".to_string(),
            llm_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            llm_api_key: None,
            llm_model: "gpt-4o-mini".to_string(),
            llm_max_tokens: 2048,
            llm_temperature: 0.2,
            llm_retries: 0,
            llm_retry_backoff_ms: 1000,
            solc_path: PathBuf::from("solc"),
            compile_timeout_secs: 60,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            deployer_key: None,
            deployer_key_file: None,
            chain_id: None,
            confirm_timeout_secs: 120,
            poll_interval_ms: 1000,
            source_transform: SourceTransform::Identity,
            log_json: false,
        }
    }
}

impl Config {
    pub fn llm(&self) -> LlmConfig {
        LlmConfig {
            endpoint: self.llm_endpoint.clone(),
            api_key: self.llm_api_key.clone().filter(|k| !k.is_empty()),
            model: self.llm_model.clone(),
            max_tokens: self.llm_max_tokens,
            temperature: self.llm_temperature,
        }
    }

    pub fn chain(&self) -> ChainConfig {
        ChainConfig {
            rpc_url: self.rpc_url.clone(),
            chain_id: self.chain_id,
            confirm_timeout: Duration::from_secs(self.confirm_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.llm_retry_backoff_ms)
    }

    /// The deployer key as hex, from the variable or else the key file.
    pub fn deployer_key_hex(&self) -> Result<String> {
        if let Some(key) = self.deployer_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.trim().to_string());
        }
        let Some(path) = &self.deployer_key_file else {
            bail!("no deployer key configured: set DUNA_DEPLOYER_KEY or DUNA_DEPLOYER_KEY_FILE");
        };
        let key = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployer key file {}", path.display()))?;
        Ok(key.trim().to_string())
    }
}
