use std::{path::PathBuf, time::Duration};

use alloy::primitives::Address;
use serde::Deserialize;
use serde_with::serde_as;
use url::Url;

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChainSettings {
    pub rpc_urls: Vec<Url>,
    pub chain_label: String,
    pub native_symbol: String,
    pub multicall_address: Address,
    #[serde(default)]
    pub explorer_base_url: String,
    #[serde(default)]
    pub chart_base_url: String,
    #[serde(default = "default_base_tokens")]
    pub base_tokens: Vec<String>,
    #[serde(default = "default_rpc_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub rpc_timeout: Duration,
}

fn default_base_tokens() -> Vec<String> {
    ["WETH", "WBNB", "USDT", "USDC", "BUSD", "DAI"]
        .map(str::to_string)
        .to_vec()
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(3)
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IngestSettings {
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: u64,
    #[serde(default = "default_save_interval")]
    pub save_interval: u64,
    #[serde(default = "default_reread_threshold")]
    pub reread_threshold: u64,
    #[serde(default = "default_recent_blocks_window")]
    pub recent_blocks_window: usize,
    #[serde(default = "default_recent_txs_window")]
    pub recent_txs_window: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_fetch_concurrency() -> u64 {
    5
}

fn default_save_interval() -> u64 {
    10
}

fn default_reread_threshold() -> u64 {
    10
}

fn default_recent_blocks_window() -> usize {
    200
}

fn default_recent_txs_window() -> usize {
    10_000
}

fn default_channel_capacity() -> usize {
    512
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            fetch_concurrency: default_fetch_concurrency(),
            save_interval: default_save_interval(),
            reread_threshold: default_reread_threshold(),
            recent_blocks_window: default_recent_blocks_window(),
            recent_txs_window: default_recent_txs_window(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProcessorSettings {
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
    /// Native transfers below this many wei with empty calldata are dropped.
    #[serde(default = "default_min_native_value_wei")]
    pub min_native_value_wei: u128,
}

fn default_dedup_window() -> usize {
    10_000
}

fn default_min_native_value_wei() -> u128 {
    10_000_000_000_000_000
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            dedup_window: default_dedup_window(),
            min_native_value_wei: default_min_native_value_wei(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TraceSettings {
    #[serde(default = "default_receipt_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub receipt_timeout: Duration,
    #[serde(default = "default_receipt_poll_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub receipt_poll_interval: Duration,
}

fn default_receipt_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_receipt_poll_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            receipt_timeout: default_receipt_timeout(),
            receipt_poll_interval: default_receipt_poll_interval(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeliverySettings {
    pub bots: Vec<BotSettings>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: Url,
    #[serde(default = "default_op_spacing")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub op_spacing: Duration,
}

fn default_api_base_url() -> Url {
    Url::parse("https://api.telegram.org").expect("static url")
}

fn default_op_spacing() -> Duration {
    Duration::from_millis(200)
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BotSettings {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub polling: bool,
    #[serde(default)]
    pub open_access: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SignatureSettings {
    #[serde(default = "default_fourbyte_base_url")]
    pub fourbyte_base_url: Url,
    #[serde(default = "default_openchain_base_url")]
    pub openchain_base_url: Url,
}

fn default_fourbyte_base_url() -> Url {
    Url::parse("https://www.4byte.directory").expect("static url")
}

fn default_openchain_base_url() -> Url {
    Url::parse("https://api.openchain.xyz").expect("static url")
}

impl Default for SignatureSettings {
    fn default() -> Self {
        Self {
            fourbyte_base_url: default_fourbyte_base_url(),
            openchain_base_url: default_openchain_base_url(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WatchlistSettings {
    #[serde(default = "default_refresh_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub refresh_interval: Duration,
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(2)
}

impl Default for WatchlistSettings {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StorageSettings {
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    #[serde(default = "default_cache_db_path")]
    pub cache_db_path: PathBuf,
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("wallet-monitor.checkpoint")
}

fn default_cache_db_path() -> PathBuf {
    PathBuf::from("wallet-monitor-cache.db")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            checkpoint_path: default_checkpoint_path(),
            cache_db_path: default_cache_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ButtonTemplate {
    pub text: String,
    pub url_template: String,
}
