//! Two-phase transaction tracing: a calldata-only *fast* pass before
//! the receipt lands, and a *full* pass with logs and balance delta.

use std::{fmt, sync::Arc};

use alloy::{
    consensus::TxReceipt as _,
    eips::BlockId,
    primitives::{Address, U256},
    rpc::types::{Log, TransactionReceipt},
};
use tokio::time::{sleep, Instant};

use crate::{
    chain::{client::FanoutClient, types::Transaction},
    extract,
    settings::TraceSettings,
    tokens::{units, TokenResolver},
};

const NATIVE_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Failed,
    Unknown,
}

impl TxStatus {
    pub fn glyph(&self) -> &'static str {
        match self {
            TxStatus::Success => "✅",
            TxStatus::Failed => "❌",
            TxStatus::Unknown => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Mempool,
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Number(number) => write!(f, "{number}"),
            BlockRef::Mempool => f.write_str("mempool"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeIndicator {
    Up,
    Down,
    Flat,
    Unset,
}

impl ChangeIndicator {
    pub fn glyph(&self) -> &'static str {
        match self {
            ChangeIndicator::Up => "▲",
            ChangeIndicator::Down => "▼",
            ChangeIndicator::Flat => ".",
            ChangeIndicator::Unset => " ",
        }
    }
}

/// Decoded view of a (transaction, watched address) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceResult {
    pub status: TxStatus,
    /// Interacted tokens in resolution order, base tokens last.
    pub tokens: Vec<(Address, String)>,
    pub log_count: Option<usize>,
    pub block: BlockRef,
    pub deployed_contract: Option<Address>,
    pub pnl: String,
    pub balance: String,
    pub change: ChangeIndicator,
    pub transfer_amount: Option<String>,
}

pub struct TraceDecoder {
    client: Arc<FanoutClient>,
    tokens: Arc<TokenResolver>,
    settings: TraceSettings,
}

impl TraceDecoder {
    pub fn new(
        client: Arc<FanoutClient>,
        tokens: Arc<TokenResolver>,
        settings: TraceSettings,
    ) -> Self {
        Self {
            client,
            tokens,
            settings,
        }
    }

    /// Pre-receipt trace: candidates from calldata only, current
    /// balance, unknown status.
    pub async fn fast(&self, tx: &Transaction, watched: Address) -> anyhow::Result<TraceResult> {
        let candidates = self.candidates(tx, &[]).await;
        let (balance, tokens) = tokio::join!(
            self.client.balance(watched, BlockId::latest()),
            self.tokens.lookup(&candidates),
        );
        let balance = balance?;
        let tokens = tokens.unwrap_or_else(|err| {
            tracing::warn!(tx = %tx.hash, error = %err, "token lookup failed, continuing without symbols");
            Vec::new()
        });
        let transfer_amount = self.single_transfer_amount(tx, &tokens);
        Ok(TraceResult {
            status: TxStatus::Unknown,
            tokens,
            log_count: None,
            block: tx
                .block_number
                .map(BlockRef::Number)
                .unwrap_or(BlockRef::Mempool),
            deployed_contract: None,
            pnl: "0.0".to_string(),
            balance: units::format_units_trimmed(balance, NATIVE_DECIMALS, 2),
            change: ChangeIndicator::Unset,
            transfer_amount,
        })
    }

    /// Post-receipt trace. Falls back to [`Self::fast`] against a
    /// freshly fetched transaction when the receipt does not land
    /// within the timeout.
    pub async fn full(&self, tx: &Transaction, watched: Address) -> anyhow::Result<TraceResult> {
        let Some(receipt) = self.wait_for_receipt(tx).await else {
            tracing::debug!(tx = %tx.hash, "receipt unavailable, downgrading to fast trace");
            let refreshed = self
                .client
                .transaction_by_hash(tx.hash)
                .await?
                .unwrap_or_else(|| tx.clone());
            return self.fast(&refreshed, watched).await;
        };

        let block_number = receipt.block_number.or(tx.block_number).unwrap_or_default();
        let candidates = self.candidates(tx, receipt.inner.logs()).await;
        let (balance_now, balance_before, tokens) = tokio::join!(
            self.client.balance(watched, BlockId::number(block_number)),
            self.client
                .balance(watched, BlockId::number(block_number.saturating_sub(1))),
            self.tokens.lookup(&candidates),
        );
        let balance_now = balance_now?;
        let balance_before = balance_before?;
        let tokens = tokens.unwrap_or_else(|err| {
            tracing::warn!(tx = %tx.hash, error = %err, "token lookup failed, continuing without symbols");
            Vec::new()
        });
        let (pnl, change) = balance_delta(balance_now, balance_before);
        let transfer_amount = self.single_transfer_amount(tx, &tokens);
        Ok(TraceResult {
            status: if receipt.inner.status() {
                TxStatus::Success
            } else {
                TxStatus::Failed
            },
            tokens,
            log_count: Some(receipt.inner.logs().len()),
            block: BlockRef::Number(block_number),
            deployed_contract: receipt.contract_address,
            pnl,
            balance: units::format_units_trimmed(balance_now, NATIVE_DECIMALS, 2),
            change,
            transfer_amount,
        })
    }

    /// Candidate addresses: calldata words, log emitters, the call
    /// target, and underlyings of any pair-shaped candidate.
    async fn candidates(&self, tx: &Transaction, logs: &[Log]) -> Vec<Address> {
        let mut candidates = extract::addresses_from_calldata(&tx.input);
        for address in extract::addresses_from_logs(logs) {
            push_unique(&mut candidates, address);
        }
        if let Some(to) = tx.to {
            if to != Address::ZERO {
                push_unique(&mut candidates, to);
            }
        }
        match self.tokens.extract_pair_underlyings(&candidates).await {
            Ok(underlyings) => {
                for underlying in underlyings {
                    push_unique(&mut candidates, underlying);
                }
            }
            Err(err) => {
                tracing::debug!(tx = %tx.hash, error = %err, "pair probe failed, keeping raw candidates")
            }
        }
        candidates
    }

    fn single_transfer_amount(
        &self,
        tx: &Transaction,
        tokens: &[(Address, String)],
    ) -> Option<String> {
        if tokens.len() != 1 || !tx.input.starts_with(&extract::ERC20_TRANSFER_SELECTOR) {
            return None;
        }
        self.tokens.decode_transfer_amount(&tx.input, tokens[0].0)
    }

    /// Polls for the receipt until it is mined or the timeout lapses.
    async fn wait_for_receipt(&self, tx: &Transaction) -> Option<TransactionReceipt> {
        let deadline = Instant::now() + self.settings.receipt_timeout;
        loop {
            match self.client.transaction_receipt(tx.hash).await {
                Ok(Some(receipt)) if receipt.block_number.is_some() => return Some(receipt),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(tx = %tx.hash, error = %err, "receipt query failed")
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(self.settings.receipt_poll_interval).await;
        }
    }
}

fn push_unique(candidates: &mut Vec<Address>, address: Address) {
    if !candidates.contains(&address) {
        candidates.push(address);
    }
}

fn balance_delta(now: U256, before: U256) -> (String, ChangeIndicator) {
    if now == before {
        ("0.0".to_string(), ChangeIndicator::Flat)
    } else if now > before {
        (
            units::format_units_signed(false, now - before, NATIVE_DECIMALS, 3),
            ChangeIndicator::Up,
        )
    } else {
        (
            units::format_units_signed(true, before - now, NATIVE_DECIMALS, 3),
            ChangeIndicator::Down,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        multicall::MulticallBundler,
        testing::{log_json, receipt_json, MockRpc},
        types::TxOrigin,
    };
    use alloy::{
        primitives::{address, Bytes, B256},
        providers::bindings::IMulticall3,
        sol_types::SolValue,
    };
    use sea_orm::Database;
    use serde_json::json;
    use std::time::Duration;

    const WATCHED: Address = address!("00000000219ab540356cBB839Cbe05303d7705Fa");
    const COUNTERPARTY: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const TX_HASH: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn plain_tx() -> Transaction {
        Transaction {
            hash: TX_HASH.parse::<B256>().unwrap(),
            block_number: Some(5),
            block_hash: None,
            index: Some(0),
            from: WATCHED,
            to: Some(COUNTERPARTY),
            nonce: 1,
            gas_limit: 21_000,
            gas_price: Some(1_000_000_000),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            input: Bytes::new(),
            value: U256::from(10u64).pow(U256::from(18u64)),
            chain_id: Some(1),
            origin: TxOrigin::Block,
        }
    }

    async fn decoder_for(rpc: &MockRpc, settings: TraceSettings) -> TraceDecoder {
        use migration::MigratorTrait;
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::LocalMigrator::up(&db, None).await.unwrap();
        let client = Arc::new(
            FanoutClient::new(&[rpc.url()], Duration::from_secs(3)).unwrap(),
        );
        let bundler = Arc::new(MulticallBundler::new(
            client.clone(),
            address!("cA11bde05977b3631167028862bE2a173976CA11"),
        ));
        let tokens = Arc::new(TokenResolver::new(
            bundler,
            Arc::new(db),
            &["WETH".to_string()],
        ));
        TraceDecoder::new(client, tokens, settings)
    }

    fn failed_calls(count: usize) -> serde_json::Value {
        let results: Vec<IMulticall3::Result> = (0..count)
            .map(|_| IMulticall3::Result {
                success: false,
                returnData: Bytes::new(),
            })
            .collect();
        json!(format!("0x{}", alloy::hex::encode(results.abi_encode())))
    }

    #[tokio::test]
    async fn fast_trace_reports_unknown_status_and_current_balance() {
        let rpc = MockRpc::start().await;
        rpc.on("eth_getBalance", json!("0xde0b6b3a7640000")).await;
        rpc.on("eth_call", failed_calls(2)).await;

        let decoder = decoder_for(&rpc, TraceSettings::default()).await;
        let trace = decoder.fast(&plain_tx(), WATCHED).await.unwrap();

        assert_eq!(trace.status, TxStatus::Unknown);
        assert_eq!(trace.block, BlockRef::Number(5));
        assert_eq!(trace.pnl, "0.0");
        assert_eq!(trace.balance, "1.0");
        assert_eq!(trace.change, ChangeIndicator::Unset);
        assert!(trace.tokens.is_empty());
        assert_eq!(trace.transfer_amount, None);
        assert_eq!(trace.log_count, None);
    }

    #[tokio::test]
    async fn full_trace_reports_status_logs_and_balance_delta() {
        let rpc = MockRpc::start().await;
        rpc.on(
            "eth_getTransactionReceipt",
            receipt_json(
                TX_HASH,
                &format!("{WATCHED:#x}"),
                Some(&format!("{COUNTERPARTY:#x}")),
                "0x5",
                true,
                vec![
                    log_json(&format!("{COUNTERPARTY:#x}"), "0x5", TX_HASH, 0),
                    log_json(&format!("{COUNTERPARTY:#x}"), "0x5", TX_HASH, 1),
                ],
            ),
        )
        .await;
        // balance at the tx block and the one before it
        rpc.on_match("eth_getBalance", "\"0x5\"", json!("0x1bc16d674ec80000"))
            .await;
        rpc.on_match("eth_getBalance", "\"0x4\"", json!("0xde0b6b3a7640000"))
            .await;
        rpc.on("eth_call", failed_calls(2)).await;

        let decoder = decoder_for(&rpc, TraceSettings::default()).await;
        let trace = decoder.full(&plain_tx(), WATCHED).await.unwrap();

        assert_eq!(trace.status, TxStatus::Success);
        assert_eq!(trace.log_count, Some(2));
        assert_eq!(trace.block, BlockRef::Number(5));
        assert_eq!(trace.balance, "2.0");
        assert_eq!(trace.pnl, "1.0");
        assert_eq!(trace.change, ChangeIndicator::Up);
    }

    #[tokio::test]
    async fn missing_receipt_downgrades_to_the_fast_path() {
        let rpc = MockRpc::start().await;
        rpc.on("eth_getTransactionReceipt", json!(null)).await;
        rpc.on("eth_getTransactionByHash", json!(null)).await;
        rpc.on("eth_getBalance", json!("0x0")).await;
        rpc.on("eth_call", failed_calls(2)).await;

        let settings = TraceSettings {
            receipt_timeout: Duration::from_millis(50),
            receipt_poll_interval: Duration::from_millis(10),
        };
        let decoder = decoder_for(&rpc, settings).await;
        let trace = decoder.full(&plain_tx(), WATCHED).await.unwrap();

        assert_eq!(trace.status, TxStatus::Unknown);
        assert_eq!(trace.change, ChangeIndicator::Unset);
        assert_eq!(trace.balance, "0.0");
    }
}
