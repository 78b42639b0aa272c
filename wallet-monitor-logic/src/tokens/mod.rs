use std::{collections::HashMap, sync::Arc};

use alloy::{
    primitives::{Address, U256},
    sol_types::{SolCall, SolValue},
};
use parking_lot::RwLock;
use sea_orm::DatabaseConnection;

use crate::{
    chain::{
        abi::{IUniswapV2Pair, IERC20},
        multicall::MulticallBundler,
    },
    extract::ERC20_TRANSFER_SELECTOR,
    repository,
};

pub mod units;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub symbol: String,
    pub decimals: u8,
}

/// Contract address to (symbol, decimals) resolution with a
/// positive-only, write-once cache.
///
/// Negatives are never cached so freshly deployed tokens resolve on a
/// later sighting.
pub struct TokenResolver {
    bundler: Arc<MulticallBundler>,
    db: Arc<DatabaseConnection>,
    cache: RwLock<HashMap<Address, TokenRecord>>,
    base_symbols: Vec<String>,
}

impl TokenResolver {
    pub fn new(
        bundler: Arc<MulticallBundler>,
        db: Arc<DatabaseConnection>,
        base_tokens: &[String],
    ) -> Self {
        Self {
            bundler,
            db,
            cache: RwLock::new(HashMap::new()),
            base_symbols: base_tokens.iter().map(|s| s.to_uppercase()).collect(),
        }
    }

    /// Warms the in-memory cache from the embedded store.
    pub async fn warm(&self) -> anyhow::Result<usize> {
        let rows = repository::tokens::load_all(&self.db).await?;
        let mut cache = self.cache.write();
        for row in &rows {
            let Ok(address) = row.address.parse::<Address>() else {
                continue;
            };
            let Ok(decimals) = u8::try_from(row.decimals) else {
                continue;
            };
            cache.entry(address).or_insert(TokenRecord {
                symbol: row.symbol.clone(),
                decimals,
            });
        }
        Ok(rows.len())
    }

    pub fn is_base_symbol(&self, symbol: &str) -> bool {
        let upper = symbol.to_uppercase();
        self.base_symbols.iter().any(|base| *base == upper)
    }

    pub fn record(&self, address: &Address) -> Option<TokenRecord> {
        self.cache.read().get(address).cloned()
    }

    /// Resolves the given addresses to symbols. Cache misses are
    /// fetched in two parallel multicall batches (`symbol()` and
    /// `decimals()`); only pairs with a non-empty symbol and non-zero
    /// decimals are kept. The returned list keeps input encounter
    /// order, with base tokens sorted last.
    pub async fn lookup(&self, addresses: &[Address]) -> anyhow::Result<Vec<(Address, String)>> {
        let mut unique: Vec<Address> = Vec::new();
        for address in addresses {
            if !unique.contains(address) {
                unique.push(*address);
            }
        }

        let misses: Vec<Address> = {
            let cache = self.cache.read();
            unique
                .iter()
                .filter(|address| !cache.contains_key(*address))
                .copied()
                .collect()
        };

        if !misses.is_empty() {
            let symbol_calls = misses
                .iter()
                .map(|address| (*address, IERC20::symbolCall {}.abi_encode().into()))
                .collect();
            let decimals_calls = misses
                .iter()
                .map(|address| (*address, IERC20::decimalsCall {}.abi_encode().into()))
                .collect();
            let (symbols, decimals) = tokio::join!(
                self.bundler.try_aggregate(symbol_calls),
                self.bundler.try_aggregate(decimals_calls),
            );
            let (symbols, decimals) = (symbols?, decimals?);
            for (index, address) in misses.iter().enumerate() {
                let (Some(symbol_result), Some(decimals_result)) =
                    (symbols.get(index), decimals.get(index))
                else {
                    break;
                };
                if let Some(record) = decode_token_record(symbol_result, decimals_result) {
                    self.store(*address, record).await;
                }
            }
        }

        let cache = self.cache.read();
        let mut resolved = Vec::new();
        let mut base = Vec::new();
        for address in unique {
            if let Some(record) = cache.get(&address) {
                if self.is_base_symbol(&record.symbol) {
                    base.push((address, record.symbol.clone()));
                } else {
                    resolved.push((address, record.symbol.clone()));
                }
            }
        }
        resolved.extend(base);
        Ok(resolved)
    }

    /// Amount of an ERC20 `transfer` call rendered with the token's
    /// decimals, two fractional digits. `None` when the calldata is
    /// not a transfer or the token is not cached yet.
    pub fn decode_transfer_amount(&self, calldata: &[u8], token: Address) -> Option<String> {
        if calldata.len() < 68 || calldata[..4] != ERC20_TRANSFER_SELECTOR {
            return None;
        }
        let record = self.record(&token)?;
        let amount = U256::from_be_slice(&calldata[36..68]);
        Some(units::format_units_fixed(amount, record.decimals, 2))
    }

    /// Probes every candidate with bundled `token0()`/`token1()` calls
    /// and returns the successfully decoded underlying addresses,
    /// de-duplicated in encounter order.
    pub async fn extract_pair_underlyings(
        &self,
        candidates: &[Address],
    ) -> anyhow::Result<Vec<Address>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut calls = Vec::with_capacity(candidates.len() * 2);
        for candidate in candidates {
            calls.push((
                *candidate,
                IUniswapV2Pair::token0Call {}.abi_encode().into(),
            ));
            calls.push((
                *candidate,
                IUniswapV2Pair::token1Call {}.abi_encode().into(),
            ));
        }
        let results = self.bundler.try_aggregate(calls).await?;
        let mut underlyings = Vec::new();
        for (success, raw) in results {
            if !success {
                continue;
            }
            let Ok(address) = Address::abi_decode(&raw) else {
                continue;
            };
            if address != Address::ZERO && !underlyings.contains(&address) {
                underlyings.push(address);
            }
        }
        Ok(underlyings)
    }

    async fn store(&self, address: Address, record: TokenRecord) {
        {
            let mut cache = self.cache.write();
            cache.entry(address).or_insert_with(|| record.clone());
        }
        let key = format!("{address:#x}");
        if let Err(err) =
            repository::tokens::insert_if_absent(&self.db, &key, &record.symbol, record.decimals)
                .await
        {
            tracing::warn!(address = %key, error = ?err, "failed to persist token record");
        }
    }

    #[cfg(test)]
    pub(crate) fn seed(&self, address: Address, symbol: &str, decimals: u8) {
        self.cache.write().entry(address).or_insert(TokenRecord {
            symbol: symbol.to_string(),
            decimals,
        });
    }
}

fn decode_token_record(
    symbol_result: &(bool, alloy::primitives::Bytes),
    decimals_result: &(bool, alloy::primitives::Bytes),
) -> Option<TokenRecord> {
    let (symbol_ok, symbol_raw) = symbol_result;
    let (decimals_ok, decimals_raw) = decimals_result;
    if !*symbol_ok || !*decimals_ok {
        return None;
    }
    let symbol = IERC20::symbolCall::abi_decode_returns(symbol_raw).ok()?;
    let decimals = IERC20::decimalsCall::abi_decode_returns(decimals_raw).ok()?;
    let symbol = symbol.trim().to_string();
    if symbol.is_empty() || decimals == 0 {
        return None;
    }
    Some(TokenRecord { symbol, decimals })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{client::FanoutClient, testing::MockRpc};
    use alloy::{
        hex,
        primitives::{address, Bytes},
        providers::bindings::IMulticall3,
    };
    use sea_orm::Database;
    use serde_json::json;
    use std::time::Duration;
    use url::Url;

    const AGGREGATOR: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");
    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const PEPE: Address = address!("6982508145454Ce325dDbE47a25d4ec3d2311933");

    async fn cache_db() -> Arc<DatabaseConnection> {
        use migration::MigratorTrait;
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::LocalMigrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    async fn resolver_with(urls: &[Url], db: Arc<DatabaseConnection>) -> TokenResolver {
        let client = Arc::new(FanoutClient::new(urls, Duration::from_secs(3)).unwrap());
        let bundler = Arc::new(MulticallBundler::new(client, AGGREGATOR));
        TokenResolver::new(bundler, db, &["WETH".to_string(), "USDT".to_string()])
    }

    fn multicall_response(results: Vec<IMulticall3::Result>) -> serde_json::Value {
        json!(format!("0x{}", hex::encode(results.abi_encode())))
    }

    #[tokio::test]
    async fn lookup_orders_base_tokens_last() {
        let db = cache_db().await;
        let resolver = resolver_with(&[Url::parse("http://127.0.0.1:1").unwrap()], db).await;
        resolver.seed(WETH, "WETH", 18);
        resolver.seed(PEPE, "PEPE", 18);

        let resolved = resolver.lookup(&[WETH, PEPE]).await.unwrap();
        assert_eq!(
            resolved,
            vec![(PEPE, "PEPE".to_string()), (WETH, "WETH".to_string())]
        );
    }

    #[tokio::test]
    async fn lookup_fetches_misses_and_persists_positives() {
        let rpc = MockRpc::start().await;
        let symbol_needle = hex::encode(IERC20::symbolCall::SELECTOR);
        let decimals_needle = hex::encode(IERC20::decimalsCall::SELECTOR);
        rpc.on_match(
            "eth_call",
            &symbol_needle,
            multicall_response(vec![IMulticall3::Result {
                success: true,
                returnData: "PEPE".abi_encode().into(),
            }]),
        )
        .await;
        rpc.on_match(
            "eth_call",
            &decimals_needle,
            multicall_response(vec![IMulticall3::Result {
                success: true,
                returnData: IERC20::decimalsCall::abi_encode_returns(&18u8).into(),
            }]),
        )
        .await;

        let db = cache_db().await;
        let resolver = resolver_with(&[rpc.url()], db.clone()).await;

        let resolved = resolver.lookup(&[PEPE]).await.unwrap();
        assert_eq!(resolved, vec![(PEPE, "PEPE".to_string())]);
        assert_eq!(
            resolver.record(&PEPE),
            Some(TokenRecord {
                symbol: "PEPE".to_string(),
                decimals: 18
            })
        );

        let rows = repository::tokens::load_all(&db).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, format!("{PEPE:#x}"));
        assert_eq!(rows[0].symbol, "PEPE");
        assert_eq!(rows[0].decimals, 18);
    }

    #[tokio::test]
    async fn lookup_drops_unresolvable_addresses() {
        let rpc = MockRpc::start().await;
        rpc.on(
            "eth_call",
            multicall_response(vec![IMulticall3::Result {
                success: false,
                returnData: Bytes::new(),
            }]),
        )
        .await;

        let db = cache_db().await;
        let resolver = resolver_with(&[rpc.url()], db.clone()).await;

        assert!(resolver.lookup(&[PEPE]).await.unwrap().is_empty());
        assert_eq!(resolver.record(&PEPE), None);
        assert!(repository::tokens::load_all(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transfer_amount_uses_cached_decimals() {
        let db = cache_db().await;
        let resolver = resolver_with(&[Url::parse("http://127.0.0.1:1").unwrap()], db).await;
        resolver.seed(PEPE, "PEPE", 18);

        let amount = U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64));
        let calldata = IERC20::transferCall {
            to: WETH,
            amount,
        }
        .abi_encode();

        assert_eq!(
            resolver.decode_transfer_amount(&calldata, PEPE),
            Some("100.00".to_string())
        );
        // unknown token -> no amount
        assert_eq!(resolver.decode_transfer_amount(&calldata, WETH), None);
    }
}
