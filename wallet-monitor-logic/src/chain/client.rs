use std::{
    future::Future,
    time::{Duration, Instant},
};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{Address, Bytes, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, Log, TransactionReceipt, TransactionRequest},
    transports::TransportResult,
};
use futures::{future::join_all, stream::FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::time::timeout;
use url::Url;

use crate::chain::types::{Block, Transaction, TxOrigin};

#[derive(Debug, Clone)]
pub struct EndpointError {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RpcFanoutError {
    #[error("all endpoints failed for {method}: {errors:?}")]
    AllEndpointsFailed {
        method: &'static str,
        errors: Vec<EndpointError>,
    },
}

struct Endpoint {
    url: Url,
    provider: DynProvider,
}

/// Chain client fanning every call out to all configured endpoints.
///
/// Endpoint lists are static; a failing endpoint is never banned, it
/// simply loses the race on that call. Reduction is per-method:
/// head-number queries take the numerically greatest response, log
/// queries the longest response, everything else the first success.
pub struct FanoutClient {
    endpoints: Vec<Endpoint>,
    call_timeout: Duration,
}

impl FanoutClient {
    pub fn new(rpc_urls: &[Url], call_timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!rpc_urls.is_empty(), "at least one rpc url is required");
        let endpoints = rpc_urls
            .iter()
            .map(|url| Endpoint {
                url: url.clone(),
                provider: ProviderBuilder::new().connect_http(url.clone()).erased(),
            })
            .collect();
        Ok(Self {
            endpoints,
            call_timeout,
        })
    }

    /// Head height, reduced with the highest-block policy.
    pub async fn block_number(&self) -> Result<u64, RpcFanoutError> {
        let results = self
            .all_settled("eth_blockNumber", |provider| async move {
                provider.get_block_number().await
            })
            .await;
        let mut best: Option<u64> = None;
        let mut errors = Vec::new();
        for (url, outcome) in results {
            match outcome {
                Ok(height) => {
                    tracing::debug!(url = %url, height, "endpoint head");
                    best = Some(best.map_or(height, |current| current.max(height)));
                }
                Err(message) => errors.push(EndpointError { url, message }),
            }
        }
        best.ok_or(RpcFanoutError::AllEndpointsFailed {
            method: "eth_blockNumber",
            errors,
        })
    }

    pub async fn block_with_txs(&self, number: u64) -> Result<Option<Block>, RpcFanoutError> {
        let block = self
            .first_success("eth_getBlockByNumber", |provider| async move {
                provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .full()
                    .await
            })
            .await?;
        Ok(block.map(Block::from_rpc))
    }

    pub async fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<Transaction>, RpcFanoutError> {
        let tx = self
            .first_success("eth_getTransactionByHash", |provider| async move {
                provider.get_transaction_by_hash(hash).await
            })
            .await?;
        Ok(tx.map(|tx| {
            let origin = if tx.block_number.is_some() {
                TxOrigin::Block
            } else {
                TxOrigin::Mempool
            };
            Transaction::from_rpc(tx, origin)
        }))
    }

    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcFanoutError> {
        self.first_success("eth_getTransactionReceipt", |provider| async move {
            provider.get_transaction_receipt(hash).await
        })
        .await
    }

    pub async fn balance(&self, address: Address, block: BlockId) -> Result<U256, RpcFanoutError> {
        self.first_success("eth_getBalance", |provider| async move {
            provider.get_balance(address).block_id(block).await
        })
        .await
    }

    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcFanoutError> {
        self.first_success("eth_call", |provider| {
            let request = TransactionRequest::default()
                .to(to)
                .input(data.clone().into());
            async move { provider.call(request).await }
        })
        .await
    }

    /// Log query, reduced with the most-logs policy.
    pub async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcFanoutError> {
        let results = self
            .all_settled("eth_getLogs", |provider| {
                let filter = filter.clone();
                async move { provider.get_logs(&filter).await }
            })
            .await;
        let mut best: Option<Vec<Log>> = None;
        let mut errors = Vec::new();
        for (url, outcome) in results {
            match outcome {
                Ok(logs) => {
                    if best.as_ref().is_none_or(|current| logs.len() > current.len()) {
                        best = Some(logs);
                    }
                }
                Err(message) => errors.push(EndpointError { url, message }),
            }
        }
        best.ok_or(RpcFanoutError::AllEndpointsFailed {
            method: "eth_getLogs",
            errors,
        })
    }

    /// Races all endpoints, returning the first non-error result.
    /// Losing requests are cancelled when the set is dropped.
    async fn first_success<T, Fut>(
        &self,
        method: &'static str,
        make: impl Fn(DynProvider) -> Fut,
    ) -> Result<T, RpcFanoutError>
    where
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut in_flight: FuturesUnordered<_> = self
            .endpoints
            .iter()
            .map(|endpoint| {
                let fut = make(endpoint.provider.clone());
                async move {
                    let started = Instant::now();
                    let outcome = flatten(timeout(self.call_timeout, fut).await, self.call_timeout);
                    (endpoint.url.to_string(), started.elapsed(), outcome)
                }
            })
            .collect();

        let mut errors = Vec::new();
        while let Some((url, elapsed, outcome)) = in_flight.next().await {
            let elapsed_ms = elapsed.as_millis() as u64;
            match outcome {
                Ok(value) => {
                    tracing::debug!(method, url = %url, elapsed_ms, "rpc call succeeded");
                    return Ok(value);
                }
                Err(message) => {
                    tracing::debug!(method, url = %url, elapsed_ms, %message, "rpc call failed");
                    errors.push(EndpointError { url, message });
                }
            }
        }
        Err(RpcFanoutError::AllEndpointsFailed { method, errors })
    }

    /// Runs the call on every endpoint and reports all outcomes.
    async fn all_settled<T, Fut>(
        &self,
        method: &'static str,
        make: impl Fn(DynProvider) -> Fut,
    ) -> Vec<(String, Result<T, String>)>
    where
        Fut: Future<Output = TransportResult<T>>,
    {
        join_all(self.endpoints.iter().map(|endpoint| {
            let fut = make(endpoint.provider.clone());
            async move {
                let started = Instant::now();
                let outcome = flatten(timeout(self.call_timeout, fut).await, self.call_timeout);
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &outcome {
                    Ok(_) => {
                        tracing::debug!(method, url = %endpoint.url, elapsed_ms, "rpc call succeeded")
                    }
                    Err(message) => {
                        tracing::debug!(method, url = %endpoint.url, elapsed_ms, %message, "rpc call failed")
                    }
                }
                (endpoint.url.to_string(), outcome)
            }
        }))
        .await
    }
}

fn flatten<T>(
    outcome: Result<TransportResult<T>, tokio::time::error::Elapsed>,
    deadline: Duration,
) -> Result<T, String> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("timed out after {deadline:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockRpc;
    use serde_json::json;

    fn client_for(servers: &[&MockRpc]) -> FanoutClient {
        let urls: Vec<Url> = servers.iter().map(|server| server.url()).collect();
        FanoutClient::new(&urls, Duration::from_secs(3)).unwrap()
    }

    #[tokio::test]
    async fn block_number_takes_the_highest_response() {
        let fast = MockRpc::start().await;
        fast.on("eth_blockNumber", json!("0x64")).await;
        let slow = MockRpc::start().await;
        slow.on_delayed("eth_blockNumber", json!("0x66"), Duration::from_secs(1))
            .await;

        let client = client_for(&[&fast, &slow]);
        assert_eq!(client.block_number().await.unwrap(), 0x66);
    }

    #[tokio::test]
    async fn block_number_tolerates_a_failing_endpoint() {
        let healthy = MockRpc::start().await;
        healthy.on("eth_blockNumber", json!("0x64")).await;
        let broken = MockRpc::start().await;
        broken.on_error("eth_blockNumber", -32000, "boom").await;

        let client = client_for(&[&healthy, &broken]);
        assert_eq!(client.block_number().await.unwrap(), 0x64);
    }

    #[tokio::test]
    async fn all_endpoints_failing_surface_per_endpoint_errors() {
        let a = MockRpc::start().await;
        a.on_error("eth_getBlockByNumber", -32000, "boom").await;
        let b = MockRpc::start().await;
        b.on_error("eth_getBlockByNumber", -32000, "也 boom").await;

        let client = client_for(&[&a, &b]);
        match client.block_with_txs(7).await {
            Err(RpcFanoutError::AllEndpointsFailed { method, errors }) => {
                assert_eq!(method, "eth_getBlockByNumber");
                assert_eq!(errors.len(), 2);
            }
            other => panic!("expected AllEndpointsFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn log_queries_prefer_the_longest_answer() {
        use crate::chain::testing::log_json;

        let sparse = MockRpc::start().await;
        sparse
            .on(
                "eth_getLogs",
                json!([log_json(
                    "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
                    "0x5",
                    "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                    0,
                )]),
            )
            .await;
        let complete = MockRpc::start().await;
        complete
            .on(
                "eth_getLogs",
                json!([
                    log_json(
                        "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
                        "0x5",
                        "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                        0,
                    ),
                    log_json(
                        "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
                        "0x5",
                        "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                        1,
                    ),
                ]),
            )
            .await;

        let client = client_for(&[&sparse, &complete]);
        let logs = client.logs(&Filter::new()).await.unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn first_success_wins_over_a_slower_endpoint() {
        let slow = MockRpc::start().await;
        slow.on_delayed(
            "eth_getBalance",
            json!("0xde0b6b3a7640000"),
            Duration::from_secs(2),
        )
        .await;
        let fast = MockRpc::start().await;
        fast.on("eth_getBalance", json!("0x0")).await;

        let client = client_for(&[&slow, &fast]);
        let balance = client
            .balance(Address::ZERO, BlockId::latest())
            .await
            .unwrap();
        assert_eq!(balance, U256::ZERO);
    }
}
