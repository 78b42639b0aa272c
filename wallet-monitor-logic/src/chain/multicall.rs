use std::sync::Arc;

use alloy::{
    primitives::{Address, Bytes},
    providers::bindings::IMulticall3,
    sol_types::SolCall,
};

use crate::chain::client::FanoutClient;

/// Bundles read-only contract calls into a single `tryAggregate`
/// against the configured aggregator contract.
pub struct MulticallBundler {
    client: Arc<FanoutClient>,
    aggregator: Address,
}

impl MulticallBundler {
    pub fn new(client: Arc<FanoutClient>, aggregator: Address) -> Self {
        Self { client, aggregator }
    }

    /// Returns per-call (success, return data) in input order. Empty
    /// input returns empty output without touching the chain. Errors
    /// propagate; there is no retry at this layer.
    pub async fn try_aggregate(
        &self,
        calls: Vec<(Address, Bytes)>,
    ) -> anyhow::Result<Vec<(bool, Bytes)>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let calls: Vec<IMulticall3::Call> = calls
            .into_iter()
            .map(|(target, call_data)| IMulticall3::Call {
                target,
                callData: call_data,
            })
            .collect();
        let payload = IMulticall3::tryAggregateCall {
            requireSuccess: false,
            calls,
        }
        .abi_encode();
        let raw = self.client.call(self.aggregator, payload.into()).await?;
        let decoded = IMulticall3::tryAggregateCall::abi_decode_returns(&raw)?;
        Ok(decoded
            .into_iter()
            .map(|result| (result.success, result.returnData))
            .collect())
    }
}
