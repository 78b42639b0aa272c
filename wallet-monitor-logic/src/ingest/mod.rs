//! Chain-head tailing with ordered emission and bounded dedup state.

use std::{path::PathBuf, sync::Arc};

use alloy::primitives::B256;
use futures::future::join_all;
use tokio::{
    sync::{mpsc, watch},
    time::sleep,
};

use crate::{
    chain::{
        client::FanoutClient,
        types::{Block, Transaction},
    },
    settings::IngestSettings,
};

pub mod checkpoint;
pub mod sliding;

use checkpoint::Checkpoint;
use sliding::{Eviction, SlidingSet};

enum TickOutcome {
    Continue,
    /// The emission channel is gone; there is nobody left to feed.
    Stop,
}

/// Tails the chain head and emits normalized transactions strictly in
/// height order, exactly once per hash within the sliding windows.
///
/// A single task owns all state; block fetches fan out through the
/// RPC client in bounded batches but processing stays sequential.
pub struct Ingestor {
    client: Arc<FanoutClient>,
    checkpoint: Checkpoint,
    settings: IngestSettings,
    recent_blocks: SlidingSet<u64>,
    recent_txs: SlidingSet<B256>,
    expected: u64,
    unsaved: u64,
}

impl Ingestor {
    pub async fn new(
        client: Arc<FanoutClient>,
        checkpoint_path: PathBuf,
        settings: IngestSettings,
    ) -> anyhow::Result<Self> {
        let checkpoint = Checkpoint::new(checkpoint_path);
        let persisted = checkpoint.load().await?;
        let head = client.block_number().await?;
        let expected = match persisted {
            Some(height) if head.saturating_sub(height) <= settings.reread_threshold => height + 1,
            _ => head.saturating_sub(settings.reread_threshold),
        };
        tracing::info!(head, ?persisted, expected, "ingestor initialized");
        Ok(Self {
            client,
            checkpoint,
            recent_blocks: SlidingSet::new(settings.recent_blocks_window, Eviction::Oldest),
            recent_txs: SlidingSet::new(settings.recent_txs_window, Eviction::OldestHalf),
            settings,
            expected,
            unsaved: 0,
        })
    }

    pub async fn run(
        mut self,
        emit: mpsc::Sender<Transaction>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.tick(&emit).await {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Stop) => break,
                Err(err) => {
                    tracing::error!(error = %err, "ingest tick failed, cursor not advanced")
                }
            }
            tokio::select! {
                _ = sleep(self.settings.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        if let Err(err) = self.checkpoint.store(self.expected).await {
            tracing::warn!(error = ?err, "failed to persist high-water mark on shutdown");
        }
        tracing::info!(expected = self.expected, "ingestor stopped");
        Ok(())
    }

    async fn tick(&mut self, emit: &mpsc::Sender<Transaction>) -> anyhow::Result<TickOutcome> {
        let head = self.client.block_number().await?;
        if head < self.expected {
            tracing::debug!(
                head,
                expected = self.expected,
                "head behind cursor, clamping to head"
            );
            self.expected = head;
        }

        while self.expected <= head {
            let upper = head.min(self.expected + self.settings.fetch_concurrency - 1);
            let heights: Vec<u64> = (self.expected..=upper).collect();
            let fetched = join_all(
                heights
                    .iter()
                    .map(|height| self.client.block_with_txs(*height)),
            )
            .await;

            // process strictly ascending, stop at the first gap
            let mut advanced = 0u64;
            for (height, outcome) in heights.iter().copied().zip(fetched) {
                match outcome {
                    Ok(Some(block)) => {
                        for tx in self.process_block(block) {
                            if emit.send(tx).await.is_err() {
                                tracing::info!("emission channel closed, stopping ingest");
                                return Ok(TickOutcome::Stop);
                            }
                        }
                        advanced += 1;
                    }
                    Ok(None) => {
                        tracing::debug!(height, "block not yet available");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(height, error = %err, "block fetch failed");
                        break;
                    }
                }
            }
            if advanced == 0 {
                break;
            }
            self.expected += advanced;
            self.unsaved += advanced;
            if self.unsaved >= self.settings.save_interval {
                match self.checkpoint.store(self.expected).await {
                    Ok(()) => self.unsaved = 0,
                    Err(err) => {
                        tracing::warn!(error = ?err, "failed to persist high-water mark")
                    }
                }
            }
            if advanced < heights.len() as u64 {
                break;
            }
        }
        Ok(TickOutcome::Continue)
    }

    fn process_block(&mut self, block: Block) -> Vec<Transaction> {
        if !self.recent_blocks.insert(block.number) {
            tracing::debug!(height = block.number, "block already processed, skipping");
            return Vec::new();
        }
        let mut fresh = Vec::new();
        let mut skipped = 0usize;
        for tx in block.transactions {
            if self.recent_txs.insert(tx.hash) {
                fresh.push(tx);
            } else {
                skipped += 1;
            }
        }
        tracing::debug!(
            height = block.number,
            emitted = fresh.len(),
            skipped,
            "processed block"
        );
        fresh
    }
}
