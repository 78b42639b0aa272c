//! Per-transaction routing: match watched addresses, run the fast
//! trace, broadcast, then upgrade every sent message in place once
//! the full trace lands.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tokio::sync::mpsc;

use crate::{
    chain::types::Transaction,
    extract,
    ingest::sliding::{Eviction, SlidingSet},
    render::{Renderer, NAME_PLACEHOLDER},
    settings::ProcessorSettings,
    signatures::SignatureLookup,
    telegram::DeliveryService,
    trace::TraceDecoder,
    watchlist::{SubscriberId, WatchlistCache, WatchlistSnapshot, WatcherPrefs},
};

pub struct Processor {
    watchlist: Arc<WatchlistCache>,
    decoder: Arc<TraceDecoder>,
    signatures: Arc<SignatureLookup>,
    renderer: Arc<Renderer>,
    delivery: Arc<DeliveryService>,
    dedup: SlidingSet<String>,
    min_native_value: U256,
}

impl Processor {
    pub fn new(
        watchlist: Arc<WatchlistCache>,
        decoder: Arc<TraceDecoder>,
        signatures: Arc<SignatureLookup>,
        renderer: Arc<Renderer>,
        delivery: Arc<DeliveryService>,
        settings: &ProcessorSettings,
    ) -> Self {
        Self {
            watchlist,
            decoder,
            signatures,
            renderer,
            delivery,
            dedup: SlidingSet::new(settings.dedup_window, Eviction::Oldest),
            min_native_value: U256::from(settings.min_native_value_wei),
        }
    }

    /// Consumes emitted transactions until the channel closes. Every
    /// per-transaction failure is logged and dropped; the pipeline
    /// itself never aborts.
    pub async fn run(mut self, mut incoming: mpsc::Receiver<Transaction>) {
        while let Some(tx) = incoming.recv().await {
            self.process(&tx).await;
        }
        tracing::info!("transaction stream ended, processor stopped");
    }

    pub async fn process(&mut self, tx: &Transaction) {
        let snapshot = self.watchlist.snapshot();
        let matched = matched_addresses(&snapshot, tx);
        if matched.is_empty() {
            return;
        }

        let selector = tx.selector();
        let signature = self.signatures.resolve(&selector).await;

        for watched in matched {
            let key = format!("{watched:#x}:{:#x}", tx.hash);
            if !self.dedup.insert(key) {
                tracing::debug!(tx = %tx.hash, watched = %watched, "already notified, skipping");
                continue;
            }
            self.notify(&snapshot, watched, tx, signature.as_deref())
                .await;
        }
    }

    async fn notify(
        &self,
        snapshot: &WatchlistSnapshot,
        watched: Address,
        tx: &Transaction,
        signature: Option<&str>,
    ) {
        let Some(watchers) = snapshot.watchers(&watched) else {
            return;
        };
        let mut watchers: Vec<(SubscriberId, WatcherPrefs)> = watchers
            .iter()
            .filter(|(subscriber, _)| {
                crate::telegram::parse_subscriber(subscriber)
                    .is_some_and(|(_, bot_id)| self.delivery.is_active(bot_id))
            })
            .map(|(subscriber, prefs)| (subscriber.clone(), prefs.clone()))
            .collect();
        watchers.sort_by(|a, b| a.0.cmp(&b.0));
        if watchers.is_empty() {
            return;
        }

        // plain native dust is not worth a notification
        if tx.selector() == "0x" && tx.value < self.min_native_value {
            tracing::debug!(tx = %tx.hash, "native dust transfer, skipping");
            return;
        }

        let fast = match self.decoder.fast(tx, watched).await {
            Ok(fast) => fast,
            Err(err) => {
                tracing::warn!(tx = %tx.hash, watched = %watched, error = %err, "fast decode failed, dropping");
                return;
            }
        };
        let (fast_text, fast_markup) = self.renderer.render(watched, tx, &fast, signature);

        let outgoing = watched == tx.from;
        let send_batch = async {
            let mut sent: Vec<(SubscriberId, i64)> = Vec::new();
            for (subscriber, prefs) in &watchers {
                let wanted = if outgoing {
                    prefs.want_outgoing
                } else {
                    prefs.want_incoming
                };
                if !wanted {
                    continue;
                }
                let personalized = fast_text.replace(
                    NAME_PLACEHOLDER,
                    &crate::render::html_escape(&prefs.display_name),
                );
                match self
                    .delivery
                    .send(subscriber, personalized, fast_markup.clone())
                    .await
                {
                    Ok(message_id) => sent.push((subscriber.clone(), message_id)),
                    Err(err) => {
                        tracing::warn!(subscriber = %subscriber, tx = %tx.hash, error = %err, "send failed")
                    }
                }
            }
            sent
        };

        // the full trace runs while the fast batch is being delivered
        let (sent, full) = tokio::join!(send_batch, self.decoder.full(tx, watched));
        let full = match full {
            Ok(full) => full,
            Err(err) => {
                tracing::warn!(tx = %tx.hash, watched = %watched, error = %err, "full decode failed, messages stay fast");
                return;
            }
        };
        if sent.is_empty() {
            return;
        }

        let (full_text, full_markup) = self.renderer.render(watched, tx, &full, signature);
        for (subscriber, message_id) in sent {
            let display_name = watchers
                .iter()
                .find(|(candidate, _)| *candidate == subscriber)
                .map(|(_, prefs)| prefs.display_name.as_str())
                .unwrap_or_default();
            let personalized =
                full_text.replace(NAME_PLACEHOLDER, &crate::render::html_escape(display_name));
            if let Err(err) = self
                .delivery
                .edit(&subscriber, message_id, personalized, full_markup.clone())
                .await
            {
                tracing::warn!(subscriber = %subscriber, message_id, tx = %tx.hash, error = %err, "edit failed");
            }
        }
    }
}

/// Watched addresses touched by the transaction, in match order:
/// sender, receiver, ERC20 transfer recipient, calldata candidates.
fn matched_addresses(snapshot: &WatchlistSnapshot, tx: &Transaction) -> Vec<Address> {
    let mut matched = Vec::new();
    if snapshot.contains(&tx.from) {
        matched.push(tx.from);
    }
    if let Some(to) = tx.to {
        if snapshot.contains(&to) && !matched.contains(&to) {
            matched.push(to);
        }
    }
    if let Some(recipient) = extract::transfer_recipient(&tx.input) {
        if snapshot.contains(&recipient) && !matched.contains(&recipient) {
            matched.push(recipient);
        }
    }
    for candidate in extract::addresses_from_calldata(&tx.input) {
        if snapshot.contains(&candidate) && !matched.contains(&candidate) {
            matched.push(candidate);
        }
    }
    matched
}
