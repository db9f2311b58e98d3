//! The header synchronization loop, spec §4.4.5: repeatedly request
//! headers from this peer starting at the graph's locator, feed each batch
//! into the graph, and keep requesting forward from the peer's last
//! reported tip until it has nothing new to say.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use headers_common::Hash;

use crate::error::SessionError;
use crate::event::Event;

use super::PeerSession;

/// How far below the graph's tip a peer's last reported tip must sit,
/// while the peer has stopped returning new headers, before `out_of_sync`
/// is emitted.
const OUT_OF_SYNC_LAG_BLOCKS: u64 = 100;

/// How long the graph's tip must sit still before the slow-peer guard lets
/// a lagging sync loop resume.
const SLOW_PEER_QUIESCENCE: Duration = Duration::from_secs(5);

/// What a completed `sync_headers` call accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The peer had nothing new to offer.
    UpToDate,
    /// The longest chain advanced by this many headers across the loop.
    Advanced(usize),
}

impl PeerSession {
    /// Run the header sync loop against this peer. Serialized per session:
    /// a concurrent second call waits for the first to finish rather than
    /// racing it, since both would otherwise fight over `from`.
    pub async fn sync_headers(self: &std::sync::Arc<Self>, token: &CancellationToken) -> Result<SyncOutcome, SessionError> {
        let _serialize = self.sync_guard.lock().await;

        let mut from = self.graph.read().await.block_locator();
        let mut slow_guard_fired = false;
        let mut total_added = 0usize;

        loop {
            let headers = self.get_headers(from.clone(), Hash::default(), token).await?;
            if headers.is_empty() {
                self.maybe_emit_out_of_sync().await;
                break;
            }

            let batch_len = headers.len();
            let peer_tip = headers.last().expect("checked non-empty above").hash();
            *self.last_peer_tip_hash.lock().expect("tip mutex poisoned") = Some(peer_tip);

            let changeset = self.graph.write().await.add_headers(&headers);

            if !changeset.invalidated.is_empty() {
                self.emit(Event::InvalidBlocks {
                    peer: self.addr,
                    hashes: changeset.invalidated,
                });
                break;
            }

            let (tip_height, peer_tip_node) = {
                let graph = self.graph.read().await;
                (graph.tip().height, graph.get_by_hash(&peer_tip).copied())
            };

            let Some(peer_tip_node) = peer_tip_node else {
                return Err(SessionError::PathologicalBatch(
                    "peer tip hash absent from graph after insertion",
                ));
            };

            if !changeset.added.is_empty() {
                total_added += changeset.added.len();
                let new_tip = changeset.added.last().expect("checked non-empty above");
                self.emit(Event::NewChainTip {
                    peer: self.addr,
                    height: new_tip.height,
                    hash_hex: new_tip.hash.to_string(),
                });
            }

            if !slow_guard_fired {
                let behind = tip_height.saturating_sub(peer_tip_node.height);
                let on_longest_chain = self.graph.read().await.contains_in_longest_chain(&peer_tip);
                if behind > 4 * batch_len as u64 && on_longest_chain {
                    slow_guard_fired = true;
                    debug!(peer = %self.addr, behind, "slow-peer guard engaged, waiting for tip quiescence");
                    self.wait_for_tip_quiescence(token).await?;
                    from = self.graph.read().await.block_locator();
                    continue;
                }
            }

            // Pathological case: the server answered with exactly the
            // locator we sent and produced no progress — asking again would
            // just replay the same batch forever.
            if changeset.added.is_empty() && from.len() == 1 && from[0] == peer_tip {
                break;
            }

            from = vec![peer_tip];
        }

        Ok(if total_added > 0 {
            SyncOutcome::Advanced(total_added)
        } else {
            SyncOutcome::UpToDate
        })
    }

    /// Wait until the graph's tip has gone unchanged for one full
    /// quiescence window, polling in windows rather than busy-waiting.
    async fn wait_for_tip_quiescence(&self, token: &CancellationToken) -> Result<(), SessionError> {
        let mut last_tip = self.graph.read().await.tip().hash;
        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(SessionError::Disposed),
                _ = tokio::time::sleep(SLOW_PEER_QUIESCENCE) => {}
            }
            let current_tip = self.graph.read().await.tip().hash;
            if current_tip == last_tip {
                return Ok(());
            }
            last_tip = current_tip;
        }
    }

    /// Spec §4.4.5 `out_of_sync` semantics: the peer stopped returning
    /// headers, but its last reported tip differs from both the tip we
    /// started this session with and the graph's current tip, and sits at
    /// least [`OUT_OF_SYNC_LAG_BLOCKS`] behind it.
    async fn maybe_emit_out_of_sync(&self) {
        let Some(peer_tip) = *self.last_peer_tip_hash.lock().expect("tip mutex poisoned") else {
            return;
        };
        let starting_tip = *self.starting_tip_hash.lock().expect("tip mutex poisoned");
        if Some(peer_tip) == starting_tip {
            return;
        }

        let graph = self.graph.read().await;
        if peer_tip == graph.tip().hash {
            return;
        }
        let Some(peer_node) = graph.get_by_hash(&peer_tip) else {
            return;
        };
        if graph.tip().height.saturating_sub(peer_node.height) >= OUT_OF_SYNC_LAG_BLOCKS {
            drop(graph);
            self.emit(Event::OutOfSync { peer: self.addr });
        }
    }
}
