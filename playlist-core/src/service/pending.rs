//! Pending song proposals on the guest side

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::sync::{Playlist, TrackId};

/// Fired by a proposal timer. The ticket tells stale timers apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Expired {
    pub track_id: TrackId,
    pub ticket: u64,
}

struct Pending {
    ticket: u64,
    completion: oneshot::Sender<bool>,
    timer: AbortHandle,
}

/// At most one completion per track id, each with its own timeout timer
pub(crate) struct PendingProposals {
    entries: HashMap<TrackId, Pending>,
    next_ticket: u64,
    expired_tx: mpsc::UnboundedSender<Expired>,
}

impl PendingProposals {
    pub fn new(expired_tx: mpsc::UnboundedSender<Expired>) -> Self {
        Self {
            entries: HashMap::new(),
            next_ticket: 0,
            expired_tx,
        }
    }

    /// Track a proposal. A pending proposal for the same track is replaced and
    /// its completion dropped. Returns true if one was replaced.
    pub fn insert(
        &mut self,
        track_id: TrackId,
        completion: oneshot::Sender<bool>,
        timeout: Duration,
    ) -> bool {
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let expired_tx = self.expired_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = expired_tx.send(Expired { track_id, ticket });
        })
        .abort_handle();

        let replaced = self.entries.insert(
            track_id,
            Pending {
                ticket,
                completion,
                timer,
            },
        );
        match replaced {
            Some(old) => {
                debug!("Proposal for {} replaced a pending one", track_id);
                old.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Complete every proposal whose song is in the snapshot
    pub fn resolve_present(&mut self, playlist: &Playlist) -> usize {
        let confirmed: Vec<TrackId> = self
            .entries
            .keys()
            .copied()
            .filter(|track_id| playlist.contains_track(*track_id))
            .collect();
        for track_id in &confirmed {
            if let Some(pending) = self.entries.remove(track_id) {
                pending.timer.abort();
                let _ = pending.completion.send(true);
            }
        }
        confirmed.len()
    }

    /// Fail a proposal whose timer fired. Stale tickets are ignored.
    pub fn expire(&mut self, expired: Expired) -> bool {
        let current = self
            .entries
            .get(&expired.track_id)
            .map(|p| p.ticket == expired.ticket)
            .unwrap_or(false);
        if !current {
            return false;
        }
        if let Some(pending) = self.entries.remove(&expired.track_id) {
            debug!("Proposal for {} timed out", expired.track_id);
            let _ = pending.completion.send(false);
        }
        true
    }

    /// Cancel every timer and drop every completion without resolving it
    pub fn clear(&mut self) {
        for (_, pending) in self.entries.drain() {
            pending.timer.abort();
        }
    }

    pub fn contains(&self, track_id: TrackId) -> bool {
        self.entries.contains_key(&track_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for PendingProposals {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::song;
    use uuid::Uuid;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn playlist_with(track_ids: &[i64]) -> Playlist {
        let mut playlist = Playlist::new(Uuid::new_v4(), "Party");
        playlist.songs = track_ids.iter().map(|id| song(*id, "Song")).collect();
        playlist
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_after_bound() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = PendingProposals::new(tx);
        let (completion, result) = oneshot::channel();
        pending.insert(42, completion, TIMEOUT);

        let start = tokio::time::Instant::now();
        let expired = rx.recv().await.unwrap();
        assert!(start.elapsed() >= TIMEOUT);
        assert!(start.elapsed() < TIMEOUT + Duration::from_millis(100));

        assert!(pending.expire(expired));
        assert!(!result.await.unwrap());
        assert!(pending.is_empty());

        // A late snapshot no longer resolves anything
        assert_eq!(pending.resolve_present(&playlist_with(&[42])), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_resolves_and_cancels_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = PendingProposals::new(tx);
        let (c1, r1) = oneshot::channel();
        let (c2, r2) = oneshot::channel();
        pending.insert(1, c1, TIMEOUT);
        pending.insert(2, c2, TIMEOUT);

        assert_eq!(pending.resolve_present(&playlist_with(&[1, 3])), 1);
        assert!(r1.await.unwrap());
        assert!(pending.contains(2));
        assert_eq!(pending.len(), 1);

        // Only the unresolved proposal's timer fires
        let expired = rx.recv().await.unwrap();
        assert_eq!(expired.track_id, 2);
        assert!(pending.expire(expired));
        assert!(!r2.await.unwrap());

        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_drops_earlier_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = PendingProposals::new(tx);
        let (first, first_result) = oneshot::channel();
        let (second, second_result) = oneshot::channel();

        assert!(!pending.insert(42, first, TIMEOUT));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(pending.insert(42, second, TIMEOUT));

        // The earlier caller sees its sender dropped
        assert!(first_result.await.is_err());

        // Only the replacement's timer fires, five seconds after it was set
        let expired = rx.recv().await.unwrap();
        assert_eq!(expired.ticket, 1);
        assert!(pending.expire(expired));
        assert!(!second_result.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ticket_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pending = PendingProposals::new(tx);
        let (completion, _result) = oneshot::channel();
        pending.insert(42, completion, TIMEOUT);
        assert!(!pending.expire(Expired {
            track_id: 42,
            ticket: 99
        }));
        assert!(pending.contains(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_without_resolving() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = PendingProposals::new(tx);
        let (completion, result) = oneshot::channel();
        pending.insert(42, completion, TIMEOUT);

        pending.clear();
        assert!(result.await.is_err());

        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(rx.try_recv().is_err());
    }
}
