//! Trajectory recorder - the append-only turn log of a session.
//!
//! Turns are written once, in strictly increasing sequence order, and never
//! mutated or removed. A verdict can be attached to a recorded turn exactly
//! once, after evaluation.

use futures::stream::{self, Stream};
use std::ops::{Bound, RangeBounds};
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::trace;

use crate::types::{GuardError, Result, Turn, TurnId, Verdict};

/// A turn in the log together with its verdict, once evaluated.
#[derive(Debug)]
pub struct RecordedTurn {
    /// The recorded turn
    pub turn: Turn,
    verdict: OnceLock<Verdict>,
}

impl RecordedTurn {
    fn new(turn: Turn) -> Self {
        Self {
            turn,
            verdict: OnceLock::new(),
        }
    }

    /// Sequence number.
    pub fn id(&self) -> TurnId {
        self.turn.sequence
    }

    /// Verdict attached after evaluation.
    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.get()
    }
}

/// Append-only log of turns.
///
/// Cloning yields another handle to the same log.
#[derive(Clone, Default)]
pub struct TrajectoryRecorder {
    turns: Arc<RwLock<Vec<Arc<RecordedTurn>>>>,
}

impl TrajectoryRecorder {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. Its sequence number must be greater than the tail.
    pub async fn append(&self, turn: Turn) -> Result<TurnId> {
        let mut turns = self.turns.write().await;

        if let Some(tail) = turns.last().map(|t| t.id()) {
            if turn.sequence <= tail {
                return Err(GuardError::OutOfOrderWrite {
                    tail,
                    got: turn.sequence,
                });
            }
        }

        let id = turn.sequence;
        turns.push(Arc::new(RecordedTurn::new(turn)));
        trace!(turn = id, "Appended turn");
        Ok(id)
    }

    /// Attach a verdict to a recorded turn.
    ///
    /// Returns false if the turn is unknown or already has a verdict.
    pub async fn attach_verdict(&self, id: TurnId, verdict: Verdict) -> bool {
        let turns = self.turns.read().await;
        match turns.binary_search_by_key(&id, |t| t.id()) {
            Ok(index) => turns[index].verdict.set(verdict).is_ok(),
            Err(_) => false,
        }
    }

    /// Look up a single turn.
    pub async fn get(&self, id: TurnId) -> Option<Arc<RecordedTurn>> {
        let turns = self.turns.read().await;
        turns
            .binary_search_by_key(&id, |t| t.id())
            .ok()
            .map(|index| Arc::clone(&turns[index]))
    }

    /// Turns whose sequence numbers fall in `range`.
    pub async fn read(&self, range: impl RangeBounds<TurnId>) -> TurnRange {
        let turns = self.turns.read().await;

        let start = match range.start_bound() {
            Bound::Included(s) => turns.partition_point(|t| t.id() < *s),
            Bound::Excluded(s) => turns.partition_point(|t| t.id() <= *s),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(e) => turns.partition_point(|t| t.id() <= *e),
            Bound::Excluded(e) => turns.partition_point(|t| t.id() < *e),
            Bound::Unbounded => turns.len(),
        };

        let slice: Arc<[Arc<RecordedTurn>]> = if start < end {
            turns[start..end].iter().cloned().collect()
        } else {
            Arc::from(Vec::new())
        };
        TurnRange { turns: slice, cursor: 0 }
    }

    /// Same as [`read`](Self::read), as an async stream.
    pub async fn stream(&self, range: impl RangeBounds<TurnId>) -> impl Stream<Item = Arc<RecordedTurn>> {
        stream::iter(self.read(range).await)
    }

    /// Sequence number of the last turn.
    pub async fn tail(&self) -> Option<TurnId> {
        let turns = self.turns.read().await;
        turns.last().map(|t| t.id())
    }

    /// Number of recorded turns.
    pub async fn len(&self) -> usize {
        let turns = self.turns.read().await;
        turns.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// A finite, restartable view over a range of the log.
///
/// The view is a snapshot: turns appended later do not appear in it.
#[derive(Clone)]
pub struct TurnRange {
    turns: Arc<[Arc<RecordedTurn>]>,
    cursor: usize,
}

impl TurnRange {
    /// Rewind to the first turn of the range.
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// Total turns in the range.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl Iterator for TurnRange {
    type Item = Arc<RecordedTurn>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.turns.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.turns.len() - self.cursor;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TurnRange {}
