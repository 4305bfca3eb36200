//! Level Scheduler
//!
//! The level queue decides the order in which scheduled subscribers run
//! during a flush.
//!
//! # Algorithm
//!
//! Subscribers are bucketed by level. A computed's level is strictly greater
//! than the level of everything it reads, so draining buckets in ascending
//! order guarantees each computed runs only after every upstream computed
//! that could still change in this flush has settled.
//!
//! Level 0 holds terminal subscribers (effects and subscriptions). That
//! bucket is drained last, after all higher levels are empty. Popping always
//! takes the lowest non-empty non-terminal bucket first, so work scheduled
//! mid-flush at a lower level overtakes what is left above it.
//!
//! A subscriber that is rescheduled after already running in the current
//! round goes to the carry list. When every bucket is empty the carry list
//! seeds the next round under a fresh clock token.
//!
//! Deduplication is the caller's job (a node is pushed only when it turns
//! dirty). Entries can go stale when a queued node is moved to a new level;
//! `pop` reports the bucket level so the caller can skip those.

use std::collections::VecDeque;

use super::node::NodeId;

/// Level-indexed buckets of pending subscribers.
#[derive(Debug)]
pub struct LevelQueue {
    levels: Vec<VecDeque<NodeId>>,
    /// No non-terminal bucket below this index holds entries.
    lowest: usize,
    carry: Vec<NodeId>,
    clock: u64,
}

impl LevelQueue {
    pub fn new() -> Self {
        Self {
            levels: vec![VecDeque::new()],
            lowest: 1,
            carry: Vec::new(),
            clock: 0,
        }
    }

    /// Queue `id` in the bucket for `level`.
    pub fn push(&mut self, id: NodeId, level: u32) {
        let level = level as usize;
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, VecDeque::new);
        }
        self.levels[level].push_back(id);
        if level > 0 && level < self.lowest {
            self.lowest = level;
        }
    }

    /// Hold `id` for the next round.
    pub fn carry(&mut self, id: NodeId) {
        self.carry.push(id);
    }

    /// Take the next entry: lowest non-terminal level first, then level 0.
    pub fn pop(&mut self) -> Option<(u32, NodeId)> {
        while self.lowest < self.levels.len() {
            if let Some(id) = self.levels[self.lowest].pop_front() {
                return Some((self.lowest as u32, id));
            }
            self.lowest += 1;
        }
        self.levels[0].pop_front().map(|id| (0, id))
    }

    /// Whether an entry below `level` may still be waiting, carried
    /// entries included.
    pub fn may_hold_below(&self, level: u32) -> bool {
        let end = (level as usize).min(self.levels.len());
        !self.carry.is_empty()
            || (self.lowest < end && self.levels[self.lowest..end].iter().any(|b| !b.is_empty()))
    }

    pub fn is_carried(&self, id: NodeId) -> bool {
        self.carry.contains(&id)
    }

    /// Drain the carry list for the next round.
    pub fn take_carry(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.carry)
    }

    /// Start a new flush round and return its clock token.
    pub fn advance_clock(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Token of the current (or most recent) flush round.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Whether no bucket and no carry entry remains.
    pub fn is_empty(&self) -> bool {
        self.carry.is_empty() && self.levels.iter().all(VecDeque::is_empty)
    }

    /// Drop every queued entry.
    pub fn clear(&mut self) {
        for bucket in &mut self.levels {
            bucket.clear();
        }
        self.carry.clear();
        self.lowest = self.levels.len();
    }
}

impl Default for LevelQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Arena;

    fn ids(count: usize) -> Vec<NodeId> {
        let mut arena = Arena::new();
        (0..count).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn reports_entries_below_a_level() {
        let n = ids(2);
        let mut queue = LevelQueue::new();
        assert!(!queue.may_hold_below(5));

        queue.push(n[0], 3);
        assert!(queue.may_hold_below(4));
        assert!(!queue.may_hold_below(3));

        queue.pop();
        queue.carry(n[1]);
        assert!(queue.may_hold_below(1));
    }

    #[test]
    fn drains_ascending_then_terminal() {
        let n = ids(4);
        let mut queue = LevelQueue::new();
        queue.push(n[0], 0);
        queue.push(n[1], 3);
        queue.push(n[2], 1);
        queue.push(n[3], 2);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec![(1, n[2]), (2, n[3]), (3, n[1]), (0, n[0])]);
        assert!(queue.is_empty());
    }

    #[test]
    fn lower_level_pushed_mid_drain_runs_first() {
        let n = ids(3);
        let mut queue = LevelQueue::new();
        queue.push(n[0], 2);
        queue.push(n[1], 5);

        assert_eq!(queue.pop(), Some((2, n[0])));
        queue.push(n[2], 1);
        assert_eq!(queue.pop(), Some((1, n[2])));
        assert_eq!(queue.pop(), Some((5, n[1])));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn terminal_bucket_keeps_insertion_order() {
        let n = ids(3);
        let mut queue = LevelQueue::new();
        for id in &n {
            queue.push(*id, 0);
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|(_, id)| id).collect();
        assert_eq!(order, n);
    }

    #[test]
    fn carry_is_separate_from_buckets() {
        let n = ids(1);
        let mut queue = LevelQueue::new();
        queue.carry(n[0]);

        assert!(!queue.is_empty());
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.take_carry(), vec![n[0]]);
        assert!(queue.is_empty());
    }

    #[test]
    fn clock_advances_monotonically() {
        let mut queue = LevelQueue::new();
        let first = queue.advance_clock();
        let second = queue.advance_clock();
        assert!(second > first);
        assert_eq!(queue.clock(), second);
    }

    #[test]
    fn clear_empties_everything() {
        let n = ids(2);
        let mut queue = LevelQueue::new();
        queue.push(n[0], 4);
        queue.carry(n[1]);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }
}
