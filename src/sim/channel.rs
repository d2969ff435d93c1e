//! Back-pressured single-slot channels and the arena that owns them.
//!
//! A channel connects exactly one producer process to one consumer process.
//! Processes never hold references to each other; they hold typed
//! [`ChanId`] handles into a [`ChannelArena`] owned by the simulator.
//!
//! # Policies
//!
//! ```text
//!   Combinational                      Buffered
//!
//!   push(t) ──► [slot] ──► pop(t)      push(t) ──► [staged] ─edge─► [slot] ──► pop(t+1)
//! ```
//!
//! With [`ChannelPolicy::Combinational`] a value pushed in cycle `t` is
//! visible to a consumer that ticks later in the same cycle. With
//! [`ChannelPolicy::Buffered`] the value is staged and only becomes poppable
//! after the clock edge, regardless of tick order.
//!
//! # Blocking operations
//!
//! [`Channel::push`] and [`Channel::pop`] return [`Poll`]. A push that cannot
//! complete parks its value in the producer hold register and returns
//! `Poll::Pending`; the channel moves it in at a later clock edge. Until then
//! [`Channel::is_blocked`] reports `true` and the producer must not push again.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::task::Poll;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// When a pushed value becomes visible to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPolicy {
    /// Visible in the same cycle to a consumer ticking after the producer.
    #[default]
    Combinational,
    /// Visible from the next cycle.
    Buffered,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown channel policy '{0}'")]
pub struct ChannelPolicyError(pub String);

impl std::str::FromStr for ChannelPolicy {
    type Err = ChannelPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "combinational" | "comb" => Ok(Self::Combinational),
            "buffered" | "pipeline" => Ok(Self::Buffered),
            _ => Err(ChannelPolicyError(s.to_string())),
        }
    }
}

/// Per-channel traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Values accepted from the producer.
    pub pushes: u64,
    /// Values delivered to the consumer.
    pub pops: u64,
    /// Clock edges at which the producer was back-pressured.
    pub stall_cycles: u64,
}

/// One channel carrying values of type `T`.
#[derive(Debug, Clone)]
pub struct Channel<T> {
    name: String,
    policy: ChannelPolicy,
    /// Value visible to the consumer.
    slot: Option<T>,
    /// Value written this cycle (buffered policy only).
    staged: Option<T>,
    /// Value parked by a blocking push.
    held: Option<T>,
    /// A push was refused since the last edge.
    refused: bool,
    stats: ChannelStats,
}

impl<T> Channel<T> {
    pub fn new(name: impl Into<String>, policy: ChannelPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            slot: None,
            staged: None,
            held: None,
            refused: false,
            stats: ChannelStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> ChannelPolicy {
        self.policy
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// True if a `try_push` this cycle would succeed.
    pub fn can_push(&self) -> bool {
        if self.held.is_some() {
            return false;
        }
        match self.policy {
            ChannelPolicy::Combinational => self.slot.is_none(),
            ChannelPolicy::Buffered => self.staged.is_none(),
        }
    }

    /// True if a `try_pop` this cycle would succeed.
    pub fn can_pop(&self) -> bool {
        self.slot.is_some()
    }

    /// Non-blocking push. Returns the value back when the channel is occupied.
    pub fn try_push(&mut self, val: T) -> Result<(), T> {
        assert!(
            self.held.is_none(),
            "channel '{}': try_push while a blocking push is pending",
            self.name
        );
        if !self.can_push() {
            self.refused = true;
            return Err(val);
        }
        match self.policy {
            ChannelPolicy::Combinational => self.slot = Some(val),
            ChannelPolicy::Buffered => self.staged = Some(val),
        }
        self.stats.pushes += 1;
        Ok(())
    }

    /// Non-blocking pop.
    pub fn try_pop(&mut self) -> Option<T> {
        let val = self.slot.take();
        if val.is_some() {
            self.stats.pops += 1;
        }
        val
    }

    /// Look at the consumer-visible value without taking it.
    pub fn peek(&self) -> Option<&T> {
        self.slot.as_ref()
    }

    /// Blocking push. On `Pending` the value is parked and delivered at a
    /// later clock edge; the producer waits on [`is_blocked`](Self::is_blocked).
    pub fn push(&mut self, val: T) -> Poll<()> {
        match self.try_push(val) {
            Ok(()) => Poll::Ready(()),
            Err(val) => {
                self.held = Some(val);
                Poll::Pending
            }
        }
    }

    /// Blocking pop.
    pub fn pop(&mut self) -> Poll<T> {
        match self.try_pop() {
            Some(v) => Poll::Ready(v),
            None => Poll::Pending,
        }
    }

    /// True while a blocking push has not yet been delivered.
    pub fn is_blocked(&self) -> bool {
        self.held.is_some()
    }

    /// Clock edge.
    pub fn commit(&mut self) {
        if self.refused || self.held.is_some() {
            self.stats.stall_cycles += 1;
        }
        self.refused = false;

        if self.policy == ChannelPolicy::Buffered && self.slot.is_none() {
            self.slot = self.staged.take();
        }
        if self.held.is_some() {
            let target = match self.policy {
                ChannelPolicy::Combinational => &mut self.slot,
                ChannelPolicy::Buffered => &mut self.staged,
            };
            if target.is_none() {
                *target = self.held.take();
                self.stats.pushes += 1;
            }
        }
    }

    /// Consumer-side reset: drop anything visible or in flight.
    pub fn reset_read(&mut self) {
        self.slot = None;
        self.staged = None;
    }

    /// Producer-side reset: drop a parked blocking push.
    pub fn reset_write(&mut self) {
        self.held = None;
        self.refused = false;
    }

    /// Empty the channel from both ends.
    pub fn reset(&mut self) {
        self.reset_read();
        self.reset_write();
    }

    /// Number of values buffered anywhere in the channel.
    pub fn occupancy(&self) -> usize {
        self.slot.is_some() as usize + self.staged.is_some() as usize + self.held.is_some() as usize
    }
}

/// Typed handle to a channel in a [`ChannelArena`].
pub struct ChanId<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ChanId<T> {
    pub fn index(self) -> usize {
        self.index
    }
}

impl<T> Clone for ChanId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ChanId<T> {}

impl<T> PartialEq for ChanId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for ChanId<T> {}

impl<T> fmt::Debug for ChanId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChanId({})", self.index)
    }
}

/// Type-erased view used by the arena for edge and reset handling.
trait ErasedChannel {
    fn commit(&mut self);
    fn reset(&mut self);
    fn name(&self) -> &str;
    fn stats(&self) -> ChannelStats;
    fn occupancy(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> ErasedChannel for Channel<T> {
    fn commit(&mut self) {
        Channel::commit(self)
    }

    fn reset(&mut self) {
        Channel::reset(self)
    }

    fn name(&self) -> &str {
        Channel::name(self)
    }

    fn stats(&self) -> ChannelStats {
        Channel::stats(self)
    }

    fn occupancy(&self) -> usize {
        Channel::occupancy(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Owner of every channel in a simulation.
#[derive(Default)]
pub struct ChannelArena {
    channels: Vec<Box<dyn ErasedChannel>>,
}

impl ChannelArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel and return its handle.
    pub fn channel<T: 'static>(&mut self, name: impl Into<String>, policy: ChannelPolicy) -> ChanId<T> {
        let index = self.channels.len();
        let chan = Channel::<T>::new(name, policy);
        log::trace!("channel {} '{}' ({:?})", index, chan.name(), policy);
        self.channels.push(Box::new(chan));
        ChanId {
            index,
            _marker: PhantomData,
        }
    }

    /// Register `n` channels named `{prefix}[i]`.
    pub fn channels<T: 'static>(&mut self, prefix: &str, n: usize, policy: ChannelPolicy) -> Vec<ChanId<T>> {
        (0..n)
            .map(|i| self.channel(format!("{}[{}]", prefix, i), policy))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get<T: 'static>(&self, id: ChanId<T>) -> &Channel<T> {
        let chan = &self.channels[id.index];
        chan.as_any()
            .downcast_ref::<Channel<T>>()
            .unwrap_or_else(|| panic!("channel {} '{}' has a different payload type", id.index, chan.name()))
    }

    pub fn get_mut<T: 'static>(&mut self, id: ChanId<T>) -> &mut Channel<T> {
        self.channels[id.index]
            .as_any_mut()
            .downcast_mut::<Channel<T>>()
            .unwrap_or_else(|| panic!("channel {} has a different payload type", id.index))
    }

    pub fn try_push<T: 'static>(&mut self, id: ChanId<T>, val: T) -> Result<(), T> {
        self.get_mut(id).try_push(val)
    }

    pub fn try_pop<T: 'static>(&mut self, id: ChanId<T>) -> Option<T> {
        self.get_mut(id).try_pop()
    }

    pub fn push<T: 'static>(&mut self, id: ChanId<T>, val: T) -> Poll<()> {
        self.get_mut(id).push(val)
    }

    /// Blocking push for a producer that checks [`is_blocked`](Self::is_blocked)
    /// before each send. A refused value stays parked until a later edge;
    /// sending again while it is parked panics.
    pub fn send<T: 'static>(&mut self, id: ChanId<T>, val: T) {
        let chan = self.get_mut(id);
        if chan.push(val).is_pending() {
            log::trace!("channel '{}': value parked", chan.name());
        }
    }

    pub fn pop<T: 'static>(&mut self, id: ChanId<T>) -> Poll<T> {
        self.get_mut(id).pop()
    }

    pub fn peek<T: 'static>(&self, id: ChanId<T>) -> Option<&T> {
        self.get(id).peek()
    }

    pub fn can_push<T: 'static>(&self, id: ChanId<T>) -> bool {
        self.get(id).can_push()
    }

    pub fn can_pop<T: 'static>(&self, id: ChanId<T>) -> bool {
        self.get(id).can_pop()
    }

    pub fn is_blocked<T: 'static>(&self, id: ChanId<T>) -> bool {
        self.get(id).is_blocked()
    }

    pub fn stats<T: 'static>(&self, id: ChanId<T>) -> ChannelStats {
        self.get(id).stats()
    }

    /// Clock edge for every channel.
    pub fn commit_all(&mut self) {
        for chan in &mut self.channels {
            chan.commit();
        }
    }

    /// Empty every channel.
    pub fn reset_all(&mut self) {
        for chan in &mut self.channels {
            chan.reset();
        }
    }

    /// Total values buffered across all channels.
    pub fn total_occupancy(&self) -> usize {
        self.channels.iter().map(|c| c.occupancy()).sum()
    }

    /// `(name, stats)` for every channel, in registration order.
    pub fn all_stats(&self) -> Vec<(String, ChannelStats)> {
        self.channels
            .iter()
            .map(|c| (c.name().to_string(), c.stats()))
            .collect()
    }
}

impl fmt::Debug for ChannelArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelArena")
            .field("channels", &self.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combinational_same_cycle() {
        let mut ch = Channel::new("c", ChannelPolicy::Combinational);
        assert!(ch.try_push(1u32).is_ok());
        assert_eq!(ch.try_push(2), Err(2));
        assert_eq!(ch.try_pop(), Some(1));
        assert_eq!(ch.try_pop(), None);
    }

    #[test]
    fn test_buffered_next_cycle() {
        let mut ch = Channel::new("b", ChannelPolicy::Buffered);
        assert!(ch.try_push(7u32).is_ok());
        assert_eq!(ch.try_pop(), None);
        ch.commit();
        // Full throughput: a new value can be staged while the old one waits.
        assert!(ch.try_push(8).is_ok());
        assert_eq!(ch.try_pop(), Some(7));
        ch.commit();
        assert_eq!(ch.try_pop(), Some(8));
    }

    #[test]
    fn test_buffered_backpressure() {
        let mut ch = Channel::new("b", ChannelPolicy::Buffered);
        ch.try_push(1u8).unwrap();
        ch.commit();
        ch.try_push(2).unwrap();
        ch.commit();
        // slot holds 1, staged holds 2
        assert!(!ch.can_push());
        assert_eq!(ch.try_push(3), Err(3));
        ch.commit();
        assert_eq!(ch.stats().stall_cycles, 1);
    }

    #[test]
    fn test_blocking_push_parks_value() {
        let mut ch = Channel::new("c", ChannelPolicy::Combinational);
        assert_eq!(ch.push(1u32), Poll::Ready(()));
        assert_eq!(ch.push(2), Poll::Pending);
        assert!(ch.is_blocked());
        assert_eq!(ch.try_pop(), Some(1));
        ch.commit();
        assert!(!ch.is_blocked());
        assert_eq!(ch.pop(), Poll::Ready(2));
        assert_eq!(ch.pop(), Poll::Pending);
        assert_eq!(ch.stats().pushes, 2);
        assert_eq!(ch.stats().pops, 2);
    }

    #[test]
    #[should_panic(expected = "blocking push is pending")]
    fn test_send_while_parked_panics() {
        let mut arena = ChannelArena::new();
        let c: ChanId<u32> = arena.channel("c", ChannelPolicy::Combinational);
        arena.send(c, 1);
        arena.send(c, 2);
        assert!(arena.is_blocked(c));
        arena.send(c, 3);
    }

    #[test]
    fn test_reset_empties_both_ends() {
        let mut ch = Channel::new("c", ChannelPolicy::Buffered);
        ch.try_push(1u32).unwrap();
        ch.commit();
        ch.try_push(2).unwrap();
        let _ = ch.push(3);
        ch.reset();
        assert_eq!(ch.occupancy(), 0);
        assert!(!ch.is_blocked());
        ch.commit();
        assert_eq!(ch.try_pop(), None);
    }

    #[test]
    fn test_arena_typed_handles() {
        let mut arena = ChannelArena::new();
        let a: ChanId<u32> = arena.channel("a", ChannelPolicy::Combinational);
        let b: ChanId<String> = arena.channel("b", ChannelPolicy::Buffered);
        arena.try_push(a, 5).unwrap();
        arena.try_push(b, "hi".to_string()).unwrap();
        assert_eq!(arena.try_pop(a), Some(5));
        assert_eq!(arena.try_pop(b), None);
        arena.commit_all();
        assert_eq!(arena.peek(b).map(String::as_str), Some("hi"));
        assert_eq!(arena.total_occupancy(), 1);
        arena.reset_all();
        assert_eq!(arena.total_occupancy(), 0);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("Buffered".parse::<ChannelPolicy>(), Ok(ChannelPolicy::Buffered));
        let err = "bogus".parse::<ChannelPolicy>().unwrap_err();
        assert_eq!(err, ChannelPolicyError("bogus".to_string()));
        assert_eq!(err.to_string(), "unknown channel policy 'bogus'");
    }
}
