//! Every node owns a mailbox: the messages posted to it since its
//! last delivery.  Mailboxes consolidate as they go, so a tuple that
//! is inserted and then deleted before delivery never reaches the node.
//!
//! There are three disciplines, picked once per network from the
//! engine configuration:
//!
//! * behavior-collapsing: one net count per tuple, timestamps ignored;
//! * update-splitting (DRed): deletions and insertions are kept apart,
//!   and deletions are delivered in an earlier, anti-monotone phase;
//! * timely: one slot per timestamp, delivered lowest first.
use super::address::Slot;
use crate::config::EngineConfig;
use crate::update::Timestamp;
use crate::update::NEUTRAL;
use rete_recipes::Tuple;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// A consolidated message, as handed to a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub slot: Slot,
    pub tuple: Tuple,
    pub timestamp: Timestamp,
    pub diff: isize,
}

/// Delivery phases.  Containers drain every anti-monotone message in
/// the network before any default one.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    /// Deletions held back by update-splitting mailboxes.
    AntiMonotone,
    /// Everything else.
    Default,
}

pub trait Mailbox: Send {
    /// Records a signed multiplicity change for `tuple`.
    fn post_diff(&mut self, slot: Slot, tuple: Tuple, timestamp: Timestamp, diff: isize);

    fn has_messages(&self, phase: Phase) -> bool;

    /// Removes and returns the messages of `phase`, in a deterministic
    /// order (timestamp, then slot, then tuple).
    fn deliver(&mut self, phase: Phase) -> Vec<Message>;

    fn clear(&mut self);
}

/// Returns a fresh mailbox of the kind `config` calls for.
#[must_use]
pub fn mailbox_for(config: &EngineConfig) -> Box<dyn Mailbox> {
    if config.is_timely() {
        Box::new(TimelyMailbox::default())
    } else if config.delete_and_rederive {
        Box::new(UpdateSplittingMailbox::default())
    } else {
        Box::new(CollapsingMailbox::default())
    }
}

type Counts = FxHashMap<(Slot, Tuple), isize>;

fn add_count(counts: &mut Counts, key: (Slot, Tuple), diff: isize) {
    if diff == 0 {
        return;
    }

    let entry = counts.entry(key.clone()).or_insert(0);
    *entry += diff;
    if *entry == 0 {
        counts.remove(&key);
    }
}

fn drain_counts(counts: &mut Counts, timestamp: Timestamp, out: &mut Vec<Message>) {
    let mut pending = counts.drain().collect::<Vec<_>>();
    pending.sort_unstable();
    out.extend(pending.into_iter().map(|((slot, tuple), diff)| Message {
        slot,
        tuple,
        timestamp,
        diff,
    }));
}

#[derive(Debug, Default)]
pub struct CollapsingMailbox {
    pending: Counts,
}

impl Mailbox for CollapsingMailbox {
    fn post_diff(&mut self, slot: Slot, tuple: Tuple, timestamp: Timestamp, diff: isize) {
        debug_assert_eq!(timestamp, NEUTRAL);
        add_count(&mut self.pending, (slot, tuple), diff);
    }

    fn has_messages(&self, phase: Phase) -> bool {
        phase == Phase::Default && !self.pending.is_empty()
    }

    fn deliver(&mut self, phase: Phase) -> Vec<Message> {
        let mut ret = Vec::new();
        if phase == Phase::Default {
            drain_counts(&mut self.pending, NEUTRAL, &mut ret);
        }

        ret
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Keeps pending deletions (`anti_monotone`, negative counts) apart
/// from pending insertions (`monotone`, positive counts).  A new
/// message first cancels against pending messages of the opposite
/// sign.
#[derive(Debug, Default)]
pub struct UpdateSplittingMailbox {
    monotone: Counts,
    anti_monotone: Counts,
}

impl Mailbox for UpdateSplittingMailbox {
    fn post_diff(&mut self, slot: Slot, tuple: Tuple, timestamp: Timestamp, diff: isize) {
        debug_assert_eq!(timestamp, NEUTRAL);
        let key = (slot, tuple);
        let (opposite, same) = if diff > 0 {
            (&mut self.anti_monotone, &mut self.monotone)
        } else {
            (&mut self.monotone, &mut self.anti_monotone)
        };

        let pending = opposite.get(&key).copied().unwrap_or(0);
        let cancelled = pending.abs().min(diff.abs()) * diff.signum();
        add_count(opposite, key.clone(), cancelled);
        add_count(same, key, diff - cancelled);
    }

    fn has_messages(&self, phase: Phase) -> bool {
        match phase {
            Phase::AntiMonotone => !self.anti_monotone.is_empty(),
            Phase::Default => !self.monotone.is_empty(),
        }
    }

    fn deliver(&mut self, phase: Phase) -> Vec<Message> {
        let mut ret = Vec::new();
        match phase {
            Phase::AntiMonotone => drain_counts(&mut self.anti_monotone, NEUTRAL, &mut ret),
            Phase::Default => drain_counts(&mut self.monotone, NEUTRAL, &mut ret),
        }

        ret
    }

    fn clear(&mut self) {
        self.monotone.clear();
        self.anti_monotone.clear();
    }
}

#[derive(Debug, Default)]
pub struct TimelyMailbox {
    pending: BTreeMap<Timestamp, Counts>,
}

impl Mailbox for TimelyMailbox {
    fn post_diff(&mut self, slot: Slot, tuple: Tuple, timestamp: Timestamp, diff: isize) {
        let counts = self.pending.entry(timestamp).or_default();
        add_count(counts, (slot, tuple), diff);
        if counts.is_empty() {
            self.pending.remove(&timestamp);
        }
    }

    fn has_messages(&self, phase: Phase) -> bool {
        phase == Phase::Default && !self.pending.is_empty()
    }

    fn deliver(&mut self, phase: Phase) -> Vec<Message> {
        let mut ret = Vec::new();
        if phase == Phase::Default {
            for (timestamp, mut counts) in std::mem::take(&mut self.pending) {
                drain_counts(&mut counts, timestamp, &mut ret);
            }
        }

        ret
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

#[test]
fn test_collapsing_cancels() {
    let mut mailbox = CollapsingMailbox::default();
    mailbox.post_diff(Slot::Primary, Tuple::from([1]), NEUTRAL, 1);
    mailbox.post_diff(Slot::Primary, Tuple::from([1]), NEUTRAL, -1);
    assert!(!mailbox.has_messages(Phase::Default));

    mailbox.post_diff(Slot::Primary, Tuple::from([2]), NEUTRAL, 1);
    mailbox.post_diff(Slot::Secondary, Tuple::from([2]), NEUTRAL, -1);
    let messages = mailbox.deliver(Phase::Default);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].slot, Slot::Primary);
    assert_eq!(messages[0].diff, 1);
    assert_eq!(messages[1].diff, -1);
    assert!(!mailbox.has_messages(Phase::Default));
}

#[test]
fn test_splitting_phases() {
    let mut mailbox = UpdateSplittingMailbox::default();
    mailbox.post_diff(Slot::Primary, Tuple::from([1]), NEUTRAL, -1);
    mailbox.post_diff(Slot::Primary, Tuple::from([2]), NEUTRAL, 1);
    assert!(mailbox.has_messages(Phase::AntiMonotone));
    assert!(mailbox.has_messages(Phase::Default));

    let deletions = mailbox.deliver(Phase::AntiMonotone);
    assert_eq!(deletions.len(), 1);
    assert_eq!(deletions[0].tuple, Tuple::from([1]));
    assert_eq!(deletions[0].diff, -1);
    assert!(!mailbox.has_messages(Phase::AntiMonotone));

    let insertions = mailbox.deliver(Phase::Default);
    assert_eq!(insertions[0].tuple, Tuple::from([2]));
}

#[test]
fn test_splitting_cancels_opposite_sign() {
    let mut mailbox = UpdateSplittingMailbox::default();
    mailbox.post_diff(Slot::Primary, Tuple::from([1]), NEUTRAL, -1);
    mailbox.post_diff(Slot::Primary, Tuple::from([1]), NEUTRAL, 2);

    assert!(!mailbox.has_messages(Phase::AntiMonotone));
    let insertions = mailbox.deliver(Phase::Default);
    assert_eq!(insertions.len(), 1);
    assert_eq!(insertions[0].diff, 1);
}

#[test]
fn test_timely_order() {
    let mut mailbox = TimelyMailbox::default();
    mailbox.post_diff(Slot::Primary, Tuple::from([1]), 3, 1);
    mailbox.post_diff(Slot::Primary, Tuple::from([1]), 1, 1);
    mailbox.post_diff(Slot::Primary, Tuple::from([2]), 3, -1);
    mailbox.post_diff(Slot::Primary, Tuple::from([2]), 3, 1);

    let messages = mailbox.deliver(Phase::Default);
    assert_eq!(
        messages.iter().map(|m| m.timestamp).collect::<Vec<_>>(),
        vec![1, 3]
    );
    assert!(!mailbox.has_messages(Phase::Default));
}
