/*
 * The notification layer of the assembly engine. Rules and SIP previews are
 * observable subjects: every mutation is broadcast to the subscribers attached
 * to that subject, as a typed event kind plus a full current-state snapshot.
 * Sending snapshots (not deltas) lets a listener attach at any point and
 * reconcile from the payload alone.
 *
 * Delivery is synchronous and ordered relative to the mutation that triggered
 * it: the mutating code finishes the mutation, takes the snapshot, and only
 * then notifies, so a listener never observes a torn state.
 */
use crate::core::rules::RuleId;
use crate::core::sip_preview::SipSnapshot;
use std::sync::{Arc, Mutex};

/// What happened to the subject of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Removed,
}

/// Event describing one SIP preview, carrying the complete post-mutation state.
#[derive(Debug, Clone)]
pub struct SipEvent {
    pub kind: EventKind,
    pub rule: RuleId,
    pub sip: SipSnapshot,
}

/*
 * Event describing a rule as a whole. `sip_count` is the number of SIP
 * previews the rule has produced so far; `finished` is set on the final
 * `Updated` event once the rule's walk has completed.
 */
#[derive(Debug, Clone)]
pub struct RuleEvent {
    pub kind: EventKind,
    pub rule: RuleId,
    pub sip_count: usize,
    pub finished: bool,
}

pub trait SipListener: Send + Sync {
    fn on_sip_event(&self, event: &SipEvent);
}

pub trait RuleListener: Send + Sync {
    fn on_rule_event(&self, event: &RuleEvent);
}

/*
 * A per-subject subscriber list. The list itself is the only shared state;
 * notification clones the current subscriber set and releases the lock before
 * invoking listeners, so a listener may attach further subscribers without
 * deadlocking. Events are delivered in attach order.
 */
pub struct Subscribers<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Subscribers<L> {
    pub fn new() -> Self {
        Subscribers {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn attach(&self, listener: Arc<L>) {
        match self.listeners.lock() {
            Ok(mut list) => list.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    pub fn detach_all(&self) {
        match self.listeners.lock() {
            Ok(mut list) => list.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    pub fn len(&self) -> usize {
        match self.listeners.lock() {
            Ok(list) => list.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes `deliver` for each attached listener, in attach order.
    pub fn notify(&self, deliver: impl Fn(&L)) {
        let current: Vec<Arc<L>> = match self.listeners.lock() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in current {
            deliver(&listener);
        }
    }
}

impl<L: ?Sized> Default for Subscribers<L> {
    fn default() -> Self {
        Self::new()
    }
}
