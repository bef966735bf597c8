/*
 * The worker-to-UI half of the engine's two-queue threading model. Worker
 * threads publish `EngineNotice` values onto a bounded channel; the single
 * UI-owned loop drains the channel each tick with `drain_pending` and applies
 * the notices to its widgets. Workers never touch UI state directly, and
 * failures travel the same channel as progress, tagged as `Failure` notices
 * carrying a localization key.
 *
 * The channel is bounded so a burst of walk events cannot grow memory without
 * limit; a full queue back-pressures the walker until the UI catches up.
 */
use crate::core::localization::LocalizerOperations;
use crate::core::rules::RuleId;
use crate::core::sip_preview::SipSnapshot;
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, sync_channel};
use std::time::Duration;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum EngineNotice {
    RuleStarted { rule: RuleId },
    SipCreated { rule: RuleId, sip: SipSnapshot },
    SipUpdated { rule: RuleId, sip: SipSnapshot },
    SipRemoved { rule: RuleId, sip: SipSnapshot },
    RuleFinished { rule: RuleId, sip_count: usize },
    RuleRemoved { rule: RuleId, removed_sips: usize },
    Failure { rule: Option<RuleId>, message_key: String },
}

impl EngineNotice {
    /// Localization key describing this notice; the engine never carries
    /// user-facing text itself.
    pub fn message_key(&self) -> &str {
        match self {
            EngineNotice::RuleStarted { .. } => "notice.rule.started",
            EngineNotice::SipCreated { .. } => "notice.sip.created",
            EngineNotice::SipUpdated { .. } => "notice.sip.updated",
            EngineNotice::SipRemoved { .. } => "notice.sip.removed",
            EngineNotice::RuleFinished { .. } => "notice.rule.finished",
            EngineNotice::RuleRemoved { .. } => "notice.rule.removed",
            EngineNotice::Failure { message_key, .. } => message_key.as_str(),
        }
    }

    pub fn localize(&self, localizer: &dyn LocalizerOperations) -> String {
        localizer.localized(self.message_key())
    }

    pub fn rule(&self) -> Option<RuleId> {
        match self {
            EngineNotice::RuleStarted { rule }
            | EngineNotice::SipCreated { rule, .. }
            | EngineNotice::SipUpdated { rule, .. }
            | EngineNotice::SipRemoved { rule, .. }
            | EngineNotice::RuleFinished { rule, .. }
            | EngineNotice::RuleRemoved { rule, .. } => Some(*rule),
            EngineNotice::Failure { rule, .. } => *rule,
        }
    }
}

/// Worker-side handle: cheap to clone into threads and listeners.
#[derive(Clone)]
pub struct NoticePublisher {
    tx: SyncSender<EngineNotice>,
}

impl NoticePublisher {
    pub fn post(&self, notice: EngineNotice) {
        if self.tx.send(notice).is_err() {
            // The UI side is gone (shutdown); nothing left to update.
            log::debug!("UiQueue: dropping notice, receiver closed");
        }
    }
}

/// UI-side handle, owned by the event loop thread.
pub struct UiQueue {
    rx: Receiver<EngineNotice>,
}

impl UiQueue {
    /// Drains everything currently queued without blocking. Called once per
    /// UI tick.
    pub fn drain_pending(&self) -> Vec<EngineNotice> {
        let mut drained = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(notice) => drained.push(notice),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        drained
    }

    /// Blocking receive with a deadline. Tests use this to wait for specific
    /// notices; production code sticks to `drain_pending`.
    pub fn next_within(&self, timeout: Duration) -> Option<EngineNotice> {
        self.rx.recv_timeout(timeout).ok()
    }
}

pub fn notice_channel(capacity: usize) -> (NoticePublisher, UiQueue) {
    let (tx, rx) = sync_channel(capacity.max(1));
    (NoticePublisher { tx }, UiQueue { rx })
}
