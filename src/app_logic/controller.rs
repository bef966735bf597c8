/*
 * Rule lifecycle orchestration. `RuleController` owns the visitor stack and
 * the list of confirmed rules, bridges engine events onto the UI notice
 * queue, and enforces the per-session state machine:
 *
 *   Idle -> Loading -> Confirming -> Walking -> Done
 *                                      |          |
 *                                      +-> Removing <-+
 *
 * `Confirming -> Walking` is the only transition that mutates the shared
 * visitor stack, and it happens exactly once per confirmed rule. The walk
 * itself runs on a worker thread and communicates back exclusively through
 * the observer layer and the bounded notice queue; nothing here ever blocks
 * on UI state.
 */
use crate::app_logic::ui_queue::{
    DEFAULT_QUEUE_CAPACITY, EngineNotice, NoticePublisher, UiQueue, notice_channel,
};
use crate::core::config::ConfigManagerOperations;
use crate::core::events::{EventKind, RuleEvent, RuleListener, SipEvent, SipListener};
use crate::core::metadata::MetadataAssignment;
use crate::core::rules::{AssociationType, Rule, RuleError, RuleId, SelectedItem};
use crate::core::source_tree::{Marking, NodeId, SourceTree};
use crate::core::visitor_stack::VisitorStack;
use crate::core::walker::CompletionToken;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

pub const RULE_CREATION_FAILED_KEY: &str = "rule.creation_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Confirming,
    Walking,
    Done,
    Removing,
}

#[derive(Debug)]
pub enum ControllerError {
    Rule(RuleError),
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
    UnknownRule(RuleId),
}

impl From<RuleError> for ControllerError {
    fn from(err: RuleError) -> Self {
        ControllerError::Rule(err)
    }
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::Rule(e) => write!(f, "{e}"),
            ControllerError::InvalidTransition { from, to } => {
                write!(f, "Invalid rule session transition {from:?} -> {to:?}")
            }
            ControllerError::UnknownRule(id) => write!(f, "No such rule: {id}"),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Rule(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/*
 * One rule-creation session, shared between the UI surface that drives it
 * and the background thread resolving the selection. UI surfaces advance the
 * state as notices arrive (Walking -> Done on RuleFinished, for instance).
 */
#[derive(Debug)]
pub struct RuleSession {
    state: SessionState,
    selection: Vec<SelectedItem>,
}

pub type SessionHandle = Arc<Mutex<RuleSession>>;

impl RuleSession {
    fn new() -> Self {
        RuleSession {
            state: SessionState::Idle,
            selection: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn selection(&self) -> &[SelectedItem] {
        &self.selection
    }

    fn transition_allowed(from: SessionState, to: SessionState) -> bool {
        matches!(
            (from, to),
            (SessionState::Idle, SessionState::Loading)
                | (SessionState::Loading, SessionState::Confirming)
                | (SessionState::Confirming, SessionState::Walking)
                | (SessionState::Walking, SessionState::Done)
                | (SessionState::Walking, SessionState::Removing)
                | (SessionState::Done, SessionState::Removing)
        )
    }

    pub fn advance(&mut self, to: SessionState) -> Result<()> {
        if !Self::transition_allowed(self.state, to) {
            return Err(ControllerError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        log::trace!("RuleSession: {:?} -> {to:?}", self.state);
        self.state = to;
        Ok(())
    }
}

/*
 * Builds the selection for a rule session from marked source-tree nodes.
 * Placeholders contribute nothing; ignored markings travel with the item so
 * that rule normalization can drop them.
 */
pub fn selection_from_tree(tree: &SourceTree, ids: &[NodeId]) -> Vec<SelectedItem> {
    let mut selection = Vec::new();
    for id in ids {
        let node = tree.node(*id);
        if node.is_placeholder() {
            continue;
        }
        selection.push(SelectedItem {
            path: node.path.clone(),
            is_dir: node.is_dir(),
            ignored: node.marking == Marking::Ignored,
        });
    }
    selection
}

/// Forwards a rule's observer events onto the UI notice queue.
struct NoticeForwarder {
    publisher: NoticePublisher,
}

impl SipListener for NoticeForwarder {
    fn on_sip_event(&self, event: &SipEvent) {
        let notice = match event.kind {
            EventKind::Created => EngineNotice::SipCreated {
                rule: event.rule,
                sip: event.sip.clone(),
            },
            EventKind::Updated => EngineNotice::SipUpdated {
                rule: event.rule,
                sip: event.sip.clone(),
            },
            EventKind::Removed => EngineNotice::SipRemoved {
                rule: event.rule,
                sip: event.sip.clone(),
            },
        };
        self.publisher.post(notice);
    }
}

impl RuleListener for NoticeForwarder {
    fn on_rule_event(&self, event: &RuleEvent) {
        match event.kind {
            EventKind::Created => {
                self.publisher
                    .post(EngineNotice::RuleStarted { rule: event.rule });
            }
            EventKind::Updated if event.finished => {
                self.publisher.post(EngineNotice::RuleFinished {
                    rule: event.rule,
                    sip_count: event.sip_count,
                });
            }
            EventKind::Updated => {}
            EventKind::Removed => {
                self.publisher.post(EngineNotice::RuleRemoved {
                    rule: event.rule,
                    removed_sips: event.sip_count,
                });
            }
        }
    }
}

pub struct RuleController {
    config: Arc<dyn ConfigManagerOperations>,
    stack: VisitorStack,
    rules: Mutex<Vec<Arc<Rule>>>,
    publisher: NoticePublisher,
}

impl RuleController {
    pub fn new(config: Arc<dyn ConfigManagerOperations>) -> (Self, UiQueue) {
        Self::with_queue_capacity(config, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(
        config: Arc<dyn ConfigManagerOperations>,
        capacity: usize,
    ) -> (Self, UiQueue) {
        let (publisher, queue) = notice_channel(capacity);
        (
            RuleController {
                config,
                stack: VisitorStack::new(),
                rules: Mutex::new(Vec::new()),
                publisher,
            },
            queue,
        )
    }

    fn rules_guard(&self) -> MutexGuard<'_, Vec<Arc<Rule>>> {
        match self.rules.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_session(session: &SessionHandle) -> MutexGuard<'_, RuleSession> {
        match session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn begin_session(&self) -> SessionHandle {
        Arc::new(Mutex::new(RuleSession::new()))
    }

    /*
     * Resolves the raw selection on a worker thread (Idle -> Loading, then
     * Loading -> Confirming once resolved) so that a large selection never
     * stalls the UI loop. The returned token completes when the session has
     * reached Confirming.
     */
    pub fn load_selection(
        &self,
        session: &SessionHandle,
        paths: Vec<PathBuf>,
    ) -> Result<CompletionToken> {
        Self::lock_session(session).advance(SessionState::Loading)?;

        let token = CompletionToken::new();
        let worker_token = token.clone();
        let worker_session = Arc::clone(session);
        thread::spawn(move || {
            let mut selection = Vec::new();
            for path in paths {
                match fs::metadata(&path) {
                    Ok(meta) => selection.push(SelectedItem {
                        is_dir: meta.is_dir(),
                        path,
                        ignored: false,
                    }),
                    Err(err) => {
                        log::debug!("RuleController: dropping selection entry {path:?}: {err}");
                    }
                }
            }

            let mut guard = match worker_session.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.selection = selection;
            if let Err(err) = guard.advance(SessionState::Confirming) {
                log::warn!("RuleController: selection load raced the session: {err}");
            }
            drop(guard);
            worker_token.complete();
        });
        Ok(token)
    }

    /// Hands a tree-derived selection straight to a session, for surfaces
    /// that already resolved it (Loading -> Confirming synchronously).
    pub fn load_resolved_selection(
        &self,
        session: &SessionHandle,
        selection: Vec<SelectedItem>,
    ) -> Result<()> {
        let mut guard = Self::lock_session(session);
        guard.advance(SessionState::Loading)?;
        guard.selection = selection;
        guard.advance(SessionState::Confirming)
    }

    /*
     * Confirms the rule described by a Confirming session: builds the rule,
     * validates and applies its metadata assignment, attaches the notice
     * forwarder, and pushes the visitor onto the stack. On failure nothing
     * is registered anywhere, a Failure notice is posted, and the session
     * stays in Confirming so the user can adjust and retry.
     */
    pub fn confirm(
        &self,
        session: &SessionHandle,
        association: AssociationType,
        metadata: MetadataAssignment,
    ) -> Result<RuleId> {
        let selection = {
            let guard = Self::lock_session(session);
            if guard.state() != SessionState::Confirming {
                return Err(ControllerError::InvalidTransition {
                    from: guard.state(),
                    to: SessionState::Walking,
                });
            }
            guard.selection.clone()
        };

        let rule = Arc::new(Rule::new(&selection, association, metadata));
        let visitor = match rule.apply(self.config.as_ref()) {
            Ok(visitor) => visitor,
            Err(err) => {
                log::error!("RuleController: rule creation aborted: {err}");
                self.publisher.post(EngineNotice::Failure {
                    rule: None,
                    message_key: RULE_CREATION_FAILED_KEY.to_string(),
                });
                return Err(err.into());
            }
        };

        let forwarder = Arc::new(NoticeForwarder {
            publisher: self.publisher.clone(),
        });
        rule.add_sip_listener(forwarder.clone());
        rule.add_rule_listener(forwarder);
        rule.announce_created();

        // The one and only mutation of the shared stack for this rule.
        self.stack.add(rule.id(), rule.source_paths(), visitor);
        self.rules_guard().push(Arc::clone(&rule));
        Self::lock_session(session).advance(SessionState::Walking)?;

        log::info!(
            "RuleController: confirmed {} over {} source path(s)",
            rule.id(),
            rule.source_paths().len()
        );
        Ok(rule.id())
    }

    /*
     * Removes a confirmed rule: cancels its walk if one is still running,
     * waits for the visitor to detach, and runs the removal cascade so every
     * produced SIP broadcasts exactly one Removed notification.
     */
    pub fn remove_rule(&self, rule_id: RuleId) -> Result<usize> {
        let rule = {
            let mut rules = self.rules_guard();
            match rules.iter().position(|rule| rule.id() == rule_id) {
                Some(index) => rules.swap_remove(index),
                None => return Err(ControllerError::UnknownRule(rule_id)),
            }
        };

        self.stack.remove(rule_id);
        let removed = rule.cascade_removed();
        Ok(removed)
    }

    pub fn rule(&self, rule_id: RuleId) -> Option<Arc<Rule>> {
        self.rules_guard()
            .iter()
            .find(|rule| rule.id() == rule_id)
            .cloned()
    }

    pub fn rule_ids(&self) -> Vec<RuleId> {
        self.rules_guard().iter().map(|rule| rule.id()).collect()
    }

    pub fn is_rule_walking(&self, rule_id: RuleId) -> bool {
        self.stack.is_rule_active(rule_id)
    }

    pub fn has_active_walk_over(&self, paths: &[PathBuf]) -> bool {
        self.stack.is_active(paths)
    }

    /// Block-waits for a rule's walk; UI code polls instead.
    pub fn wait_for_rule(&self, rule_id: RuleId, timeout: Duration) -> bool {
        self.stack.wait_for(rule_id, timeout)
    }
}
