/*
 * Registry of active walks: one entry per rule whose visitor is currently
 * queued or running. This is the only structure in the engine that more than
 * one thread mutates, and every mutation goes through the mutex here.
 *
 * Concurrency policy: walks over disjoint path sets run in parallel; a walk
 * whose source paths overlap an active entry (equal paths, or one an
 * ancestor of the other) is serialized behind it by handing the new worker
 * the older walk's completion token. At most one walker is ever running per
 * distinct source path set, and two visitors can never mutate SIP previews
 * fed from the same subtree at the same time.
 */
use crate::core::rules::RuleId;
use crate::core::visitors::TreeVisitor;
use crate::core::walker::{CompletionToken, FileTreeWalker, WalkHandle};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

struct ActiveWalk {
    rule: RuleId,
    paths: Vec<PathBuf>,
    handle: WalkHandle,
}

fn paths_overlap(a: &[PathBuf], b: &[PathBuf]) -> bool {
    a.iter().any(|x| {
        b.iter()
            .any(|y| x == y || x.starts_with(y.as_path()) || y.starts_with(x.as_path()))
    })
}

#[derive(Default)]
pub struct VisitorStack {
    walks: Mutex<Vec<ActiveWalk>>,
}

impl VisitorStack {
    pub fn new() -> Self {
        VisitorStack {
            walks: Mutex::new(Vec::new()),
        }
    }

    fn walks_guard(&self) -> MutexGuard<'_, Vec<ActiveWalk>> {
        match self.walks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /*
     * Attaches a visitor and starts (or queues) its walk. The blockers are
     * captured and the entry is registered under one lock acquisition, so a
     * concurrent `add` over an overlapping set is guaranteed to observe this
     * walk and line up behind it.
     */
    pub fn add(
        &self,
        rule: RuleId,
        paths: Vec<PathBuf>,
        visitor: Box<dyn TreeVisitor>,
    ) -> WalkHandle {
        let mut walks = self.walks_guard();
        Self::reap_finished(&mut walks);

        let blockers: Vec<CompletionToken> = walks
            .iter()
            .filter(|walk| paths_overlap(&walk.paths, &paths))
            .map(|walk| walk.handle.completion().clone())
            .collect();
        if !blockers.is_empty() {
            log::debug!(
                "VisitorStack: {rule} overlaps {} active walk(s), serializing",
                blockers.len()
            );
        }

        let handle = FileTreeWalker::start(paths.clone(), visitor, blockers);
        walks.push(ActiveWalk {
            rule,
            paths,
            handle: handle.clone(),
        });
        log::debug!("VisitorStack: {rule} attached ({} active)", walks.len());
        handle
    }

    /*
     * Cancels the walk of a rule (if still running), waits for the worker to
     * acknowledge, and drops the entry. When this returns, the visitor has
     * been retired: teardown ran and no further mutation can come from it.
     * Returns false for rules with no (remaining) entry.
     */
    pub fn remove(&self, rule: RuleId) -> bool {
        let entry = {
            let mut walks = self.walks_guard();
            match walks.iter().position(|walk| walk.rule == rule) {
                Some(index) => walks.swap_remove(index),
                None => return false,
            }
        };

        entry.handle.cancel();
        entry.handle.completion().wait();
        log::debug!("VisitorStack: {rule} detached");
        true
    }

    /// True while a walk over paths overlapping `paths` is queued or running.
    pub fn is_active(&self, paths: &[PathBuf]) -> bool {
        let mut walks = self.walks_guard();
        Self::reap_finished(&mut walks);
        walks.iter().any(|walk| paths_overlap(&walk.paths, paths))
    }

    pub fn is_rule_active(&self, rule: RuleId) -> bool {
        let mut walks = self.walks_guard();
        Self::reap_finished(&mut walks);
        walks.iter().any(|walk| walk.rule == rule)
    }

    pub fn active_count(&self) -> usize {
        let mut walks = self.walks_guard();
        Self::reap_finished(&mut walks);
        walks.len()
    }

    /*
     * Blocks until the rule's walk has finished or the timeout elapses.
     * A rule with no entry has nothing outstanding and reports true.
     */
    pub fn wait_for(&self, rule: RuleId, timeout: Duration) -> bool {
        let token = {
            let walks = self.walks_guard();
            walks
                .iter()
                .find(|walk| walk.rule == rule)
                .map(|walk| walk.handle.completion().clone())
        };
        match token {
            Some(token) => token.wait_timeout(timeout),
            None => true,
        }
    }

    fn reap_finished(walks: &mut Vec<ActiveWalk>) {
        walks.retain(|walk| !walk.handle.is_finished());
    }
}
