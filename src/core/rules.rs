/*
 * Association rules. A rule binds a normalized selection of source-tree
 * items to an association strategy and a metadata assignment, and produces a
 * `TreeVisitor` that turns the filesystem walk over that selection into SIP
 * previews. A rule is an observable subject: rule-level and SIP-level
 * listeners attached to it receive every later mutation.
 */
use crate::core::config::ConfigManagerOperations;
use crate::core::events::{EventKind, RuleEvent, RuleListener, SipEvent, SipListener, Subscribers};
use crate::core::metadata::{MetadataAssignment, MetadataError, MetadataResolver};
use crate::core::sip_preview::{SipPreview, SipSnapshot};
use crate::core::visitors::{SipPerFileVisitor, SipPerFolderVisitor, TreeVisitor, VisitorContext};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Identifier of a rule, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(pub u32);

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule-{}", self.0)
    }
}

static NEXT_RULE_ID: AtomicU32 = AtomicU32::new(1);

fn next_rule_id() -> RuleId {
    RuleId(NEXT_RULE_ID.fetch_add(1, Ordering::SeqCst))
}

/*
 * How the selection maps into SIP containers. `SingleFile` gives every
 * reachable regular file its own SIP; `SingleFolder` turns every selected
 * folder into one SIP holding all descendant files.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationType {
    SingleFile,
    SingleFolder,
}

/// One item of the user's selection, as reported by the source tree.
#[derive(Debug, Clone)]
pub struct SelectedItem {
    pub path: PathBuf,
    pub is_dir: bool,
    pub ignored: bool,
}

#[derive(Debug)]
pub enum RuleError {
    Metadata(MetadataError),
}

impl From<MetadataError> for RuleError {
    fn from(err: MetadataError) -> Self {
        RuleError::Metadata(err)
    }
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleError::Metadata(e) => write!(f, "Cannot apply association rule: {e}"),
        }
    }
}

impl std::error::Error for RuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuleError::Metadata(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

/*
 * Normalizes a selection before rule application: ignored items and paths
 * that no longer exist are dropped, duplicates collapse, and an item that is
 * a descendant of a selected folder is shadowed by that folder (this is what
 * prevents double-counting when a file and one of its ancestors are both
 * selected). A selection that normalizes to nothing yields a no-op rule.
 */
pub fn normalize_selection(selection: &[SelectedItem]) -> Vec<SelectedItem> {
    let mut items: Vec<SelectedItem> = selection
        .iter()
        .filter(|item| {
            if item.ignored {
                log::debug!("Rule: dropping ignored selection item {:?}", item.path);
                return false;
            }
            if !item.path.exists() {
                log::debug!("Rule: dropping vanished selection item {:?}", item.path);
                return false;
            }
            true
        })
        .cloned()
        .collect();

    items.sort_by(|a, b| a.path.cmp(&b.path));
    items.dedup_by(|a, b| a.path == b.path);

    let mut kept: Vec<SelectedItem> = Vec::new();
    for item in items {
        let shadowed = kept
            .iter()
            .any(|k| k.is_dir && item.path != k.path && item.path.starts_with(&k.path));
        if shadowed {
            log::debug!("Rule: dropping shadowed selection item {:?}", item.path);
        } else {
            kept.push(item);
        }
    }
    kept
}

pub struct Rule {
    id: RuleId,
    association: AssociationType,
    metadata: MetadataAssignment,
    selection: Vec<SelectedItem>,
    sips: Arc<Mutex<Vec<SipPreview>>>,
    rule_subscribers: Arc<Subscribers<dyn RuleListener>>,
    sip_subscribers: Arc<Subscribers<dyn SipListener>>,
}

impl Rule {
    pub fn new(
        selection: &[SelectedItem],
        association: AssociationType,
        metadata: MetadataAssignment,
    ) -> Self {
        Rule {
            id: next_rule_id(),
            association,
            metadata,
            selection: normalize_selection(selection),
            sips: Arc::new(Mutex::new(Vec::new())),
            rule_subscribers: Arc::new(Subscribers::new()),
            sip_subscribers: Arc::new(Subscribers::new()),
        }
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn association(&self) -> AssociationType {
        self.association
    }

    pub fn metadata_assignment(&self) -> &MetadataAssignment {
        &self.metadata
    }

    pub fn selection(&self) -> &[SelectedItem] {
        &self.selection
    }

    pub fn source_paths(&self) -> Vec<PathBuf> {
        self.selection.iter().map(|item| item.path.clone()).collect()
    }

    pub fn add_rule_listener(&self, listener: Arc<dyn RuleListener>) {
        self.rule_subscribers.attach(listener);
    }

    pub fn add_sip_listener(&self, listener: Arc<dyn SipListener>) {
        self.sip_subscribers.attach(listener);
    }

    fn lock_sips(&self) -> MutexGuard<'_, Vec<SipPreview>> {
        match self.sips.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn sip_count(&self) -> usize {
        self.lock_sips().len()
    }

    pub fn sip_snapshots(&self) -> Vec<SipSnapshot> {
        self.lock_sips().iter().map(|sip| sip.snapshot()).collect()
    }

    /// Broadcasts the rule's creation to its listeners.
    pub fn announce_created(&self) {
        let event = RuleEvent {
            kind: EventKind::Created,
            rule: self.id,
            sip_count: 0,
            finished: false,
        };
        self.rule_subscribers.notify(|l| l.on_rule_event(&event));
    }

    /*
     * Validates the metadata assignment and builds the visitor for this
     * rule's association type. Nothing is registered anywhere on failure, so
     * an aborted rule leaves no visitor or observer behind. A selection that
     * normalized to nothing still yields a (no-op) visitor.
     */
    pub fn apply(&self, config: &dyn ConfigManagerOperations) -> Result<Box<dyn TreeVisitor>> {
        let resolver = MetadataResolver::prepare(self.metadata.clone(), config)?;
        let context = VisitorContext::new(
            self.id,
            self.selection.clone(),
            resolver,
            Arc::clone(&self.sips),
            Arc::clone(&self.sip_subscribers),
            Arc::clone(&self.rule_subscribers),
        );

        log::debug!(
            "Rule: {} applies {:?} over {} selected item(s)",
            self.id,
            self.association,
            self.selection.len()
        );
        let visitor: Box<dyn TreeVisitor> = match self.association {
            AssociationType::SingleFile => Box::new(SipPerFileVisitor::new(context)),
            AssociationType::SingleFolder => Box::new(SipPerFolderVisitor::new(context)),
        };
        Ok(visitor)
    }

    /*
     * Removal cascade: flags every produced SIP as removed and broadcasts one
     * Removed notification for each, followed by a Removed event for the rule
     * itself. SIPs already flagged are skipped, so re-running the cascade
     * cannot duplicate notifications. Callers cancel the rule's walk first.
     */
    pub fn cascade_removed(&self) -> usize {
        let snapshots: Vec<SipSnapshot> = {
            let mut sips = self.lock_sips();
            sips.iter_mut()
                .filter_map(|sip| {
                    if sip.mark_removed() {
                        Some(sip.snapshot())
                    } else {
                        None
                    }
                })
                .collect()
        };

        for snapshot in &snapshots {
            let event = SipEvent {
                kind: EventKind::Removed,
                rule: self.id,
                sip: snapshot.clone(),
            };
            self.sip_subscribers.notify(|l| l.on_sip_event(&event));
        }

        let event = RuleEvent {
            kind: EventKind::Removed,
            rule: self.id,
            sip_count: snapshots.len(),
            finished: false,
        };
        self.rule_subscribers.notify(|l| l.on_rule_event(&event));

        log::info!(
            "Rule: {} removed, cascaded {} SIP removal(s)",
            self.id,
            snapshots.len()
        );
        snapshots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CoreConfigManager;
    use crate::core::walker::{CancelFlag, walk_tree};
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn item(path: PathBuf, is_dir: bool) -> SelectedItem {
        SelectedItem {
            path,
            is_dir,
            ignored: false,
        }
    }

    #[test]
    fn test_normalize_drops_descendants_of_selected_folders() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let file = sub.join("a.txt");
        fs::write(&file, "x").unwrap();

        let selection = vec![
            item(dir.path().to_path_buf(), true),
            item(file.clone(), false),
            item(sub.clone(), true),
        ];
        let normalized = normalize_selection(&selection);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].path, dir.path());
    }

    #[test]
    fn test_normalize_drops_ignored_and_vanished_items() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "x").unwrap();

        let selection = vec![
            SelectedItem {
                path: file.clone(),
                is_dir: false,
                ignored: true,
            },
            item(dir.path().join("gone.txt"), false),
        ];
        assert!(normalize_selection(&selection).is_empty());
    }

    #[test]
    fn test_sibling_with_shared_name_prefix_is_not_shadowed() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("ab")).unwrap();
        fs::create_dir(dir.path().join("abc")).unwrap();

        let selection = vec![
            item(dir.path().join("ab"), true),
            item(dir.path().join("abc"), true),
        ];
        assert_eq!(normalize_selection(&selection).len(), 2);
    }

    #[test]
    fn test_apply_with_unknown_template_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let config = CoreConfigManager::with_storage_dir(None);

        let rule = Rule::new(
            &[item(dir.path().to_path_buf(), true)],
            AssociationType::SingleFile,
            MetadataAssignment::Template {
                name: "nope".to_string(),
                version: "1".to_string(),
            },
        );
        let result = rule.apply(&config);
        assert!(matches!(
            result,
            Err(RuleError::Metadata(MetadataError::UnknownTemplate { .. }))
        ));
        assert_eq!(rule.sip_count(), 0);
    }

    #[test]
    fn test_single_file_rule_counts_reachable_files_without_duplicates() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::write(sub.join("b.txt"), "x").unwrap();
        fs::write(sub.join("c.txt"), "x").unwrap();

        let config = CoreConfigManager::with_storage_dir(None);
        // The selected file under sub/ is also reachable via the selected
        // root; it must not produce a second SIP.
        let rule = Rule::new(
            &[
                item(dir.path().to_path_buf(), true),
                item(sub.join("b.txt"), false),
            ],
            AssociationType::SingleFile,
            MetadataAssignment::None,
        );
        let mut visitor = rule.apply(&config).unwrap();

        visitor.start_walk();
        walk_tree(&rule.source_paths(), visitor.as_mut(), &CancelFlag::new());
        visitor.end_walk(false);

        assert_eq!(rule.sip_count(), 3);
        assert!(rule.sip_snapshots().iter().all(|sip| sip.complete));
    }

    #[test]
    fn test_cascade_removed_fires_exactly_once_per_sip() {
        struct RemovalCounter {
            removed: AtomicUsize,
        }
        impl SipListener for RemovalCounter {
            fn on_sip_event(&self, event: &SipEvent) {
                if event.kind == EventKind::Removed {
                    self.removed.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::write(dir.path().join("b.txt"), "x").unwrap();

        let config = CoreConfigManager::with_storage_dir(None);
        let rule = Rule::new(
            &[item(dir.path().to_path_buf(), true)],
            AssociationType::SingleFile,
            MetadataAssignment::None,
        );
        let counter = Arc::new(RemovalCounter {
            removed: AtomicUsize::new(0),
        });
        rule.add_sip_listener(counter.clone());

        let mut visitor = rule.apply(&config).unwrap();
        visitor.start_walk();
        walk_tree(&rule.source_paths(), visitor.as_mut(), &CancelFlag::new());
        visitor.end_walk(false);
        assert_eq!(rule.sip_count(), 2);

        assert_eq!(rule.cascade_removed(), 2);
        assert_eq!(counter.removed.load(Ordering::SeqCst), 2);

        // A second cascade must not re-notify.
        assert_eq!(rule.cascade_removed(), 0);
        assert_eq!(counter.removed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_selection_is_a_noop_rule() {
        let config = CoreConfigManager::with_storage_dir(None);
        let rule = Rule::new(&[], AssociationType::SingleFolder, MetadataAssignment::None);
        let mut visitor = rule.apply(&config).unwrap();
        visitor.start_walk();
        walk_tree(&rule.source_paths(), visitor.as_mut(), &CancelFlag::new());
        visitor.end_walk(false);
        assert_eq!(rule.sip_count(), 0);
    }
}
