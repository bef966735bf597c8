/*
 * Tree visitors: the stateful consumers that turn filesystem-walk callbacks
 * into SIP preview mutations for one active rule. A visitor is created when
 * a rule is applied, driven by the walker until the walk over the rule's
 * selection completes, and then retired.
 *
 * All SIP mutation happens here, on the walker thread that owns the visitor;
 * notifications go out as snapshots after each mutation settles, never while
 * the preview is mid-change.
 */
use crate::core::events::{EventKind, RuleEvent, RuleListener, SipEvent, SipListener, Subscribers};
use crate::core::metadata::MetadataResolver;
use crate::core::rules::{RuleId, SelectedItem};
use crate::core::sip_preview::{SipPreview, SipSnapshot};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/*
 * Consumer of filesystem walk events. `pre_visit_directory` and
 * `post_visit_directory` bracket each directory; `end_walk` always runs,
 * with `cancelled` telling the visitor whether the walk ran to completion.
 */
pub trait TreeVisitor: Send {
    fn rule(&self) -> RuleId;
    fn start_walk(&mut self);
    fn pre_visit_directory(&mut self, path: &Path);
    fn visit_file(&mut self, path: &Path);
    fn post_visit_directory(&mut self, path: &Path);
    fn end_walk(&mut self, cancelled: bool);
}

/*
 * Everything a visitor needs to do its work: the normalized selection (its
 * walk roots), the prepared metadata resolver, the rule's SIP store, and the
 * subscriber lists to broadcast on.
 */
pub struct VisitorContext {
    rule: RuleId,
    roots: Vec<SelectedItem>,
    root_paths: HashSet<PathBuf>,
    resolver: MetadataResolver,
    sips: Arc<Mutex<Vec<SipPreview>>>,
    sip_subscribers: Arc<Subscribers<dyn SipListener>>,
    rule_subscribers: Arc<Subscribers<dyn RuleListener>>,
}

impl VisitorContext {
    pub fn new(
        rule: RuleId,
        roots: Vec<SelectedItem>,
        resolver: MetadataResolver,
        sips: Arc<Mutex<Vec<SipPreview>>>,
        sip_subscribers: Arc<Subscribers<dyn SipListener>>,
        rule_subscribers: Arc<Subscribers<dyn RuleListener>>,
    ) -> Self {
        let root_paths = roots.iter().map(|item| item.path.clone()).collect();
        VisitorContext {
            rule,
            roots,
            root_paths,
            resolver,
            sips,
            sip_subscribers,
            rule_subscribers,
        }
    }

    pub fn roots(&self) -> &[SelectedItem] {
        &self.roots
    }

    fn is_root(&self, path: &Path) -> bool {
        self.root_paths.contains(path)
    }

    fn lock_sips(&self) -> MutexGuard<'_, Vec<SipPreview>> {
        match self.sips.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit_sip(&self, kind: EventKind, snapshot: SipSnapshot) {
        let event = SipEvent {
            kind,
            rule: self.rule,
            sip: snapshot,
        };
        self.sip_subscribers.notify(|l| l.on_sip_event(&event));
    }

    fn emit_rule_finished(&self, sip_count: usize) {
        let event = RuleEvent {
            kind: EventKind::Updated,
            rule: self.rule,
            sip_count,
            finished: true,
        };
        self.rule_subscribers.notify(|l| l.on_rule_event(&event));
    }

    /// Stores a freshly built preview and broadcasts its creation. Returns
    /// the preview's index in the rule's SIP store.
    fn push_sip(&self, sip: SipPreview) -> usize {
        let (index, snapshot) = {
            let mut sips = self.lock_sips();
            let snapshot = sip.snapshot();
            sips.push(sip);
            (sips.len() - 1, snapshot)
        };
        self.emit_sip(EventKind::Created, snapshot);
        index
    }

    fn add_member(&self, index: usize, path: PathBuf) {
        let snapshot = {
            let mut sips = self.lock_sips();
            if !sips[index].add_member(path) {
                return;
            }
            sips[index].snapshot()
        };
        self.emit_sip(EventKind::Updated, snapshot);
    }

    /*
     * Marks every preview complete and broadcasts the final state. Runs only
     * for walks that were not cancelled; a cancelled rule either disappears
     * through the removal cascade or stays visibly unfinished.
     */
    fn finish(&self) {
        let snapshots: Vec<SipSnapshot> = {
            let mut sips = self.lock_sips();
            sips.iter_mut()
                .filter_map(|sip| {
                    if sip.is_complete() {
                        None
                    } else {
                        sip.mark_complete();
                        Some(sip.snapshot())
                    }
                })
                .collect()
        };
        for snapshot in snapshots {
            self.emit_sip(EventKind::Updated, snapshot);
        }
        self.emit_rule_finished(self.lock_sips().len());
    }

    fn build_sip(&self, content_root: &Path, walk_root: &Path) -> SipPreview {
        let title = content_root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| content_root.to_string_lossy().into_owned());
        let mut sip = SipPreview::new(title, content_root.to_path_buf());
        sip.set_metadata(self.resolver.resolve_for(content_root, walk_root));
        sip
    }
}

/*
 * One SIP per regular file reachable from the selection. Selected folders
 * are expanded; a file matching the same-directory metadata pattern feeds
 * its neighbours instead of becoming a SIP of its own.
 */
pub struct SipPerFileVisitor {
    context: VisitorContext,
    current_root: Option<PathBuf>,
}

impl SipPerFileVisitor {
    pub fn new(context: VisitorContext) -> Self {
        SipPerFileVisitor {
            context,
            current_root: None,
        }
    }
}

impl TreeVisitor for SipPerFileVisitor {
    fn rule(&self) -> RuleId {
        self.context.rule
    }

    fn start_walk(&mut self) {
        log::debug!(
            "SipPerFileVisitor: {} starting over {} root(s)",
            self.context.rule,
            self.context.roots.len()
        );
    }

    fn pre_visit_directory(&mut self, path: &Path) {
        if self.context.is_root(path) {
            self.current_root = Some(path.to_path_buf());
        }
    }

    fn visit_file(&mut self, path: &Path) {
        if self.context.resolver.is_metadata_file(path) {
            log::trace!("SipPerFileVisitor: {path:?} is a metadata file, not a SIP");
            return;
        }

        let walk_root = if self.context.is_root(path) {
            path.to_path_buf()
        } else {
            match &self.current_root {
                Some(root) => root.clone(),
                None => path.to_path_buf(),
            }
        };

        let mut sip = self.context.build_sip(path, &walk_root);
        sip.add_member(path.to_path_buf());
        self.context.push_sip(sip);
    }

    fn post_visit_directory(&mut self, path: &Path) {
        if self.current_root.as_deref() == Some(path) {
            self.current_root = None;
        }
    }

    fn end_walk(&mut self, cancelled: bool) {
        if cancelled {
            log::debug!("SipPerFileVisitor: {} cancelled", self.context.rule);
            return;
        }
        self.context.finish();
    }
}

/*
 * One SIP per selected folder, containing all descendant files. A selected
 * regular file degrades to a single-member SIP. Under a same-directory
 * metadata assignment, a matching direct child of the SIP folder becomes
 * that SIP's metadata and is excluded from its members.
 */
pub struct SipPerFolderVisitor {
    context: VisitorContext,
    open: Option<OpenFolderSip>,
}

struct OpenFolderSip {
    index: usize,
    root: PathBuf,
}

impl SipPerFolderVisitor {
    pub fn new(context: VisitorContext) -> Self {
        SipPerFolderVisitor {
            context,
            open: None,
        }
    }
}

impl TreeVisitor for SipPerFolderVisitor {
    fn rule(&self) -> RuleId {
        self.context.rule
    }

    fn start_walk(&mut self) {
        log::debug!(
            "SipPerFolderVisitor: {} starting over {} root(s)",
            self.context.rule,
            self.context.roots.len()
        );
    }

    fn pre_visit_directory(&mut self, path: &Path) {
        if !self.context.is_root(path) {
            return;
        }
        let sip = self.context.build_sip(path, path);
        let index = self.context.push_sip(sip);
        self.open = Some(OpenFolderSip {
            index,
            root: path.to_path_buf(),
        });
    }

    fn visit_file(&mut self, path: &Path) {
        if self.context.is_root(path) {
            // A plain file in the selection: it forms its own SIP.
            if self.context.resolver.is_metadata_file(path) {
                return;
            }
            let mut sip = self.context.build_sip(path, path);
            sip.add_member(path.to_path_buf());
            self.context.push_sip(sip);
            return;
        }

        let Some(open) = &self.open else {
            log::debug!("SipPerFolderVisitor: file {path:?} outside any open SIP");
            return;
        };
        let is_direct_child = path.parent() == Some(open.root.as_path());
        if is_direct_child && self.context.resolver.is_metadata_file(path) {
            return;
        }
        self.context.add_member(open.index, path.to_path_buf());
    }

    fn post_visit_directory(&mut self, path: &Path) {
        if self.open.as_ref().is_some_and(|open| open.root == path) {
            self.open = None;
        }
    }

    fn end_walk(&mut self, cancelled: bool) {
        self.open = None;
        if cancelled {
            log::debug!("SipPerFolderVisitor: {} cancelled", self.context.rule);
            return;
        }
        self.context.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CoreConfigManager;
    use crate::core::metadata::{MetadataAssignment, MetadataResolver};
    use crate::core::rules::{AssociationType, Rule};
    use crate::core::sip_preview::MetadataStatus;
    use crate::core::walker::{CancelFlag, walk_tree};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn run_rule(rule: &Rule) {
        let config = CoreConfigManager::with_storage_dir(None);
        let mut visitor = rule.apply(&config).unwrap();
        visitor.start_walk();
        walk_tree(&rule.source_paths(), visitor.as_mut(), &CancelFlag::new());
        visitor.end_walk(false);
    }

    fn selected(path: &Path, is_dir: bool) -> SelectedItem {
        SelectedItem {
            path: path.to_path_buf(),
            is_dir,
            ignored: false,
        }
    }

    #[test]
    fn test_per_file_expands_folders_into_one_sip_each() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::write(sub.join("b.txt"), "x").unwrap();

        let rule = Rule::new(
            &[selected(dir.path(), true)],
            AssociationType::SingleFile,
            MetadataAssignment::None,
        );
        run_rule(&rule);

        let sips = rule.sip_snapshots();
        assert_eq!(sips.len(), 2);
        for sip in &sips {
            assert_eq!(sip.members.len(), 1);
            assert_eq!(sip.members[0], sip.content_root);
            assert!(sip.complete);
            assert_eq!(sip.metadata, MetadataStatus::Absent);
        }
    }

    #[test]
    fn test_per_folder_with_same_directory_metadata_scenario() {
        // A folder holding metadata.xml plus 3 data files must yield one SIP
        // with 3 members and metadata sourced from metadata.xml.
        let dir = tempdir().unwrap();
        let folder = dir.path().join("letters");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("metadata.xml"), "<ead/>").unwrap();
        fs::write(folder.join("scan1.tif"), "x").unwrap();
        fs::write(folder.join("scan2.tif"), "x").unwrap();
        fs::write(folder.join("scan3.tif"), "x").unwrap();

        let rule = Rule::new(
            &[selected(&folder, true)],
            AssociationType::SingleFolder,
            MetadataAssignment::SameDirectory {
                pattern: "metadata.*".to_string(),
            },
        );
        run_rule(&rule);

        let sips = rule.sip_snapshots();
        assert_eq!(sips.len(), 1);
        let sip = &sips[0];
        assert_eq!(sip.title, "letters");
        assert_eq!(sip.members.len(), 3, "metadata file must not be a member");
        assert!(sip.members.iter().all(|m| m != &folder.join("metadata.xml")));
        match &sip.metadata {
            MetadataStatus::Loaded(doc) => {
                assert_eq!(doc.source.as_deref(), Some(folder.join("metadata.xml").as_path()));
                assert_eq!(doc.content, "<ead/>");
            }
            other => panic!("expected loaded metadata, got {other:?}"),
        }
        assert!(sip.complete);
    }

    #[test]
    fn test_per_folder_collects_descendants_recursively() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("fonds");
        fs::create_dir_all(folder.join("series/sub")).unwrap();
        fs::write(folder.join("top.txt"), "x").unwrap();
        fs::write(folder.join("series/mid.txt"), "x").unwrap();
        fs::write(folder.join("series/sub/deep.txt"), "x").unwrap();

        let rule = Rule::new(
            &[selected(&folder, true)],
            AssociationType::SingleFolder,
            MetadataAssignment::None,
        );
        run_rule(&rule);

        let sips = rule.sip_snapshots();
        assert_eq!(sips.len(), 1);
        assert_eq!(sips[0].members.len(), 3);
    }

    #[test]
    fn test_per_folder_selection_of_two_folders_and_a_file() {
        let dir = tempdir().unwrap();
        let one = dir.path().join("one");
        let two = dir.path().join("two");
        fs::create_dir(&one).unwrap();
        fs::create_dir(&two).unwrap();
        fs::write(one.join("a.txt"), "x").unwrap();
        fs::write(two.join("b.txt"), "x").unwrap();
        let loose = dir.path().join("loose.txt");
        fs::write(&loose, "x").unwrap();

        let rule = Rule::new(
            &[selected(&one, true), selected(&two, true), selected(&loose, false)],
            AssociationType::SingleFolder,
            MetadataAssignment::None,
        );
        run_rule(&rule);

        let sips = rule.sip_snapshots();
        assert_eq!(sips.len(), 3);
        let loose_sip = sips
            .iter()
            .find(|sip| sip.content_root == loose)
            .expect("loose file must form its own SIP");
        assert_eq!(loose_sip.members, vec![loose.clone()]);
    }

    #[test]
    fn test_per_file_with_metadata_pattern_skips_metadata_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("metadata.xml"), "<ead/>").unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::write(dir.path().join("b.txt"), "x").unwrap();

        let rule = Rule::new(
            &[selected(dir.path(), true)],
            AssociationType::SingleFile,
            MetadataAssignment::SameDirectory {
                pattern: "metadata.*".to_string(),
            },
        );
        run_rule(&rule);

        let sips = rule.sip_snapshots();
        assert_eq!(sips.len(), 2, "the metadata file is not a SIP");
        for sip in &sips {
            match &sip.metadata {
                MetadataStatus::Loaded(doc) => assert_eq!(doc.content, "<ead/>"),
                other => panic!("expected loaded metadata, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_created_events_match_produced_sips() {
        struct Counter {
            created: AtomicUsize,
            updated: AtomicUsize,
        }
        impl SipListener for Counter {
            fn on_sip_event(&self, event: &SipEvent) {
                match event.kind {
                    EventKind::Created => self.created.fetch_add(1, Ordering::SeqCst),
                    EventKind::Updated => self.updated.fetch_add(1, Ordering::SeqCst),
                    EventKind::Removed => 0,
                };
            }
        }

        let dir = tempdir().unwrap();
        for i in 0..4 {
            fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }

        let rule = Rule::new(
            &[selected(dir.path(), true)],
            AssociationType::SingleFile,
            MetadataAssignment::None,
        );
        let counter = Arc::new(Counter {
            created: AtomicUsize::new(0),
            updated: AtomicUsize::new(0),
        });
        rule.add_sip_listener(counter.clone());
        run_rule(&rule);

        assert_eq!(counter.created.load(Ordering::SeqCst), 4);
        // Each SIP gets at least the completion update.
        assert!(counter.updated.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn test_cancelled_walk_emits_no_completion_events() {
        struct FinishProbe {
            finished: AtomicUsize,
        }
        impl RuleListener for FinishProbe {
            fn on_rule_event(&self, event: &RuleEvent) {
                if event.finished {
                    self.finished.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();

        let rule = Rule::new(
            &[selected(dir.path(), true)],
            AssociationType::SingleFile,
            MetadataAssignment::None,
        );
        let probe = Arc::new(FinishProbe {
            finished: AtomicUsize::new(0),
        });
        rule.add_rule_listener(probe.clone());

        let config = CoreConfigManager::with_storage_dir(None);
        let mut visitor = rule.apply(&config).unwrap();
        visitor.start_walk();
        let cancel = CancelFlag::new();
        cancel.cancel();
        walk_tree(&rule.source_paths(), visitor.as_mut(), &cancel);
        visitor.end_walk(true);

        assert_eq!(rule.sip_count(), 0, "cancelled before any file was visited");
        assert_eq!(probe.finished.load(Ordering::SeqCst), 0);
        assert!(rule.sip_snapshots().iter().all(|sip| !sip.complete));
    }

    #[test]
    fn test_visitor_context_direct_use() {
        // The resolver alone decides what counts as a metadata file.
        let config = CoreConfigManager::with_storage_dir(None);
        let resolver =
            MetadataResolver::prepare(MetadataAssignment::None, &config).unwrap();
        let context = VisitorContext::new(
            RuleId(9999),
            Vec::new(),
            resolver,
            Arc::new(Mutex::new(Vec::new())),
            Arc::new(Subscribers::new()),
            Arc::new(Subscribers::new()),
        );
        assert!(!context.is_root(Path::new("/nope")));
        assert!(context.roots().is_empty());
    }
}
