/*
 * Asynchronous filesystem traversal. Two surfaces live here:
 *
 * - incremental directory paging for the browsable source tree (`load_more`),
 *   which exposes a directory with N children as ceil(N / page_size) stable
 *   batches instead of all at once, and
 * - the recursive walk that drives a rule's `TreeVisitor` over the selected
 *   subtrees (`start` / `walk_tree`).
 *
 * Both run on worker threads and report back through completion tokens.
 * Per-entry I/O failures are skipped and logged; they never abort a walk. A
 * fully unreadable root simply yields an empty subtree.
 */
use crate::core::source_tree::{NodeId, PageEntry, SourceTree};
use crate::core::visitors::TreeVisitor;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use walkdir::WalkDir;

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Cooperative cancellation flag, polled by workers between entries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/*
 * One-shot completion signal shared between a worker and its callers. Callers
 * may poll (`is_complete`), block (`wait`) or block with a deadline
 * (`wait_timeout`); production UI code polls, tests legitimately block.
 */
#[derive(Debug, Clone)]
pub struct CompletionToken {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl CompletionToken {
    pub fn new() -> Self {
        CompletionToken {
            state: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn complete(&self) {
        let (done, signal) = &*self.state;
        match done.lock() {
            Ok(mut guard) => *guard = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        signal.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        let (done, _) = &*self.state;
        match done.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn wait(&self) {
        let (done, signal) = &*self.state;
        let mut guard = match done.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*guard {
            guard = match signal.wait(guard) {
                Ok(next) => next,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Returns true if completion happened before the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (done, signal) = &*self.state;
        let mut guard = match done.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard {
            return true;
        }
        let (next, result) = match signal.wait_timeout(guard, timeout) {
            Ok(pair) => pair,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard = next;
        let _ = result;
        *guard
    }
}

impl Default for CompletionToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on an asynchronous walk: cancel it, poll it, or wait for it.
#[derive(Debug, Clone)]
pub struct WalkHandle {
    cancel: CancelFlag,
    done: CompletionToken,
}

impl WalkHandle {
    pub fn new(cancel: CancelFlag, done: CompletionToken) -> Self {
        WalkHandle { cancel, done }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_complete()
    }

    pub fn completion(&self) -> &CompletionToken {
        &self.done
    }
}

/*
 * Walks every root depth-first and feeds the visitor. Directory entries are
 * reported in filesystem order, files and directories interleaved as the OS
 * returns them. The cancellation flag is checked between entries; a cancelled
 * walk returns promptly without visiting further entries.
 */
pub fn walk_tree(roots: &[PathBuf], visitor: &mut dyn TreeVisitor, cancel: &CancelFlag) {
    for root in roots {
        if cancel.is_cancelled() {
            return;
        }
        walk_root(root, visitor, cancel);
    }
}

fn walk_root(root: &Path, visitor: &mut dyn TreeVisitor, cancel: &CancelFlag) {
    // Directories currently open between pre- and post-visit, innermost last.
    let mut open_dirs: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        if cancel.is_cancelled() {
            log::debug!("FileTreeWalker: walk of {root:?} cancelled");
            return;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("FileTreeWalker: skipping unreadable entry under {root:?}: {err}");
                continue;
            }
        };

        while open_dirs.len() > entry.depth() {
            if let Some(dir) = open_dirs.pop() {
                visitor.post_visit_directory(&dir);
            }
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            visitor.pre_visit_directory(entry.path());
            open_dirs.push(entry.path().to_path_buf());
        } else if file_type.is_file() {
            visitor.visit_file(entry.path());
        } else {
            log::debug!(
                "FileTreeWalker: skipping non-regular entry {:?}",
                entry.path()
            );
        }
    }

    while let Some(dir) = open_dirs.pop() {
        visitor.post_visit_directory(&dir);
    }
}

/*
 * Enumerates the direct children of one directory in filesystem-reported
 * order. Unreadable entries are skipped and logged; an unreadable directory
 * yields an empty listing.
 */
fn enumerate_directory(path: &Path) -> VecDeque<PageEntry> {
    let reader = match fs::read_dir(path) {
        Ok(reader) => reader,
        Err(err) => {
            log::warn!("FileTreeWalker: cannot enumerate {path:?}: {err}");
            return VecDeque::new();
        }
    };

    let mut entries = VecDeque::new();
    for entry in reader {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("FileTreeWalker: skipping unreadable entry in {path:?}: {err}");
                continue;
            }
        };
        let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
        entries.push_back(PageEntry {
            path: entry.path(),
            is_dir,
        });
    }
    entries
}

/*
 * The engine's walker front end. Holds the paging state of partially loaded
 * directories: the first page request snapshots the directory listing once,
 * and later pages drain that snapshot, which is what keeps batch order stable
 * across repeated `load_more` calls.
 */
pub struct FileTreeWalker {
    page_size: usize,
    pending: Arc<Mutex<HashMap<NodeId, VecDeque<PageEntry>>>>,
}

impl FileTreeWalker {
    pub fn new(page_size: usize) -> Self {
        FileTreeWalker {
            page_size: page_size.max(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /*
     * Requests the next page of a partially loaded directory. Returns a
     * completion token that is signalled once the page has been delivered to
     * the tree (which happens on a worker thread). Calling this on a Loaded
     * or already-Loading directory is a no-op whose token completes at once.
     */
    pub fn load_more(&self, tree: &Arc<Mutex<SourceTree>>, dir: NodeId) -> CompletionToken {
        let token = CompletionToken::new();

        let dir_path = {
            let mut guard = match tree.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !guard.begin_page_load(dir) {
                log::trace!("FileTreeWalker: load_more on {dir:?} has nothing to do");
                token.complete();
                return token;
            }
            guard.node(dir).path.clone()
        };

        let page_size = self.page_size;
        let pending = Arc::clone(&self.pending);
        let tree = Arc::clone(tree);
        let worker_token = token.clone();
        thread::spawn(move || {
            let mut queue = {
                let mut map = match pending.lock() {
                    Ok(map) => map,
                    Err(poisoned) => poisoned.into_inner(),
                };
                map.remove(&dir)
            }
            .unwrap_or_else(|| enumerate_directory(&dir_path));

            let take = queue.len().min(page_size);
            let page: Vec<PageEntry> = queue.drain(..take).collect();
            let more_remaining = !queue.is_empty();
            if more_remaining {
                let mut map = match pending.lock() {
                    Ok(map) => map,
                    Err(poisoned) => poisoned.into_inner(),
                };
                map.insert(dir, queue);
            }

            log::debug!(
                "FileTreeWalker: delivering {} entries for {dir_path:?} (more: {more_remaining})",
                page.len()
            );
            let mut guard = match tree.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.deliver_page(dir, page, more_remaining);
            drop(guard);
            worker_token.complete();
        });

        token
    }

    /*
     * Starts an asynchronous walk of `roots` driving `visitor` on a worker
     * thread. `blockers` are completion tokens of walks that must finish
     * first (overlapping path sets); the worker waits for them while staying
     * responsive to cancellation. Visitor teardown (`end_walk`) runs even
     * when the walk was cancelled.
     */
    pub fn start(
        roots: Vec<PathBuf>,
        mut visitor: Box<dyn TreeVisitor>,
        blockers: Vec<CompletionToken>,
    ) -> WalkHandle {
        let cancel = CancelFlag::new();
        let done = CompletionToken::new();
        let handle = WalkHandle::new(cancel.clone(), done.clone());

        thread::spawn(move || {
            'blocked: for blocker in &blockers {
                while !blocker.wait_timeout(Duration::from_millis(25)) {
                    if cancel.is_cancelled() {
                        break 'blocked;
                    }
                }
            }

            if !cancel.is_cancelled() {
                visitor.start_walk();
                walk_tree(&roots, visitor.as_mut(), &cancel);
            }
            visitor.end_walk(cancel.is_cancelled());
            done.complete();
        });

        handle
    }
}

impl Default for FileTreeWalker {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source_tree::LoadState;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn create_file(path: &Path) {
        let mut file = File::create(path).expect("test file should be creatable");
        writeln!(file, "{}", path.display()).unwrap();
    }

    fn wait(token: &CompletionToken) {
        assert!(
            token.wait_timeout(Duration::from_secs(10)),
            "worker did not complete in time"
        );
    }

    struct RecordingVisitor {
        files: Vec<PathBuf>,
        pre: Vec<PathBuf>,
        post: Vec<PathBuf>,
        started: bool,
        ended: Option<bool>,
    }

    impl RecordingVisitor {
        fn new() -> Self {
            RecordingVisitor {
                files: Vec::new(),
                pre: Vec::new(),
                post: Vec::new(),
                started: false,
                ended: None,
            }
        }
    }

    impl TreeVisitor for RecordingVisitor {
        fn rule(&self) -> crate::core::rules::RuleId {
            crate::core::rules::RuleId(0)
        }
        fn start_walk(&mut self) {
            self.started = true;
        }
        fn pre_visit_directory(&mut self, path: &Path) {
            self.pre.push(path.to_path_buf());
        }
        fn visit_file(&mut self, path: &Path) {
            self.files.push(path.to_path_buf());
        }
        fn post_visit_directory(&mut self, path: &Path) {
            self.post.push(path.to_path_buf());
        }
        fn end_walk(&mut self, cancelled: bool) {
            self.ended = Some(cancelled);
        }
    }

    #[test]
    fn test_load_more_pages_directory_in_stable_batches() {
        // dir1 with 120 files and page size 50 must page as 50, 100, 120.
        let dir = tempdir().unwrap();
        let dir1 = dir.path().join("dir1");
        fs::create_dir(&dir1).unwrap();
        for i in 0..120 {
            create_file(&dir1.join(format!("file{i}.txt")));
        }

        let tree = Arc::new(Mutex::new(SourceTree::new()));
        let root = tree.lock().unwrap().add_root(dir1, true);
        let walker = FileTreeWalker::new(50);

        let mut seen_orders: Vec<Vec<PathBuf>> = Vec::new();
        for expected in [50usize, 100, 120] {
            wait(&walker.load_more(&tree, root));
            let guard = tree.lock().unwrap();
            let delivered = guard.delivered_children(root);
            assert_eq!(delivered.len(), expected);
            assert!(delivered.iter().all(|id| guard.node(*id).is_file()));
            seen_orders.push(
                delivered
                    .iter()
                    .map(|id| guard.node(*id).path.clone())
                    .collect(),
            );
        }

        // Later batches never re-shuffle already-delivered entries.
        assert_eq!(seen_orders[1][..50], seen_orders[0][..]);
        assert_eq!(seen_orders[2][..100], seen_orders[1][..]);

        let guard = tree.lock().unwrap();
        assert_eq!(guard.load_state(root), Some(LoadState::Loaded));
        assert!(!guard.has_load_more(root));

        // All 120 distinct files were delivered exactly once.
        let mut unique: Vec<_> = seen_orders[2].clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 120);
    }

    #[test]
    fn test_load_more_interleaved_types_and_counts() {
        // dir3 with 70 files and 70 subdirectories: after full expansion the
        // parent reports exactly 70 of each.
        let dir = tempdir().unwrap();
        let dir3 = dir.path().join("dir3");
        fs::create_dir(&dir3).unwrap();
        for i in 0..70 {
            create_file(&dir3.join(format!("file{i}.txt")));
            fs::create_dir(dir3.join(format!("dir{i}"))).unwrap();
        }

        let tree = Arc::new(Mutex::new(SourceTree::new()));
        let root = tree.lock().unwrap().add_root(dir3, true);
        let walker = FileTreeWalker::new(50);

        wait(&walker.load_more(&tree, root));
        assert_eq!(tree.lock().unwrap().delivered_children(root).len(), 50);
        wait(&walker.load_more(&tree, root));
        assert_eq!(tree.lock().unwrap().delivered_children(root).len(), 100);
        wait(&walker.load_more(&tree, root));

        let guard = tree.lock().unwrap();
        assert_eq!(guard.load_state(root), Some(LoadState::Loaded));
        assert_eq!(guard.count_children_by_type(root), (70, 70));
    }

    #[test]
    fn test_load_more_on_loaded_directory_completes_immediately() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty");
        fs::create_dir(&empty).unwrap();

        let tree = Arc::new(Mutex::new(SourceTree::new()));
        let root = tree.lock().unwrap().add_root(empty, true);
        let walker = FileTreeWalker::new(50);

        wait(&walker.load_more(&tree, root));
        assert_eq!(tree.lock().unwrap().load_state(root), Some(LoadState::Loaded));

        let token = walker.load_more(&tree, root);
        assert!(token.is_complete(), "no-op load_more completes synchronously");
    }

    #[test]
    fn test_unreadable_root_yields_empty_subtree() {
        let tree = Arc::new(Mutex::new(SourceTree::new()));
        let root = tree
            .lock()
            .unwrap()
            .add_root(PathBuf::from("/definitely/not/a/real/path"), true);
        let walker = FileTreeWalker::new(50);

        wait(&walker.load_more(&tree, root));
        let guard = tree.lock().unwrap();
        assert_eq!(guard.load_state(root), Some(LoadState::Loaded));
        assert!(guard.delivered_children(root).is_empty());
    }

    #[test]
    fn test_walk_tree_reports_files_and_directory_boundaries() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        create_file(&root.join("a.txt"));
        create_file(&root.join("sub").join("b.txt"));

        let mut visitor = RecordingVisitor::new();
        walk_tree(
            &[root.clone()],
            &mut visitor,
            &CancelFlag::new(),
        );

        assert_eq!(visitor.files.len(), 2);
        assert!(visitor.pre.contains(&root));
        assert!(visitor.pre.contains(&root.join("sub")));
        // Every opened directory was closed again, innermost first.
        assert_eq!(visitor.post.len(), visitor.pre.len());
        assert_eq!(visitor.post.last(), Some(&root));
    }

    #[test]
    fn test_walk_tree_skips_unreadable_roots() {
        let dir = tempdir().unwrap();
        create_file(&dir.path().join("real.txt"));

        let mut visitor = RecordingVisitor::new();
        walk_tree(
            &[
                PathBuf::from("/definitely/not/a/real/path"),
                dir.path().to_path_buf(),
            ],
            &mut visitor,
            &CancelFlag::new(),
        );

        assert_eq!(visitor.files.len(), 1, "the readable root is still walked");
    }

    #[test]
    fn test_start_runs_teardown_even_when_cancelled() {
        let dir = tempdir().unwrap();
        for i in 0..50 {
            create_file(&dir.path().join(format!("file{i}.txt")));
        }

        let visitor = Box::new(RecordingVisitor::new());
        // A blocker that never completes on its own keeps the walk queued, so
        // cancellation is guaranteed to land before any file is visited.
        let blocker = CompletionToken::new();
        let handle = FileTreeWalker::start(
            vec![dir.path().to_path_buf()],
            visitor,
            vec![blocker.clone()],
        );
        handle.cancel();
        wait(handle.completion());
        assert!(handle.is_finished());
    }

    #[test]
    fn test_start_waits_for_blockers() {
        let dir = tempdir().unwrap();
        create_file(&dir.path().join("a.txt"));

        let blocker = CompletionToken::new();
        let handle = FileTreeWalker::start(
            vec![dir.path().to_path_buf()],
            Box::new(RecordingVisitor::new()),
            vec![blocker.clone()],
        );

        assert!(
            !handle.completion().wait_timeout(Duration::from_millis(100)),
            "walk must not finish while its blocker is pending"
        );
        blocker.complete();
        wait(handle.completion());
    }
}
