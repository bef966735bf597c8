/*
 * The in-memory model of a SIP under construction. A `SipPreview` is created
 * by the visitor of an active rule, mutated incrementally while the walk
 * progresses, marked complete when the visitor finishes, and removable by
 * explicit user action. Only the owning visitor mutates a preview; everything
 * else observes it through `SipSnapshot` values broadcast on the event layer.
 */
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/*
 * A resolved metadata document: where it came from (None for template
 * instantiations, which have no filesystem source of their own) and the
 * document text itself.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub source: Option<PathBuf>,
    pub content: String,
}

/*
 * Metadata state of a SIP preview.
 * `Pending` means the metadata step has not run yet, `Absent` that the rule
 * requested no metadata at all. `Missing` carries a localization key for the
 * failure reason; the SIP itself is still valid, just metadata-incomplete.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataStatus {
    Pending,
    Absent,
    Loaded(MetadataDocument),
    Missing(String),
}

impl MetadataStatus {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, MetadataStatus::Pending | MetadataStatus::Missing(_))
    }
}

/*
 * Immutable copy of a preview's state, sent with every notification so that
 * listeners can reconcile from the payload alone. Serializes to JSON for UI
 * surfaces that persist or diff the assembly state.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SipSnapshot {
    pub id: Uuid,
    pub title: String,
    pub content_root: PathBuf,
    pub members: Vec<PathBuf>,
    pub metadata: MetadataStatus,
    pub complete: bool,
    pub removed: bool,
}

#[derive(Debug)]
pub struct SipPreview {
    id: Uuid,
    title: String,
    /// Root of the originating filesystem subtree this SIP mirrors.
    content_root: PathBuf,
    /// Member files in insertion order. `member_set` guards against duplicates.
    members: Vec<PathBuf>,
    member_set: HashSet<PathBuf>,
    metadata: MetadataStatus,
    complete: bool,
    removed: bool,
}

impl SipPreview {
    pub fn new(title: String, content_root: PathBuf) -> Self {
        SipPreview {
            id: Uuid::new_v4(),
            title,
            content_root,
            members: Vec::new(),
            member_set: HashSet::new(),
            metadata: MetadataStatus::Pending,
            complete: false,
            removed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    pub fn members(&self) -> &[PathBuf] {
        &self.members
    }

    pub fn metadata(&self) -> &MetadataStatus {
        &self.metadata
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Appends a member file. Returns false (and changes nothing) on a duplicate.
    pub fn add_member(&mut self, path: PathBuf) -> bool {
        if self.member_set.contains(&path) {
            log::debug!(
                "SipPreview: ignoring duplicate member {:?} for SIP '{}'",
                path,
                self.title
            );
            return false;
        }
        self.member_set.insert(path.clone());
        self.members.push(path);
        true
    }

    pub fn set_metadata(&mut self, status: MetadataStatus) {
        self.metadata = status;
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /*
     * Flags the preview as removed. Returns true only on the first call, which
     * is what keeps the removal cascade at exactly one REMOVED notification
     * per SIP regardless of how removal was triggered.
     */
    pub fn mark_removed(&mut self) -> bool {
        if self.removed {
            return false;
        }
        self.removed = true;
        true
    }

    pub fn snapshot(&self) -> SipSnapshot {
        SipSnapshot {
            id: self.id,
            title: self.title.clone(),
            content_root: self.content_root.clone(),
            members: self.members.clone(),
            metadata: self.metadata.clone(),
            complete: self.complete,
            removed: self.removed,
        }
    }
}
