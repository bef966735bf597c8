/*
 * Metadata assignment and resolution for generated SIPs. A rule carries one
 * `MetadataAssignment`; `MetadataResolver::prepare` validates it up front
 * (invalid parameters abort rule creation, before anything is registered)
 * and the per-SIP lookups happen during the walk. A lookup that fails at
 * walk time never aborts anything: the SIP is created and marked
 * metadata-incomplete with a localization key describing why.
 */
use crate::core::config::{ConfigError, ConfigManagerOperations};
use crate::core::sip_preview::{MetadataDocument, MetadataStatus};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};

pub const MISSING_SAME_DIR_KEY: &str = "metadata.same_dir.missing";
pub const MISSING_DIFF_DIR_KEY: &str = "metadata.diff_dir.missing";
pub const UNREADABLE_KEY: &str = "metadata.file.unreadable";

/// The placeholder a template skeleton may carry for the SIP title.
const TITLE_PLACEHOLDER: &str = "{{title}}";

/*
 * How each SIP produced by a rule obtains its metadata.
 * `SameDirectory` matches a filename pattern against the SIP folder's own
 * children; `DiffDirectory` resolves by relative path in a secondary tree;
 * `SingleFile` reuses one document for every SIP; `Template` instantiates a
 * named, versioned skeleton resolved through configuration.
 */
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataAssignment {
    None,
    SingleFile { path: PathBuf },
    SameDirectory { pattern: String },
    DiffDirectory { root: PathBuf },
    Template { name: String, version: String },
}

#[derive(Debug)]
pub enum MetadataError {
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
    DiffRootNotADirectory(PathBuf),
    UnknownTemplate {
        name: String,
        version: String,
    },
    Config(ConfigError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::InvalidPattern { pattern, source } => {
                write!(f, "Invalid metadata filename pattern '{pattern}': {source}")
            }
            MetadataError::DiffRootNotADirectory(path) => {
                write!(f, "Metadata directory {path:?} is not a directory")
            }
            MetadataError::UnknownTemplate { name, version } => {
                write!(f, "Unknown metadata template '{name}' version '{version}'")
            }
            MetadataError::Config(e) => write!(f, "Template configuration error: {e}"),
        }
    }
}

impl std::error::Error for MetadataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MetadataError::InvalidPattern { source, .. } => Some(source),
            MetadataError::Config(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;

fn read_document(path: &Path) -> MetadataStatus {
    match fs::read_to_string(path) {
        Ok(content) => MetadataStatus::Loaded(MetadataDocument {
            source: Some(path.to_path_buf()),
            content,
        }),
        Err(err) => {
            log::warn!("MetadataResolver: cannot read metadata file {path:?}: {err}");
            MetadataStatus::Missing(UNREADABLE_KEY.to_string())
        }
    }
}

/*
 * Validated, walk-ready form of a metadata assignment. Shared sources
 * (single file, template skeleton) are loaded once at prepare time; the
 * per-SIP lookups of the directory-based assignments run on the walker
 * thread against the filesystem.
 */
pub struct MetadataResolver {
    assignment: MetadataAssignment,
    pattern: Option<Pattern>,
    shared: Option<MetadataStatus>,
}

impl MetadataResolver {
    pub fn prepare(
        assignment: MetadataAssignment,
        config: &dyn ConfigManagerOperations,
    ) -> Result<Self> {
        let mut pattern = None;
        let mut shared = None;

        match &assignment {
            MetadataAssignment::None => {}
            MetadataAssignment::SingleFile { path } => {
                // A broken path here degrades every SIP to metadata-incomplete
                // instead of blocking the rule; the user can fix it afterwards.
                shared = Some(read_document(path));
            }
            MetadataAssignment::SameDirectory { pattern: raw } => {
                let compiled = Pattern::new(raw).map_err(|source| {
                    MetadataError::InvalidPattern {
                        pattern: raw.clone(),
                        source,
                    }
                })?;
                pattern = Some(compiled);
            }
            MetadataAssignment::DiffDirectory { root } => {
                if !root.is_dir() {
                    return Err(MetadataError::DiffRootNotADirectory(root.clone()));
                }
            }
            MetadataAssignment::Template { name, version } => {
                let content = match config.template_content(name, version) {
                    Ok(content) => content,
                    Err(ConfigError::UnknownTemplate { name, version }) => {
                        return Err(MetadataError::UnknownTemplate { name, version });
                    }
                    Err(other) => return Err(MetadataError::Config(other)),
                };
                shared = Some(MetadataStatus::Loaded(MetadataDocument {
                    source: None,
                    content,
                }));
            }
        }

        Ok(MetadataResolver {
            assignment,
            pattern,
            shared,
        })
    }

    /*
     * True when `path` is a metadata file under the SameDirectory assignment.
     * Such files feed the SIP of their folder and are excluded from members
     * (and never become SIPs of their own).
     */
    pub fn is_metadata_file(&self, path: &Path) -> bool {
        match (&self.assignment, &self.pattern) {
            (MetadataAssignment::SameDirectory { .. }, Some(pattern)) => path
                .file_name()
                .map(|name| pattern.matches(&name.to_string_lossy()))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Resolves the metadata of one SIP rooted at `sip_root`, produced by a
    /// walk rooted at `walk_root`.
    pub fn resolve_for(&self, sip_root: &Path, walk_root: &Path) -> MetadataStatus {
        match &self.assignment {
            MetadataAssignment::None => MetadataStatus::Absent,
            MetadataAssignment::SingleFile { .. } => {
                self.shared.clone().unwrap_or(MetadataStatus::Absent)
            }
            MetadataAssignment::Template { .. } => match &self.shared {
                Some(MetadataStatus::Loaded(doc)) => {
                    let title = sip_root
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| sip_root.to_string_lossy().into_owned());
                    MetadataStatus::Loaded(MetadataDocument {
                        source: None,
                        content: doc.content.replace(TITLE_PLACEHOLDER, &title),
                    })
                }
                other => other.clone().unwrap_or(MetadataStatus::Absent),
            },
            MetadataAssignment::SameDirectory { .. } => self.resolve_same_directory(sip_root),
            MetadataAssignment::DiffDirectory { root } => {
                Self::resolve_diff_directory(root, sip_root, walk_root)
            }
        }
    }

    fn resolve_same_directory(&self, sip_root: &Path) -> MetadataStatus {
        let dir = if sip_root.is_dir() {
            sip_root.to_path_buf()
        } else {
            match sip_root.parent() {
                Some(parent) => parent.to_path_buf(),
                None => return MetadataStatus::Missing(MISSING_SAME_DIR_KEY.to_string()),
            }
        };

        let Some(pattern) = &self.pattern else {
            return MetadataStatus::Missing(MISSING_SAME_DIR_KEY.to_string());
        };

        let reader = match fs::read_dir(&dir) {
            Ok(reader) => reader,
            Err(err) => {
                log::warn!("MetadataResolver: cannot scan {dir:?} for metadata: {err}");
                return MetadataStatus::Missing(MISSING_SAME_DIR_KEY.to_string());
            }
        };

        // Smallest matching name, so repeated walks resolve the same file.
        let mut best: Option<PathBuf> = None;
        for entry in reader.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !pattern.matches(&name) {
                continue;
            }
            let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let path = entry.path();
            if best.as_ref().is_none_or(|current| path < *current) {
                best = Some(path);
            }
        }

        match best {
            Some(path) => read_document(&path),
            None => MetadataStatus::Missing(MISSING_SAME_DIR_KEY.to_string()),
        }
    }

    /*
     * Relative-path lookup in the diff directory: the SIP's path relative to
     * the walk root's parent is mirrored under the diff root. An exact hit is
     * taken as-is; otherwise any file with the same stem in the mirrored
     * folder matches (the usual case of `folderA/` mapping to `folderA.xml`).
     */
    fn resolve_diff_directory(
        diff_root: &Path,
        sip_root: &Path,
        walk_root: &Path,
    ) -> MetadataStatus {
        let base = walk_root.parent().unwrap_or(walk_root);
        let rel: PathBuf = match sip_root.strip_prefix(base) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => match sip_root.file_name() {
                Some(name) => PathBuf::from(name),
                None => return MetadataStatus::Missing(MISSING_DIFF_DIR_KEY.to_string()),
            },
        };

        let candidate = diff_root.join(&rel);
        if candidate.is_file() {
            return read_document(&candidate);
        }

        let stem = match rel.file_stem() {
            Some(stem) => stem.to_os_string(),
            None => return MetadataStatus::Missing(MISSING_DIFF_DIR_KEY.to_string()),
        };
        let search_dir = candidate.parent().unwrap_or(diff_root);
        let reader = match fs::read_dir(search_dir) {
            Ok(reader) => reader,
            Err(_) => return MetadataStatus::Missing(MISSING_DIFF_DIR_KEY.to_string()),
        };

        let mut best: Option<PathBuf> = None;
        for entry in reader.flatten() {
            let path = entry.path();
            if !path.is_file() || path.file_stem() != Some(stem.as_os_str()) {
                continue;
            }
            if best.as_ref().is_none_or(|current| path < *current) {
                best = Some(path);
            }
        }

        match best {
            Some(path) => read_document(&path),
            None => MetadataStatus::Missing(MISSING_DIFF_DIR_KEY.to_string()),
        }
    }
}
