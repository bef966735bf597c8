/*
 * The core of the assembly engine: the browsable source tree, the paging and
 * walking layer, association rules with their visitors, the SIP preview
 * model, the observer/event layer, and the ambient services (configuration,
 * localization, logging) everything above is wired through. Nothing in here
 * knows about widgets; UI surfaces talk to the core through the re-exported
 * traits and the notice queue in `app_logic`.
 */
pub mod config;
pub mod events;
pub mod localization;
pub mod logging;
pub mod metadata;
pub mod path_utils;
pub mod rules;
pub mod sip_preview;
pub mod source_tree;
pub mod visitor_stack;
pub mod visitors;
pub mod walker;

// Re-export key structures and enums
pub use source_tree::{
    LoadState, Marking, NodeId, NodeKind, PageEntry, PlaceholderKind, SourceNode, SourceTree,
};

// Re-export walking and completion primitives
pub use walker::{CancelFlag, CompletionToken, FileTreeWalker, WalkHandle, walk_tree};

// Re-export the rule engine surface
pub use events::{EventKind, RuleEvent, RuleListener, SipEvent, SipListener};
pub use metadata::{MetadataAssignment, MetadataError, MetadataResolver};
pub use rules::{AssociationType, Rule, RuleError, RuleId, SelectedItem};
pub use sip_preview::{MetadataDocument, MetadataStatus, SipPreview, SipSnapshot};
pub use visitor_stack::VisitorStack;
pub use visitors::TreeVisitor;

// Re-export ambient services
pub use config::{ConfigError, ConfigManagerOperations, CoreConfigManager};
pub use localization::{BundleLocalizer, LocalizationError, LocalizerOperations};
pub use logging::init_logging;
