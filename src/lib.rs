/*
 * Core engine of a SIP assembly application for digital preservation:
 * archivists browse a local filesystem, group files and folders into
 * Submission Information Packages through association rules, attach
 * descriptive metadata from templates, shared files or sibling directories,
 * and watch the assembly progress from multiple UI surfaces.
 *
 * The crate is UI-toolkit free. The windowing shell is an external
 * collaborator: it drives the engine through `app_logic::RuleController`
 * and the source-tree paging API, and consumes results through the observer
 * layer and the bounded notice queue.
 */
pub mod app_logic;
pub mod core;
