/*
 * The application-logic layer: rule lifecycle orchestration
 * (`RuleController`, session state machine) and the bounded notice queue
 * that carries worker results back to the UI-owned loop. Unit tests for the
 * controller are in `controller_tests.rs`.
 */
pub mod controller;
pub mod ui_queue;


pub use controller::{
    ControllerError, RuleController, RuleSession, SessionHandle, SessionState,
    selection_from_tree,
};
pub use ui_queue::{EngineNotice, NoticePublisher, UiQueue, notice_channel};
