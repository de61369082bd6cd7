//! Boundary contract for the OS window-automation adapter.
//!
//! Implementations are synchronous and may block; the coordinator always
//! calls them through `spawn_blocking`.

use thiserror::Error;

use crate::protocol::{WindowCandidate, WindowHandle};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AutomationError {
    #[error("window {0} is not valid")]
    InvalidWindow(WindowHandle),
    #[error("text injection failed: {0}")]
    InjectionFailed(String),
    #[error("window automation is not available on this host")]
    Unavailable,
    #[error("automation task failed: {0}")]
    TaskFailed(String),
}

pub trait WindowAutomation: Send + Sync + std::fmt::Debug + 'static {
    /// Visible windows whose title contains `keyword`, case-insensitively.
    fn enumerate_by_title(&self, keyword: &str) -> Vec<WindowCandidate>;

    /// Visible windows whose class name is one of `class_names`.
    fn enumerate_by_class(&self, class_names: &[String]) -> Vec<WindowCandidate>;

    fn is_valid(&self, handle: WindowHandle) -> bool;

    fn title(&self, handle: WindowHandle) -> String;

    /// Focuses `handle` and types `text` into it followed by Enter.
    fn send_text(&self, handle: WindowHandle, text: &str) -> Result<(), AutomationError>;
}

/// Adapter for hosts without a desktop session: sees no windows and rejects
/// every injection. Handles reported by the agent are still tracked.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessAutomation;

impl WindowAutomation for HeadlessAutomation {
    fn enumerate_by_title(&self, _keyword: &str) -> Vec<WindowCandidate> {
        Vec::new()
    }

    fn enumerate_by_class(&self, _class_names: &[String]) -> Vec<WindowCandidate> {
        Vec::new()
    }

    fn is_valid(&self, _handle: WindowHandle) -> bool {
        false
    }

    fn title(&self, _handle: WindowHandle) -> String {
        String::new()
    }

    fn send_text(&self, _handle: WindowHandle, _text: &str) -> Result<(), AutomationError> {
        Err(AutomationError::Unavailable)
    }
}
