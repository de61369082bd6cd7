//! In-memory window automation for tests and local demos.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::automation::{AutomationError, WindowAutomation};
use crate::protocol::{WindowCandidate, WindowHandle};

#[derive(Debug, Default)]
pub struct ScriptedAutomation {
    windows: Mutex<Vec<WindowCandidate>>,
    sent: Mutex<Vec<(WindowHandle, String)>>,
    fail_injection: Mutex<Option<String>>,
}

impl ScriptedAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_windows(windows: Vec<WindowCandidate>) -> Self {
        let automation = Self::new();
        automation.set_windows(windows);
        automation
    }

    pub fn add_window(&self, handle: WindowHandle, title: &str, class_name: &str) {
        lock(&self.windows).push(WindowCandidate {
            handle,
            title: title.to_string(),
            class_name: class_name.to_string(),
        });
    }

    pub fn set_windows(&self, windows: Vec<WindowCandidate>) {
        *lock(&self.windows) = windows;
    }

    pub fn close_window(&self, handle: WindowHandle) {
        lock(&self.windows).retain(|window| window.handle != handle);
    }

    /// Makes every subsequent `send_text` fail with `message`.
    pub fn fail_injection_with(&self, message: &str) {
        *lock(&self.fail_injection) = Some(message.to_string());
    }

    pub fn sent(&self) -> Vec<(WindowHandle, String)> {
        lock(&self.sent).clone()
    }
}

impl WindowAutomation for ScriptedAutomation {
    fn enumerate_by_title(&self, keyword: &str) -> Vec<WindowCandidate> {
        let keyword = keyword.to_lowercase();
        lock(&self.windows)
            .iter()
            .filter(|window| window.title.to_lowercase().contains(&keyword))
            .cloned()
            .collect()
    }

    fn enumerate_by_class(&self, class_names: &[String]) -> Vec<WindowCandidate> {
        lock(&self.windows)
            .iter()
            .filter(|window| class_names.iter().any(|name| *name == window.class_name))
            .cloned()
            .collect()
    }

    fn is_valid(&self, handle: WindowHandle) -> bool {
        lock(&self.windows)
            .iter()
            .any(|window| window.handle == handle)
    }

    fn title(&self, handle: WindowHandle) -> String {
        lock(&self.windows)
            .iter()
            .find(|window| window.handle == handle)
            .map(|window| window.title.clone())
            .unwrap_or_default()
    }

    fn send_text(&self, handle: WindowHandle, text: &str) -> Result<(), AutomationError> {
        if !self.is_valid(handle) {
            return Err(AutomationError::InvalidWindow(handle));
        }
        if let Some(message) = lock(&self.fail_injection).clone() {
            return Err(AutomationError::InjectionFailed(message));
        }
        lock(&self.sent).push((handle, text.to_string()));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
