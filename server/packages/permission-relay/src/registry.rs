//! Tracks which agent session window the relay currently addresses.
//!
//! `Unknown` -> `Targeted` happens directly when a scan yields exactly one
//! candidate; several candidates park the registry in `MultipleCandidates`
//! until the client selects one. A handle reported by the agent itself
//! always wins.

use serde::Serialize;
use utoipa::ToSchema;

use crate::protocol::{WindowCandidate, WindowHandle, WindowTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum TargetState {
    Unknown,
    MultipleCandidates { candidates: Vec<WindowCandidate> },
    Targeted { target: WindowTarget },
}

/// Result of feeding a discovery scan into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing found; state untouched.
    NoCandidates,
    /// Exactly one candidate, now the current target.
    SingleCandidate(WindowTarget),
    /// The client has to pick one.
    MultipleCandidates(Vec<WindowCandidate>),
}

#[derive(Debug)]
pub struct WindowRegistry {
    state: TargetState,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self {
            state: TargetState::Unknown,
        }
    }

    pub fn state(&self) -> &TargetState {
        &self.state
    }

    pub fn current(&self) -> Option<&WindowTarget> {
        match &self.state {
            TargetState::Targeted { target } => Some(target),
            _ => None,
        }
    }

    pub fn current_handle(&self) -> Option<WindowHandle> {
        self.current().map(|target| target.handle)
    }

    /// Unconditionally targets `target`, overriding any discovery state.
    pub fn replace(&mut self, target: WindowTarget) {
        self.state = TargetState::Targeted { target };
    }

    pub fn apply_scan(&mut self, candidates: Vec<WindowCandidate>) -> ScanOutcome {
        match candidates.len() {
            0 => ScanOutcome::NoCandidates,
            1 => {
                let target = candidates[0].to_target();
                self.replace(target.clone());
                ScanOutcome::SingleCandidate(target)
            }
            _ => {
                self.state = TargetState::MultipleCandidates {
                    candidates: candidates.clone(),
                };
                ScanOutcome::MultipleCandidates(candidates)
            }
        }
    }

    /// Handles an explicit client selection. `is_valid` is the automation
    /// adapter's verdict; an invalid handle leaves the state unchanged.
    pub fn select(
        &mut self,
        handle: WindowHandle,
        title: String,
        is_valid: bool,
    ) -> Option<WindowTarget> {
        if !is_valid {
            return None;
        }
        let target = WindowTarget { handle, title };
        self.replace(target.clone());
        Some(target)
    }
}

impl Default for WindowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
