use std::collections::HashSet;

use crate::automation::WindowAutomation;
use crate::protocol::WindowCandidate;

pub const TERMINAL_PREFIX: &str = "[Terminal]";
pub const EDITOR_PREFIX: &str = "[VSCode]";

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Title substring that marks an agent window.
    pub title_keyword: String,
    /// Window classes of standalone terminals.
    pub terminal_classes: Vec<String>,
    /// Window class of the editor that can host the agent.
    pub editor_class: String,
    /// Title fragment the editor window must also carry.
    pub editor_title: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            title_keyword: "claude".to_string(),
            terminal_classes: vec![
                "ConsoleWindowClass".to_string(),
                "CASCADIA_HOSTING_WINDOW_CLASS".to_string(),
            ],
            editor_class: "Chrome_WidgetWin_1".to_string(),
            editor_title: "Visual Studio Code".to_string(),
        }
    }
}

/// Enumerates candidate agent windows from both sources and merges them.
pub fn scan(automation: &dyn WindowAutomation, config: &DiscoveryConfig) -> Vec<WindowCandidate> {
    let terminals = automation.enumerate_by_class(&config.terminal_classes);
    let titled = automation.enumerate_by_title(&config.title_keyword);
    merge_candidates(terminals, titled, config)
}

/// Terminals first, then editor windows running the agent; duplicates by
/// handle keep their first occurrence.
pub fn merge_candidates(
    terminals: Vec<WindowCandidate>,
    titled: Vec<WindowCandidate>,
    config: &DiscoveryConfig,
) -> Vec<WindowCandidate> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for mut window in terminals {
        if !seen.insert(window.handle) {
            continue;
        }
        window.title = if window.title.is_empty() {
            format!("{TERMINAL_PREFIX} (No Title)")
        } else {
            format!("{TERMINAL_PREFIX} {}", window.title)
        };
        merged.push(window);
    }

    let editors = titled.into_iter().filter(|window| {
        window.class_name == config.editor_class && window.title.contains(&config.editor_title)
    });
    for mut window in editors {
        if !seen.insert(window.handle) {
            continue;
        }
        window.title = format!("{EDITOR_PREFIX} {}", window.title);
        merged.push(window);
    }

    merged
}
