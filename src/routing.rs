//! Model router: decides which reasoning tier handles an utterance.
//!
//! A pure classifier over the transcript and recent history: identical
//! inputs always yield the same class, so routing is reproducible in tests
//! without a live reasoning service.

use crate::history::HistoryStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Routing class derived from the transcript and task history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "class", content = "template")]
pub enum RoutingClass {
    /// Matches a known trivial-command pattern.
    Trivial,
    /// Matches a known task template (by name).
    Template(String),
    /// Everything else.
    Novel,
}

impl std::fmt::Display for RoutingClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingClass::Trivial => write!(f, "trivial"),
            RoutingClass::Template(name) => write!(f, "template:{}", name),
            RoutingClass::Novel => write!(f, "novel"),
        }
    }
}

/// A known task shape: matches when every keyword appears in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Template name, recorded in the exchange for audit and tie-breaks.
    pub name: String,
    /// Keywords that must all be present (case-insensitive).
    pub keywords: Vec<String>,
}

impl TaskTemplate {
    /// Build a template from name and keywords.
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn matches(&self, words: &[&str]) -> bool {
        self.keywords
            .iter()
            .all(|keyword| words.iter().any(|w| *w == keyword.to_lowercase()))
    }
}

/// Phrases handled by the fastest tier without real reasoning depth.
const TRIVIAL_COMMANDS: &[&str] = &[
    "status check",
    "what's running",
    "whats running",
    "repeat that",
    "say again",
    "never mind",
    "nevermind",
    "thanks",
    "thank you",
];

/// Single words that are trivial regardless of what follows.
const TRIVIAL_FIRST_WORDS: &[&str] = &["stop", "halt", "cancel", "abort", "quit", "pause"];

fn default_templates() -> Vec<TaskTemplate> {
    vec![
        TaskTemplate::new("create-ticket", &["create", "ticket"]),
        TaskTemplate::new("list-tickets", &["list", "tickets"]),
        TaskTemplate::new("list-projects", &["list", "projects"]),
        TaskTemplate::new("run-tests", &["run", "tests"]),
        TaskTemplate::new("git-status", &["git", "status"]),
        TaskTemplate::new("commit-changes", &["commit"]),
        TaskTemplate::new("deploy", &["deploy"]),
    ]
}

/// Normalize a transcript for matching: lowercase, punctuation stripped.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '\'' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The router: trivial patterns first, then task templates, then novel.
pub struct ModelRouter {
    templates: Vec<TaskTemplate>,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self {
            templates: default_templates(),
        }
    }
}

impl ModelRouter {
    /// Build a router over a custom template table. Declaration order is
    /// the fallback tie-break order.
    pub fn new(templates: Vec<TaskTemplate>) -> Self {
        Self { templates }
    }

    /// Classify a transcript against the trivial table, the template
    /// table, and recent history.
    ///
    /// When more than one template matches, the most recently used one (by
    /// history) wins; with no history hit, the first declared wins.
    pub fn classify(&self, transcript: &str, history: &HistoryStore) -> RoutingClass {
        let normalized = normalize(transcript);
        if normalized.is_empty() {
            return RoutingClass::Novel;
        }

        if TRIVIAL_COMMANDS.contains(&normalized.as_str()) {
            return RoutingClass::Trivial;
        }
        if let Some(first) = normalized.split_whitespace().next() {
            if TRIVIAL_FIRST_WORDS.contains(&first) {
                return RoutingClass::Trivial;
            }
        }

        let words: Vec<&str> = normalized.split_whitespace().collect();
        let matching: Vec<&TaskTemplate> = self
            .templates
            .iter()
            .filter(|t| t.matches(&words))
            .collect();

        match matching.len() {
            0 => RoutingClass::Novel,
            1 => RoutingClass::Template(matching[0].name.clone()),
            _ => {
                let chosen = self.break_tie(&matching, history);
                debug!(
                    candidates = matching.len(),
                    chosen = %chosen,
                    "ambiguous template match resolved"
                );
                RoutingClass::Template(chosen)
            }
        }
    }

    fn break_tie(&self, candidates: &[&TaskTemplate], history: &HistoryStore) -> String {
        for exchange in history.iter_newest_first() {
            if let RoutingClass::Template(used) = &exchange.routing {
                if candidates.iter().any(|t| &t.name == used) {
                    return used.clone();
                }
            }
        }
        candidates[0].name.clone()
    }

    /// The configured template table.
    pub fn templates(&self) -> &[TaskTemplate] {
        &self.templates
    }
}
