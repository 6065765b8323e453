//! Environment adapter boundary.
//!
//! The agent sees pages as structured [`PageSnapshot`]s and acts through a
//! closed set of [`Action`] variants. Concrete drivers (Selenium, CDP,
//! whatever) live outside this crate behind [`EnvironmentAdapter`]; the
//! bundled [`ScriptedBrowser`] walks a canned site fixture so sessions can
//! run deterministically in tests and demos.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageElement {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TextBlock {
    Heading { text: String },
    Paragraph { text: String },
    List { items: Vec<String> },
}

/// What the agent perceives of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub clickables: Vec<PageElement>,
    #[serde(default)]
    pub inputs: Vec<PageElement>,
    #[serde(default)]
    pub text_blocks: Vec<TextBlock>,
}

impl PageSnapshot {
    /// Placeholder snapshot for a URL the adapter knows nothing about.
    pub fn blank(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: String::new(),
            clickables: Vec::new(),
            inputs: Vec::new(),
            text_blocks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

fn default_scroll() -> ScrollDirection {
    ScrollDirection::Down
}

fn default_wait_secs() -> f64 {
    2.0
}

/// The closed action vocabulary. The wire shape matches what the model is
/// asked to emit: `{"type": "click", "name": ..., "description": ...}`,
/// with `target` for navigation and `value` doubling as scroll direction,
/// input text, or wait seconds. Unknown types fail deserialization and are
/// reported as failed actions, never executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Navigate {
        target: String,
        #[serde(default)]
        description: String,
    },
    Click {
        name: String,
        #[serde(default)]
        description: String,
    },
    Input {
        name: String,
        value: String,
        #[serde(default)]
        description: String,
    },
    Scroll {
        #[serde(rename = "value", default = "default_scroll")]
        direction: ScrollDirection,
        #[serde(default)]
        description: String,
    },
    Back {
        #[serde(default)]
        description: String,
    },
    Wait {
        #[serde(rename = "value", default = "default_wait_secs")]
        seconds: f64,
        #[serde(default)]
        description: String,
    },
}

impl Action {
    pub fn navigate(url: &str) -> Self {
        Action::Navigate {
            target: url.to_string(),
            description: String::new(),
        }
    }

    /// Human-readable description, used for action_taken memory records.
    pub fn describe(&self) -> String {
        match self {
            Action::Click { name, description } => {
                format!("Clicked on {}: {}", name, description)
            }
            Action::Input { name, value, .. } => {
                format!("Entered text '{}' into {}", value, name)
            }
            Action::Scroll { direction, .. } => {
                let dir = match direction {
                    ScrollDirection::Up => "up",
                    ScrollDirection::Down => "down",
                    ScrollDirection::Top => "top",
                    ScrollDirection::Bottom => "bottom",
                };
                format!("Scrolled {} on the page", dir)
            }
            Action::Navigate { target, .. } => format!("Navigated to URL: {}", target),
            Action::Back { .. } => "Navigated back to previous page".to_string(),
            Action::Wait { seconds, .. } => format!("Waited for {} seconds", seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Boundary to whatever renders and drives pages. All calls are blocking
/// from the controller's point of view; timeouts are the implementor's
/// problem.
#[async_trait]
pub trait EnvironmentAdapter: Send + Sync {
    async fn observe_page(&self) -> Result<PageSnapshot>;
    async fn execute(&self, action: &Action) -> Result<ActionOutcome>;
    async fn screenshot(&self) -> Result<Option<Vec<u8>>>;
    async fn current_url(&self) -> String;
}

/// A canned site: pages plus click-through links between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteFixture {
    pub pages: Vec<PageSnapshot>,
    #[serde(default)]
    pub links: Vec<FixtureLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureLink {
    /// URL of the page the clickable lives on.
    pub page: String,
    /// Name of the clickable element.
    pub name: String,
    /// URL the click lands on.
    pub target: String,
}

impl SiteFixture {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read site fixture {}", path.display()))?;
        serde_json::from_str(&json).context("Failed to parse site fixture")
    }
}

struct BrowserState {
    current: String,
    history: Vec<String>,
}

/// Deterministic adapter over a [`SiteFixture`].
pub struct ScriptedBrowser {
    pages: HashMap<String, PageSnapshot>,
    links: HashMap<(String, String), String>,
    state: Mutex<BrowserState>,
}

impl ScriptedBrowser {
    pub fn new(fixture: SiteFixture) -> Self {
        let start = fixture
            .pages
            .first()
            .map(|p| p.url.clone())
            .unwrap_or_default();
        let pages = fixture
            .pages
            .into_iter()
            .map(|p| (p.url.clone(), p))
            .collect();
        let links = fixture
            .links
            .into_iter()
            .map(|l| ((l.page, l.name), l.target))
            .collect();
        Self {
            pages,
            links,
            state: Mutex::new(BrowserState {
                current: start,
                history: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot_of(&self, url: &str) -> PageSnapshot {
        self.pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| PageSnapshot::blank(url))
    }
}

#[async_trait]
impl EnvironmentAdapter for ScriptedBrowser {
    async fn observe_page(&self) -> Result<PageSnapshot> {
        let current = self.lock().current.clone();
        Ok(self.snapshot_of(&current))
    }

    async fn execute(&self, action: &Action) -> Result<ActionOutcome> {
        let mut state = self.lock();
        match action {
            Action::Navigate { target, .. } => {
                let previous = std::mem::replace(&mut state.current, target.clone());
                if !previous.is_empty() {
                    state.history.push(previous);
                }
                Ok(ActionOutcome::ok(format!("Navigated to {}", target)))
            }
            Action::Click { name, .. } => {
                let page = self.snapshot_of(&state.current);
                if !page.clickables.iter().any(|c| c.name == *name) {
                    return Ok(ActionOutcome::failed(format!(
                        "no clickable element named '{}' on {}",
                        name, state.current
                    )));
                }
                if let Some(target) = self.links.get(&(state.current.clone(), name.clone())) {
                    let previous = std::mem::replace(&mut state.current, target.clone());
                    state.history.push(previous);
                }
                Ok(ActionOutcome::ok(format!("Clicked {}", name)))
            }
            Action::Input { name, value, .. } => {
                let page = self.snapshot_of(&state.current);
                if !page.inputs.iter().any(|i| i.name == *name) {
                    return Ok(ActionOutcome::failed(format!(
                        "no input element named '{}' on {}",
                        name, state.current
                    )));
                }
                Ok(ActionOutcome::ok(format!(
                    "Entered '{}' into {}",
                    value, name
                )))
            }
            Action::Scroll { direction, .. } => {
                Ok(ActionOutcome::ok(format!("Scrolled {:?}", direction)))
            }
            Action::Back { .. } => match state.history.pop() {
                Some(previous) => {
                    state.current = previous;
                    Ok(ActionOutcome::ok("Went back"))
                }
                None => Ok(ActionOutcome::failed("no previous page to go back to")),
            },
            Action::Wait { seconds, .. } => {
                Ok(ActionOutcome::ok(format!("Waited {} seconds", seconds)))
            }
        }
    }

    async fn screenshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn current_url(&self) -> String {
        self.lock().current.clone()
    }
}
