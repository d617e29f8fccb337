use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ErrorKind;

/// Maximum characters of visible text kept per element.
pub const MAX_ELEMENT_TEXT_CHARS: usize = 80;
/// Maximum lines of non-interactive page text kept per snapshot.
pub const MAX_PAGE_TEXT_LINES: usize = 60;

/// Coarse element category shown to the oracle as `[id][kind]text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Button,
    Link,
    Input,
    Select,
    Checkbox,
    Textarea,
    Other,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Button => "button",
            ElementKind::Link => "link",
            ElementKind::Input => "input",
            ElementKind::Select => "select",
            ElementKind::Checkbox => "checkbox",
            ElementKind::Textarea => "textarea",
            ElementKind::Other => "other",
        }
    }

    /// Lenient parse used for oracle-provided kinds ("dropdown", "radio", ...).
    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw.trim().to_ascii_lowercase().as_str() {
            "button" | "btn" | "submit" => ElementKind::Button,
            "link" | "a" | "anchor" => ElementKind::Link,
            "input" | "textbox" | "text" | "field" | "searchbox" => ElementKind::Input,
            "select" | "dropdown" | "combobox" | "listbox" => ElementKind::Select,
            "checkbox" | "radio" | "toggle" | "switch" => ElementKind::Checkbox,
            "textarea" => ElementKind::Textarea,
            "other" | "interactive" => ElementKind::Other,
            _ => return None,
        };
        Some(kind)
    }

    /// True for kinds that accept typed text.
    pub fn is_editable(&self) -> bool {
        matches!(self, ElementKind::Input | ElementKind::Textarea)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounding box in top-level viewport CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// True when any part of the box overlaps the viewport.
    pub fn intersects(&self, viewport: &Viewport) -> bool {
        !self.is_empty()
            && self.x < viewport.width
            && self.y < viewport.height
            && self.x + self.width > 0.0
            && self.y + self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// Structural address of a live node: CSS paths of the frame chain, then of
/// the element inside the innermost frame document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementLocator {
    #[serde(default)]
    pub frames: Vec<String>,
    pub selector: String,
}

/// One interactive element of a snapshot. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub id: u32,
    pub kind: ElementKind,
    pub visible_text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub bounding_box: BoundingBox,
    pub is_visible: bool,
    pub is_enabled: bool,
    #[serde(default)]
    pub in_viewport: bool,
    #[serde(default)]
    pub in_dialog: bool,
    pub locator: ElementLocator,
}

impl ElementDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Text shown in the element map: visible text, else the first labelling
    /// attribute, else the kind itself.
    pub fn label(&self) -> &str {
        if !self.visible_text.is_empty() {
            return &self.visible_text;
        }
        ["placeholder", "aria-label", "name", "title", "alt", "value"]
            .iter()
            .find_map(|key| self.attribute(key).filter(|v| !v.is_empty()))
            .unwrap_or(self.kind.as_str())
    }

    /// Element map line, e.g. `[2][button]Submit`.
    pub fn map_line(&self) -> String {
        format!("[{}][{}]{}", self.id, self.kind, self.label())
    }
}

/// Point-in-time catalogue of interactive elements. IDs are 1-based and only
/// meaningful within this snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub viewport: Viewport,
    pub elements: Vec<ElementDescriptor>,
    #[serde(default)]
    pub page_text: Vec<String>,
}

impl PageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn get(&self, id: u32) -> Option<&ElementDescriptor> {
        // IDs are dense and ordered, so index first and fall back to a scan.
        let index = (id as usize).checked_sub(1)?;
        match self.elements.get(index) {
            Some(el) if el.id == id => Some(el),
            _ => self.elements.iter().find(|el| el.id == id),
        }
    }
}

/// What the resolver accepts as "a thing to interact with".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetSpec {
    ById(u32),
    ByStructured {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ElementKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, String>,
    },
    ByNaturalLanguage(String),
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSpec::ById(id) => write!(f, "#{}", id),
            TargetSpec::ByStructured {
                kind,
                text,
                attributes,
            } => {
                let mut parts = Vec::new();
                if let Some(kind) = kind {
                    parts.push(format!("kind={}", kind));
                }
                if let Some(text) = text {
                    parts.push(format!("text={:?}", text));
                }
                for (k, v) in attributes {
                    parts.push(format!("{}={:?}", k, v));
                }
                write!(f, "{{{}}}", parts.join(", "))
            }
            TargetSpec::ByNaturalLanguage(desc) => write!(f, "{:?}", desc),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionVerb {
    Click,
    Type,
    SelectOption,
    KeyboardAction,
    Navigate,
    Scroll,
    AskUser,
    AnalyzePage,
    GoBack,
    Search,
}

impl ActionVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionVerb::Click => "click",
            ActionVerb::Type => "type",
            ActionVerb::SelectOption => "selectOption",
            ActionVerb::KeyboardAction => "keyboardAction",
            ActionVerb::Navigate => "navigate",
            ActionVerb::Scroll => "scroll",
            ActionVerb::AskUser => "askUser",
            ActionVerb::AnalyzePage => "analyzePage",
            ActionVerb::GoBack => "goBack",
            ActionVerb::Search => "search",
        }
    }

    /// Navigation-class verbs are never retried automatically and leave any
    /// previous snapshot stale.
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            ActionVerb::Navigate | ActionVerb::GoBack | ActionVerb::Search
        )
    }
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
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

impl ScrollDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().trim_matches(|c| c == '"' || c == '\'').to_ascii_lowercase().as_str() {
            "up" => Some(ScrollDirection::Up),
            "down" => Some(ScrollDirection::Down),
            "top" => Some(ScrollDirection::Top),
            "bottom" => Some(ScrollDirection::Bottom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AskKind {
    #[default]
    Text,
    Password,
    Choice,
}

/// A single question for the human operator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserPrompt {
    pub prompt: String,
    #[serde(default)]
    pub kind: AskKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// The unit the control loop dispatches per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub verb: ActionVerb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<UserPrompt>,
}

impl ActionRequest {
    pub fn new(verb: ActionVerb) -> Self {
        Self {
            verb,
            target: None,
            payload: None,
            prompt: None,
        }
    }

    pub fn with_target(mut self, target: TargetSpec) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn click(target: TargetSpec) -> Self {
        Self::new(ActionVerb::Click).with_target(target)
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(ActionVerb::Navigate).with_payload(url)
    }

    pub fn ask_user(prompt: UserPrompt) -> Self {
        Self {
            prompt: Some(prompt),
            ..Self::new(ActionVerb::AskUser)
        }
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }
}

impl fmt::Display for ActionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb)?;
        if let Some(target) = &self.target {
            write!(f, " {}", target)?;
        }
        if let Some(prompt) = &self.prompt {
            write!(f, " {:?}", prompt.prompt)?;
        }
        if let Some(payload) = &self.payload {
            write!(f, " {:?}", payload)?;
        }
        Ok(())
    }
}

/// Tagged outcome of one dispatched action. Always surfaces to the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ActionResult {
    Success { observation: String },
    Failure { kind: ErrorKind, detail: String },
}

impl ActionResult {
    pub fn success(observation: impl Into<String>) -> Self {
        ActionResult::Success {
            observation: observation.into(),
        }
    }

    pub fn failure(kind: ErrorKind, detail: impl Into<String>) -> Self {
        ActionResult::Failure {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            ActionResult::Failure { kind, .. } => Some(*kind),
            ActionResult::Success { .. } => None,
        }
    }

    /// Text fed back to the oracle.
    pub fn observation(&self) -> String {
        match self {
            ActionResult::Success { observation } => observation.clone(),
            ActionResult::Failure { kind, detail } => format!("ERROR ({}): {}", kind, detail),
        }
    }
}

/// One `(request, result)` pair of the task history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub request: ActionRequest,
    pub result: ActionResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: u32, text: &str) -> ElementDescriptor {
        ElementDescriptor {
            id,
            kind: ElementKind::Input,
            visible_text: text.to_string(),
            attributes: BTreeMap::new(),
            bounding_box: BoundingBox::default(),
            is_visible: true,
            is_enabled: true,
            in_viewport: true,
            in_dialog: false,
            locator: ElementLocator::default(),
        }
    }

    #[test]
    fn label_falls_back_to_placeholder() {
        let mut el = descriptor(4, "");
        el.attributes
            .insert("placeholder".to_string(), "Email".to_string());
        assert_eq!(el.map_line(), "[4][input]Email");

        let bare = descriptor(5, "");
        assert_eq!(bare.label(), "input");
    }

    #[test]
    fn snapshot_lookup_by_id() {
        let snapshot = PageSnapshot {
            elements: vec![descriptor(1, "a"), descriptor(2, "b")],
            ..Default::default()
        };
        assert_eq!(snapshot.get(2).map(|e| e.visible_text.as_str()), Some("b"));
        assert!(snapshot.get(0).is_none());
        assert!(snapshot.get(3).is_none());
    }

    #[test]
    fn element_kind_parse_is_lenient() {
        assert_eq!(ElementKind::parse("Dropdown"), Some(ElementKind::Select));
        assert_eq!(ElementKind::parse("radio"), Some(ElementKind::Checkbox));
        assert_eq!(ElementKind::parse("banana"), None);
    }

    #[test]
    fn bounding_box_viewport_intersection() {
        let viewport = Viewport {
            width: 800.0,
            height: 600.0,
        };
        let inside = BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 20.0,
        };
        let below = BoundingBox { y: 900.0, ..inside };
        assert!(inside.intersects(&viewport));
        assert!(!below.intersects(&viewport));
    }

    #[test]
    fn failure_observation_names_kind() {
        let result = ActionResult::failure(ErrorKind::NotFound, "no element #9");
        assert_eq!(result.observation(), "ERROR (not_found): no element #9");
        assert_eq!(result.failure_kind(), Some(ErrorKind::NotFound));
    }
}
