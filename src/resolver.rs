//! Element resolution: map a [`TargetSpec`] onto exactly one descriptor of
//! the current snapshot, or explain why that is not possible.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::debug;

use crate::error::ResolveError;
use crate::types::{ElementDescriptor, ElementKind, PageSnapshot, TargetSpec};

/// Minimum natural-language score accepted as a match.
pub const NL_MATCH_THRESHOLD: f64 = 0.45;

/// Attributes that stand in for visible text on unlabeled controls.
const LABEL_ATTRIBUTES: [&str; 5] = ["placeholder", "value", "aria-label", "name", "title"];

const STOP_WORDS: [&str; 14] = [
    "the", "a", "an", "to", "on", "in", "of", "for", "with", "and", "that", "this", "at", "click",
];

static MAP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[(\d+)\]").expect("static regex"));

pub trait Resolve: Send + Sync {
    fn resolve(
        &self,
        target: &TargetSpec,
        snapshot: &PageSnapshot,
    ) -> Result<ElementDescriptor, ResolveError>;
}

#[derive(Debug, Clone)]
pub struct ElementResolver {
    threshold: f64,
}

impl Default for ElementResolver {
    fn default() -> Self {
        Self {
            threshold: NL_MATCH_THRESHOLD,
        }
    }
}

impl ElementResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn by_id(&self, id: u32, snapshot: &PageSnapshot) -> Result<ElementDescriptor, ResolveError> {
        snapshot
            .get(id)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                target: format!("#{} (snapshot has {} elements)", id, snapshot.len()),
            })
    }

    fn by_structured(
        &self,
        target: &TargetSpec,
        kind: Option<ElementKind>,
        text: Option<&str>,
        attributes: &BTreeMap<String, String>,
        snapshot: &PageSnapshot,
    ) -> Result<ElementDescriptor, ResolveError> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        let ranked: Vec<(Rank, &ElementDescriptor)> = snapshot
            .elements
            .iter()
            .filter(|el| kind.is_none_or(|k| el.kind == k))
            .filter(|el| attributes_match(el, attributes))
            .filter_map(|el| {
                let exact = match text {
                    Some(text) => text_match(el, text)?,
                    None => true,
                };
                Some((Rank::new(el, exact, 1.0), el))
            })
            .collect();

        debug!(%target, candidates = ranked.len(), "structured resolution");
        pick(target, ranked)
    }

    fn by_description(
        &self,
        target: &TargetSpec,
        description: &str,
        snapshot: &PageSnapshot,
    ) -> Result<ElementDescriptor, ResolveError> {
        let query = Query::parse(description);
        let ranked: Vec<(Rank, &ElementDescriptor)> = snapshot
            .elements
            .iter()
            .filter_map(|el| {
                let score = query.score(el);
                (score >= self.threshold).then(|| (Rank::new(el, true, score), el))
            })
            .collect();

        debug!(
            %target,
            above_threshold = ranked.len(),
            threshold = self.threshold,
            "natural-language resolution"
        );
        pick(target, ranked)
    }
}

impl Resolve for ElementResolver {
    fn resolve(
        &self,
        target: &TargetSpec,
        snapshot: &PageSnapshot,
    ) -> Result<ElementDescriptor, ResolveError> {
        match target {
            TargetSpec::ById(id) => self.by_id(*id, snapshot),
            TargetSpec::ByStructured {
                kind,
                text,
                attributes,
            } => self.by_structured(target, *kind, text.as_deref(), attributes, snapshot),
            TargetSpec::ByNaturalLanguage(description) => {
                self.by_description(target, description, snapshot)
            }
        }
    }
}

/// Ordering key; smaller is better. Field order is the comparison order:
/// visibility decides before exactness, and document order (the ID) breaks
/// whatever is left.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
struct Rank {
    score: f64,
    visibility: u8,
    inexact: u8,
    disabled: u8,
}

impl Rank {
    fn new(el: &ElementDescriptor, exact: bool, score: f64) -> Self {
        Self {
            // Negated so that a higher score sorts first.
            score: -score,
            visibility: visibility_rank(el),
            inexact: u8::from(!exact),
            disabled: u8::from(!el.is_enabled),
        }
    }

    fn ties_with(&self, other: &Rank) -> bool {
        (self.score - other.score).abs() < 1e-9
            && self.visibility == other.visibility
            && self.inexact == other.inexact
            && self.disabled == other.disabled
    }
}

/// 0 = visible inside the viewport, 1 = visible elsewhere, 2 = hidden.
fn visibility_rank(el: &ElementDescriptor) -> u8 {
    match (el.is_visible, el.in_viewport) {
        (true, true) => 0,
        (true, false) => 1,
        (false, _) => 2,
    }
}

/// Choose one element from ranked candidates.
///
/// The best rank wins. Among equally ranked candidates the earliest in
/// document order wins, unless they are indistinguishable to the oracle
/// (same kind and label), in which case the choice is handed back as
/// `Ambiguous`.
fn pick(
    target: &TargetSpec,
    mut ranked: Vec<(Rank, &ElementDescriptor)>,
) -> Result<ElementDescriptor, ResolveError> {
    ranked.sort_by(|(ra, ea), (rb, eb)| {
        ra.partial_cmp(rb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(ea.id.cmp(&eb.id))
    });

    let Some((best_rank, best)) = ranked.first().copied() else {
        return Err(ResolveError::NotFound {
            target: target.to_string(),
        });
    };

    let tied: Vec<&ElementDescriptor> = ranked
        .iter()
        .take_while(|(rank, _)| rank.ties_with(&best_rank))
        .map(|(_, el)| *el)
        .collect();

    if tied.len() > 1 && tied.iter().all(|el| indistinguishable(el, best)) {
        return Err(ResolveError::Ambiguous {
            target: target.to_string(),
            candidates: tied.into_iter().cloned().collect(),
        });
    }

    Ok(best.clone())
}

fn indistinguishable(a: &ElementDescriptor, b: &ElementDescriptor) -> bool {
    a.kind == b.kind && a.label().eq_ignore_ascii_case(b.label())
}

/// `None` when the element does not match `text`; `Some(exact)` otherwise.
fn text_match(el: &ElementDescriptor, text: &str) -> Option<bool> {
    let wanted = text.to_lowercase();
    let visible = el.visible_text.to_lowercase();
    if visible == wanted {
        return Some(true);
    }
    let by_attribute = LABEL_ATTRIBUTES
        .iter()
        .filter_map(|key| el.attribute(key))
        .any(|value| value.to_lowercase() == wanted);
    if by_attribute {
        return Some(true);
    }
    (!visible.is_empty() && visible.contains(&wanted)).then_some(false)
}

fn attributes_match(el: &ElementDescriptor, wanted: &BTreeMap<String, String>) -> bool {
    wanted.iter().all(|(key, value)| {
        el.attribute(key).is_some_and(|actual| {
            let actual = actual.to_lowercase();
            let value = value.to_lowercase();
            actual == value || actual.contains(&value)
        })
    })
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn kind_word(token: &str) -> Option<ElementKind> {
    let kind = match token {
        "button" | "btn" => ElementKind::Button,
        "link" | "hyperlink" => ElementKind::Link,
        "input" | "field" | "textbox" | "box" | "searchbox" => ElementKind::Input,
        "dropdown" | "select" | "combobox" | "menu" => ElementKind::Select,
        "checkbox" | "radio" | "toggle" | "tickbox" => ElementKind::Checkbox,
        "textarea" => ElementKind::Textarea,
        _ => return None,
    };
    Some(kind)
}

/// Parsed natural-language description.
struct Query {
    words: Vec<String>,
    phrase: String,
    kind: Option<ElementKind>,
}

impl Query {
    fn parse(description: &str) -> Self {
        let mut words = Vec::new();
        let mut kind = None;
        for token in tokenize(description) {
            if let Some(k) = kind_word(&token) {
                kind.get_or_insert(k);
            } else if !STOP_WORDS.contains(&token.as_str()) {
                words.push(token);
            }
        }
        let phrase = words.join(" ");
        Self {
            words,
            phrase,
            kind,
        }
    }

    /// Similarity in `[0, 1]`.
    fn score(&self, el: &ElementDescriptor) -> f64 {
        let kind_hit = self.kind.map(|k| k == el.kind);

        if self.words.is_empty() {
            // Only a kind word ("the button"): every element of that kind is
            // an equal candidate.
            return if kind_hit == Some(true) { 0.5 } else { 0.0 };
        }

        let mut haystack = el.visible_text.clone();
        for key in LABEL_ATTRIBUTES.iter().chain(["alt", "id", "role"].iter()) {
            if let Some(value) = el.attribute(key) {
                haystack.push(' ');
                haystack.push_str(value);
            }
        }
        let tokens: BTreeSet<String> = tokenize(&haystack).into_iter().collect();
        if tokens.is_empty() {
            return 0.0;
        }

        let matched = self
            .words
            .iter()
            .filter(|word| {
                tokens.contains(*word)
                    || (word.len() >= 4 && tokens.iter().any(|t| t.starts_with(word.as_str())))
            })
            .count();
        let overlap = matched as f64 / self.words.len() as f64;
        let phrase = if tokenize(&haystack).join(" ").contains(&self.phrase) {
            1.0
        } else {
            0.0
        };

        match kind_hit {
            None => 0.8 * overlap + 0.2 * phrase,
            Some(hit) => 0.6 * overlap + 0.25 * f64::from(u8::from(hit)) + 0.15 * phrase,
        }
    }
}

impl TargetSpec {
    /// Interpret a target argument from a tool call.
    ///
    /// Numbers and numeric strings are IDs, `[3][button]Submit` element map
    /// lines are ID 3, objects with `id` are IDs, other objects are structured
    /// and any other string is a natural-language description.
    pub fn from_value(value: &Value) -> Option<TargetSpec> {
        match value {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).map(TargetSpec::ById),
            Value::String(s) => TargetSpec::parse(s),
            Value::Object(map) => {
                if let Some(id) = map.get("id").and_then(id_from_value) {
                    return Some(TargetSpec::ById(id));
                }
                if let Some(desc) = map.get("description").and_then(Value::as_str) {
                    return TargetSpec::parse(desc);
                }
                let kind = map
                    .get("kind")
                    .and_then(Value::as_str)
                    .and_then(ElementKind::parse);
                let text = map
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from);
                let attributes: BTreeMap<String, String> = map
                    .get("attributes")
                    .and_then(Value::as_object)
                    .map(|attrs| {
                        attrs
                            .iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                if kind.is_none() && text.is_none() && attributes.is_empty() {
                    return None;
                }
                Some(TargetSpec::ByStructured {
                    kind,
                    text,
                    attributes,
                })
            }
            _ => None,
        }
    }

    pub fn parse(raw: &str) -> Option<TargetSpec> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(caps) = MAP_LINE.captures(raw) {
            if let Ok(id) = caps[1].parse() {
                return Some(TargetSpec::ById(id));
            }
        }
        if let Ok(id) = raw.trim_start_matches('#').parse() {
            return Some(TargetSpec::ById(id));
        }
        Some(TargetSpec::ByNaturalLanguage(raw.to_string()))
    }
}

fn id_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().trim_start_matches('#').parse().ok(),
        _ => None,
    }
}
