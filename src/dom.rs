use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::driver::BrowserDriver;
use crate::error::DriverError;
use crate::types::{
    BoundingBox, ElementDescriptor, ElementKind, ElementLocator, MAX_ELEMENT_TEXT_CHARS,
    MAX_PAGE_TEXT_LINES, PageSnapshot, Viewport,
};

/// JavaScript evaluated in the page to enumerate interactive elements.
/// READ-ONLY: nothing in the document is modified.
///
/// The script:
///   1. Skips script, style, noscript, template and svg subtrees.
///   2. Walks the tree depth-first in document order, descending into
///      same-origin frames at their position (cross-origin frames are skipped).
///   3. Emits every node matching the interactive predicate: native controls,
///      interactive ARIA roles, onclick/tabindex/contenteditable, or a pointer
///      cursor not inherited from the parent.
///   4. For each: kind, trimmed text, key attributes, viewport box, visibility
///      (box, display/visibility/opacity, hit-test at the centre), enabled
///      state, dialog membership and a structural CSS path.
///   5. Collects a bounded list of non-interactive text lines.
const SNAPSHOT_JS: &str = r#"
(() => {
  const MAX_ELEMENTS = __MAX_ELEMENTS__;
  const MAX_TEXT = __MAX_TEXT__;
  const MAX_LINES = __MAX_LINES__;
  const viewport = { width: window.innerWidth, height: window.innerHeight };
  if (!document.body || document.readyState === 'loading') {
    return { ready: false, url: location.href, title: document.title || '', viewport, elements: [], pageText: [] };
  }

  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','TEMPLATE','SVG','HEAD','META','LINK']);
  const NATIVE = new Set(['A','BUTTON','INPUT','SELECT','TEXTAREA','SUMMARY']);
  const ROLES = new Set(['button','link','checkbox','radio','switch','tab','menuitem','menuitemcheckbox',
    'menuitemradio','option','textbox','searchbox','combobox','listbox','slider','spinbutton','treeitem']);
  const KEYS = ['placeholder','value','aria-label','name','href','type','role','title','alt','id'];
  const elements = [];
  const pageText = [];
  const seenText = new Set();
  const clean = (t) => (t || '').replace(/\s+/g, ' ').trim();
  const tagOf = (el) => (el.tagName || '').toUpperCase();

  function cssPath(el) {
    const parts = [];
    let node = el;
    while (node && node.nodeType === 1 && tagOf(node) !== 'HTML') {
      let part = node.tagName.toLowerCase();
      const parent = node.parentElement;
      if (parent) {
        const same = Array.from(parent.children).filter((c) => c.tagName === node.tagName);
        if (same.length > 1) part += ':nth-of-type(' + (same.indexOf(node) + 1) + ')';
      }
      parts.unshift(part);
      node = parent;
    }
    return 'html > ' + parts.join(' > ');
  }

  function isInteractive(el, style, parentPointer) {
    const tag = tagOf(el);
    if (NATIVE.has(tag)) {
      return !(tag === 'INPUT' && (el.getAttribute('type') || '').toLowerCase() === 'hidden');
    }
    const role = (el.getAttribute('role') || '').toLowerCase();
    if (ROLES.has(role)) return true;
    if (el.hasAttribute('onclick')) return true;
    if (el.isContentEditable && !(el.parentElement && el.parentElement.isContentEditable)) return true;
    const tabindex = el.getAttribute('tabindex');
    if (tabindex !== null && parseInt(tabindex, 10) >= 0) return true;
    return style.cursor === 'pointer' && !parentPointer;
  }

  function kindOf(el) {
    const tag = tagOf(el);
    const type = (el.getAttribute('type') || '').toLowerCase();
    const role = (el.getAttribute('role') || '').toLowerCase();
    if (tag === 'A') return 'link';
    if (tag === 'BUTTON' || tag === 'SUMMARY') return 'button';
    if (tag === 'INPUT') {
      if (['submit','button','reset','image'].includes(type)) return 'button';
      if (type === 'checkbox' || type === 'radio') return 'checkbox';
      return 'input';
    }
    if (tag === 'SELECT') return 'select';
    if (tag === 'TEXTAREA') return 'textarea';
    if (['button','menuitem','tab','switch'].includes(role)) return 'button';
    if (role === 'link') return 'link';
    if (['checkbox','radio','menuitemcheckbox','menuitemradio'].includes(role)) return 'checkbox';
    if (['textbox','searchbox'].includes(role) || el.isContentEditable) return 'input';
    if (['combobox','listbox'].includes(role)) return 'select';
    return 'other';
  }

  function textOf(el, kind) {
    const tag = tagOf(el);
    const type = (el.getAttribute('type') || '').toLowerCase();
    if (tag === 'INPUT') {
      return ['submit','button','reset'].includes(type) ? clean(el.value) : '';
    }
    if (tag === 'TEXTAREA') return '';
    if (tag === 'SELECT') {
      const opt = el.options && el.selectedIndex >= 0 ? el.options[el.selectedIndex] : null;
      return opt ? clean(opt.text) : '';
    }
    if (kind === 'input' && el.isContentEditable) return '';
    return clean(el.innerText || el.textContent);
  }

  function isVisible(el, style, rect, doc) {
    if (style.display === 'none' || style.visibility === 'hidden' || parseFloat(style.opacity) <= 0.1) return false;
    if (rect.width <= 0 || rect.height <= 0) return false;
    const win = doc.defaultView;
    const cx = rect.left + rect.width / 2;
    const cy = rect.top + rect.height / 2;
    if (cx < 0 || cy < 0 || cx >= win.innerWidth || cy >= win.innerHeight) return true;
    const hit = doc.elementFromPoint(cx, cy);
    if (!hit || hit === el || el.contains(hit) || hit.contains(el)) return true;
    if (el.labels && Array.from(el.labels).some((l) => l === hit || l.contains(hit))) return true;
    return false;
  }

  function record(el, style, doc, frames, offset, inDialog) {
    const rect = el.getBoundingClientRect();
    const kind = kindOf(el);
    const tag = tagOf(el);
    const type = (el.getAttribute('type') || '').toLowerCase();
    const attributes = {};
    for (const key of KEYS) {
      const v = el.getAttribute(key);
      if (v !== null && v !== '') attributes[key] = v.slice(0, 200);
    }
    if (tag === 'INPUT' || tag === 'TEXTAREA' || tag === 'SELECT') {
      if (el.value) attributes.value = String(el.value).slice(0, 200);
    }
    if (tag === 'INPUT' && type === 'password') delete attributes.value;
    if (tag === 'INPUT' && (type === 'checkbox' || type === 'radio')) attributes.checked = String(el.checked);
    if (tag === 'SELECT' && el.options) {
      attributes.options = Array.from(el.options).slice(0, 20).map((o) => clean(o.text).slice(0, 30)).join('|');
    }
    elements.push({
      kind,
      text: Array.from(textOf(el, kind)).slice(0, MAX_TEXT).join(''),
      attributes,
      box: { x: rect.left + offset.x, y: rect.top + offset.y, width: rect.width, height: rect.height },
      visible: isVisible(el, style, rect, doc),
      enabled: !(el.disabled || el.getAttribute('aria-disabled') === 'true'),
      inDialog,
      frames,
      selector: cssPath(el),
    });
  }

  function collectText(el) {
    let own = '';
    for (const n of el.childNodes) {
      if (n.nodeType === 3) own += n.textContent;
    }
    own = clean(own);
    if (own.length > 1 && pageText.length < MAX_LINES && !seenText.has(own)) {
      seenText.add(own);
      pageText.push(own.slice(0, 200));
    }
  }

  function walk(root, doc, frames, offset, inDialog, parentPointer, insideControl) {
    for (const el of root.children) {
      if (elements.length >= MAX_ELEMENTS) return;
      const tag = tagOf(el);
      if (SKIP.has(tag)) continue;
      const style = doc.defaultView.getComputedStyle(el);
      const hidden = style.display === 'none';
      const dialog = inDialog || tag === 'DIALOG' || el.getAttribute('role') === 'dialog'
        || el.getAttribute('aria-modal') === 'true';
      const interactive = isInteractive(el, style, parentPointer);
      if (interactive) {
        record(el, style, doc, frames, offset, dialog);
      } else if (!hidden && !insideControl && style.visibility !== 'hidden') {
        collectText(el);
      }
      if (hidden) continue;
      if (tag === 'IFRAME' || tag === 'FRAME') {
        let inner = null;
        try { inner = el.contentDocument; } catch (e) { inner = null; }
        if (inner && inner.body) {
          const r = el.getBoundingClientRect();
          const nested = { x: offset.x + r.left + el.clientLeft, y: offset.y + r.top + el.clientTop };
          walk(inner.body, inner, frames.concat([cssPath(el)]), nested, dialog, false, false);
        }
        continue;
      }
      walk(el, doc, frames, offset, dialog, style.cursor === 'pointer', insideControl || interactive);
    }
  }

  walk(document.body, document, [], { x: 0, y: 0 }, false, false, false);
  return { ready: true, url: location.href, title: document.title || '', viewport, elements, pageText };
})()
"#;

pub fn snapshot_script(max_elements: u32) -> String {
    SNAPSHOT_JS
        .replace("__MAX_ELEMENTS__", &max_elements.to_string())
        .replace("__MAX_TEXT__", &MAX_ELEMENT_TEXT_CHARS.to_string())
        .replace("__MAX_LINES__", &MAX_PAGE_TEXT_LINES.to_string())
}

/// Anything that can produce a fresh snapshot of the current page.
pub trait SnapshotSource: Send + Sync {
    fn build_snapshot(&self) -> Result<PageSnapshot, DriverError>;
}

/// Builds snapshots by evaluating [`SNAPSHOT_JS`] through the driver.
pub struct SnapshotBuilder {
    driver: Arc<dyn BrowserDriver>,
    max_elements: u32,
}

impl SnapshotBuilder {
    pub fn new(driver: Arc<dyn BrowserDriver>, max_elements: u32) -> Self {
        Self {
            driver,
            max_elements,
        }
    }
}

impl SnapshotSource for SnapshotBuilder {
    fn build_snapshot(&self) -> Result<PageSnapshot, DriverError> {
        let raw = self.driver.evaluate(&snapshot_script(self.max_elements))?;
        let snapshot = parse_snapshot(raw)?;
        debug!(
            url = %snapshot.url,
            elements = snapshot.len(),
            "built page snapshot"
        );
        Ok(snapshot)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    #[serde(default = "ready_default")]
    ready: bool,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    viewport: Viewport,
    #[serde(default)]
    elements: Vec<RawElement>,
    #[serde(default)]
    page_text: Vec<String>,
}

fn ready_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(rename = "box", default)]
    bounding_box: BoundingBox,
    #[serde(default)]
    visible: bool,
    #[serde(default = "ready_default")]
    enabled: bool,
    #[serde(default)]
    in_dialog: bool,
    #[serde(default)]
    frames: Vec<String>,
    selector: String,
}

/// Turn the script's JSON into a snapshot, numbering elements from 1 in the
/// order the script emitted them.
pub fn parse_snapshot(raw: Value) -> Result<PageSnapshot, DriverError> {
    let raw: RawSnapshot =
        serde_json::from_value(raw).map_err(|e| DriverError::Decode(e.to_string()))?;

    if !raw.ready {
        warn!(url = %raw.url, "document not interactive yet, returning empty snapshot");
        return Ok(PageSnapshot {
            url: raw.url,
            title: raw.title,
            viewport: raw.viewport,
            ..Default::default()
        });
    }

    let viewport = raw.viewport;
    let elements = raw
        .elements
        .into_iter()
        .zip(1u32..)
        .map(|(el, id)| ElementDescriptor {
            id,
            kind: ElementKind::parse(&el.kind).unwrap_or(ElementKind::Other),
            visible_text: collapse_whitespace(&el.text, MAX_ELEMENT_TEXT_CHARS),
            attributes: el.attributes,
            in_viewport: el.visible && el.bounding_box.intersects(&viewport),
            bounding_box: el.bounding_box,
            is_visible: el.visible,
            is_enabled: el.enabled,
            in_dialog: el.in_dialog,
            locator: ElementLocator {
                frames: el.frames,
                selector: el.selector,
            },
        })
        .collect();

    Ok(PageSnapshot {
        url: raw.url,
        title: raw.title,
        viewport,
        elements,
        page_text: raw.page_text.into_iter().take(MAX_PAGE_TEXT_LINES).collect(),
    })
}

fn collapse_whitespace(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

/// Render the numbered element map returned by `analyzePage`.
pub fn format_element_map(snapshot: &PageSnapshot) -> String {
    let mut out = format!("Page: {}\nURL: {}\n", snapshot.title, snapshot.url);

    if snapshot.is_empty() {
        out.push_str("\nNo interactive elements found (page may still be loading).\n");
    } else {
        let visible: Vec<&ElementDescriptor> =
            snapshot.elements.iter().filter(|el| el.is_visible).collect();
        out.push_str(&format!(
            "\nInteractive elements ({} visible of {}):\n",
            visible.len(),
            snapshot.len()
        ));
        for el in visible {
            out.push_str(&el.map_line());
            if el.in_dialog {
                out.push_str(" (dialog)");
            }
            if !el.is_enabled {
                out.push_str(" (disabled)");
            }
            out.push('\n');
        }
    }

    if !snapshot.page_text.is_empty() {
        out.push_str("\nPage text:\n");
        for line in &snapshot.page_text {
            out.push_str(line);
            out.push('\n');
        }
    }

    out
}
