use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use webpilot::driver::{Modifier, Point};
use webpilot::error::DriverError;
use webpilot::{
    BrowserDriver, ElementKind, SnapshotBuilder, SnapshotSource, format_element_map,
};

/// Serves the same page-script result for every evaluation.
struct StaticPage {
    result: Value,
    scripts: Mutex<Vec<String>>,
}

impl StaticPage {
    fn new(result: Value) -> Arc<Self> {
        Arc::new(Self {
            result,
            scripts: Mutex::new(Vec::new()),
        })
    }
}

impl BrowserDriver for StaticPage {
    fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        self.scripts.lock().unwrap().push(script.to_string());
        Ok(self.result.clone())
    }

    fn navigate(&self, url: &str) -> Result<String, DriverError> {
        Ok(url.to_string())
    }

    fn go_back(&self) -> Result<String, DriverError> {
        Err(DriverError::Navigation("no history".to_string()))
    }

    fn current_url(&self) -> Result<String, DriverError> {
        Ok("https://news.example/".to_string())
    }

    fn mouse_move(&self, _: Point) -> Result<(), DriverError> {
        Ok(())
    }

    fn mouse_click(&self, _: Point) -> Result<(), DriverError> {
        Ok(())
    }

    fn press_key(&self, _: &str, _: &[Modifier]) -> Result<(), DriverError> {
        Ok(())
    }

    fn send_char(&self, _: char) -> Result<(), DriverError> {
        Ok(())
    }
}

fn news_page() -> Value {
    json!({
        "ready": true,
        "url": "https://news.example/",
        "title": "News",
        "viewport": { "width": 1024.0, "height": 768.0 },
        "elements": [
            {
                "kind": "input",
                "attributes": { "placeholder": "Search news", "type": "search" },
                "box": { "x": 700.0, "y": 12.0, "width": 240.0, "height": 32.0 },
                "visible": true,
                "selector": "html > body > header > input"
            },
            {
                "kind": "link",
                "text": "World",
                "box": { "x": 20.0, "y": 80.0, "width": 60.0, "height": 20.0 },
                "visible": true,
                "selector": "html > body > nav > a:nth-of-type(1)"
            },
            {
                "kind": "button",
                "text": "Play video",
                "box": { "x": 40.0, "y": 300.0, "width": 100.0, "height": 40.0 },
                "visible": true,
                "frames": ["html > body > main > iframe"],
                "selector": "html > body > button"
            },
            {
                "kind": "select",
                "text": "Edition",
                "attributes": { "name": "edition" },
                "box": { "x": 20.0, "y": 1500.0, "width": 120.0, "height": 24.0 },
                "visible": true,
                "enabled": false,
                "selector": "html > body > footer > select"
            }
        ],
        "pageText": ["Top stories", "Markets rally"]
    })
}

#[test]
fn same_page_gives_the_same_snapshot() {
    let driver = StaticPage::new(news_page());
    let builder = SnapshotBuilder::new(driver.clone(), 120);

    let first = builder.build_snapshot().unwrap();
    let second = builder.build_snapshot().unwrap();

    assert_eq!(first, second);
    assert_eq!(
        first.elements.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(driver.scripts.lock().unwrap()[0].contains("120"));
}

#[test]
fn descriptors_carry_kind_visibility_and_frames() {
    let snapshot = SnapshotBuilder::new(StaticPage::new(news_page()), 500)
        .build_snapshot()
        .unwrap();

    let search = snapshot.get(1).unwrap();
    assert_eq!(search.kind, ElementKind::Input);
    assert_eq!(search.label(), "Search news");
    assert!(search.in_viewport);

    let video = snapshot.get(3).unwrap();
    assert_eq!(video.locator.frames, vec!["html > body > main > iframe"]);

    let edition = snapshot.get(4).unwrap();
    assert_eq!(edition.kind, ElementKind::Select);
    assert!(!edition.is_enabled);
    assert!(!edition.in_viewport);
}

#[test]
fn element_map_is_what_the_oracle_reads() {
    let snapshot = SnapshotBuilder::new(StaticPage::new(news_page()), 500)
        .build_snapshot()
        .unwrap();
    let map = format_element_map(&snapshot);

    assert!(map.contains("URL: https://news.example/"));
    assert!(map.contains("[1][input]Search news"));
    assert!(map.contains("[3][button]Play video"));
    assert!(map.contains("Markets rally"));
}

#[test]
fn page_still_loading_is_an_empty_snapshot() {
    let snapshot = SnapshotBuilder::new(
        StaticPage::new(json!({ "ready": false, "url": "https://news.example/" })),
        500,
    )
    .build_snapshot()
    .unwrap();

    assert!(snapshot.is_empty());
    assert!(format_element_map(&snapshot).contains("No interactive elements found"));
}

#[test]
fn script_failure_is_a_driver_error() {
    let result = SnapshotBuilder::new(StaticPage::new(json!("not a snapshot")), 500)
        .build_snapshot();
    assert!(matches!(result, Err(DriverError::Decode(_))));
}
