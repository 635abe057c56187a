use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;

use crate::{
    record_key::RecordKey,
    render::Renderer,
    sync_error::SyncError,
    task::{Collection, Priority, Status, Task},
};

/* ───── Recording renderer ───── */

#[derive(Debug, Clone)]
pub struct Rendered {
    pub key: RecordKey,
    pub tasks: Vec<Task>,
    pub changed: bool,
}

#[derive(Debug, Default)]
pub struct RenderLog {
    pub renders: Vec<Rendered>,
    pub disconnects: Vec<SyncError>,
    pub reports: Vec<SyncError>,
}

impl RenderLog {
    pub fn last(&self) -> Option<&Rendered> {
        self.renders.last()
    }

    pub fn changed_count(&self, key: &RecordKey) -> usize {
        self.renders
            .iter()
            .filter(|r| &r.key == key && r.changed)
            .count()
    }

    pub fn renders_for(&self, key: &RecordKey) -> usize {
        self.renders.iter().filter(|r| &r.key == key).count()
    }
}

#[derive(Clone, Default)]
pub struct RecordingRenderer(pub Arc<Mutex<RenderLog>>);

impl RecordingRenderer {
    pub fn with_log() -> (Self, Arc<Mutex<RenderLog>>) {
        let r = Self::default();
        let log = r.0.clone();
        (r, log)
    }
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, key: &RecordKey, tasks: &[Task], changed: bool) {
        self.0.lock().unwrap().renders.push(Rendered {
            key: key.clone(),
            tasks: tasks.to_vec(),
            changed,
        });
    }

    fn disconnected(&mut self, reason: &SyncError) {
        self.0.lock().unwrap().disconnects.push(reason.clone());
    }

    fn report(&mut self, err: &SyncError) {
        self.0.lock().unwrap().reports.push(err.clone());
    }
}

/* ───── Fixtures ───── */

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

pub fn key_for(offset: i64) -> RecordKey {
    RecordKey::for_date(today() + chrono::Duration::days(offset))
}

pub fn task(id: &str, text: &str) -> Task {
    Task {
        id: id.into(),
        text: text.into(),
        priority: Priority::Low,
        status: Status::NotSet,
        created: 1,
        extra: serde_json::Map::new(),
    }
}

pub fn collection_of(tasks: &[Task]) -> String {
    Collection::from_tasks(tasks.to_vec()).canonical().unwrap()
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F: FnMut() -> bool>(what: &str, mut check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
