use std::collections::HashSet;
use std::fmt;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sync_error::SyncError;

pub type TaskId = String;

const ID_SUFFIX_LEN: usize = 6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    High,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => f.write_str("low"),
            Priority::High => f.write_str("high"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "not set")]
    NotSet,
    #[serde(rename = "done")]
    Done,
}

impl Status {
    pub fn toggled(self) -> Self {
        match self {
            Status::NotSet => Status::Done,
            Status::Done => Status::NotSet,
        }
    }

    pub fn is_done(self) -> bool {
        self == Status::Done
    }
}

/// One entry of a day's collection.
///
/// Field order here is the canonical serialization order. Fields written by
/// other clients are kept in `extra` and follow, sorted by name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub created: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    pub fn new(text: impl Into<String>, priority: Priority, created: u64) -> Self {
        Self {
            id: new_task_id(created),
            text: text.into(),
            priority,
            status: Status::NotSet,
            created,
            extra: serde_json::Map::new(),
        }
    }
}

/// `<created-ms>-<random suffix>`; unique without asking the store.
pub fn new_task_id(created: u64) -> TaskId {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{created}-{suffix}")
}

/*──────── Collection ────────*/

/// Ordered tasks of one day. Ids are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Collection(Vec<Task>);

impl Collection {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a collection, keeping the first occurrence of any repeated id.
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut seen = HashSet::with_capacity(tasks.len());
        let before = tasks.len();
        let tasks: Vec<Task> = tasks
            .into_iter()
            .filter(|t| seen.insert(t.id.clone()))
            .collect();
        if tasks.len() != before {
            warn!(dropped = before - tasks.len(), "collection: duplicate task ids dropped");
        }
        Self(tasks)
    }

    /// Decodes a stored value. An empty value is an empty collection.
    pub fn parse(value: &str) -> Result<Self, SyncError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::new());
        }
        let tasks: Vec<Task> = serde_json::from_str(value)?;
        Ok(Self::from_tasks(tasks))
    }

    /// Deterministic serialization used both on the wire and for diffing.
    pub fn canonical(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.0.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Appends, refusing an id already present.
    pub fn push(&mut self, task: Task) -> bool {
        if self.contains(&task.id) {
            return false;
        }
        self.0.push(task);
        true
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.0.iter_mut().find(|t| t.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let pos = self.0.iter().position(|t| t.id == id)?;
        Some(self.0.remove(pos))
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.0
    }
}

impl<'de> Deserialize<'de> for Collection {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Vec::<Task>::deserialize(d).map(Collection::from_tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            text: format!("task {id}"),
            priority: Priority::Low,
            status: Status::NotSet,
            created: 1,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn status_serializes_with_space() {
        let json = serde_json::to_string(&task("a")).unwrap();
        assert_eq!(
            json,
            r#"{"id":"a","text":"task a","priority":"low","status":"not set","created":1}"#
        );
    }

    #[test]
    fn canonical_ignores_incoming_field_order() {
        let a = Collection::parse(
            r#"[{"status":"done","created":5,"priority":"high","text":"x","id":"1"}]"#,
        )
        .unwrap();
        let b = Collection::parse(
            r#"[{"id":"1","text":"x","priority":"high","status":"done","created":5}]"#,
        )
        .unwrap();
        assert_eq!(a.canonical().unwrap(), b.canonical().unwrap());
    }

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let c = Collection::parse(
            r#"[{"id":"1","text":"x","tags":["home"],"priority":"high","status":"done","created":5,"due":"noon"}]"#,
        )
        .unwrap();
        assert_eq!(c.get("1").unwrap().extra.len(), 2);
        assert_eq!(
            c.canonical().unwrap(),
            r#"[{"id":"1","text":"x","priority":"high","status":"done","created":5,"due":"noon","tags":["home"]}]"#
        );
    }

    #[test]
    fn empty_value_is_empty_collection() {
        assert!(Collection::parse("").unwrap().is_empty());
        assert!(Collection::parse("  ").unwrap().is_empty());
        assert!(Collection::parse("[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_value_is_protocol_error() {
        let err = Collection::parse("{not json").unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        let err = Collection::parse(r#"{"id":"1"}"#).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let mut second = task("a");
        second.text = "other".into();
        let c = Collection::from_tasks(vec![task("a"), second, task("b")]);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get("a").unwrap().text, "task a");
    }

    #[test]
    fn push_refuses_duplicates() {
        let mut c = Collection::new();
        assert!(c.push(task("a")));
        assert!(!c.push(task("a")));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn new_ids_carry_creation_time() {
        let t = Task::new("x", Priority::High, 1_700_000_000_000);
        assert!(t.id.starts_with("1700000000000-"));
        assert_eq!(t.id.len(), "1700000000000-".len() + ID_SUFFIX_LEN);
        assert_ne!(new_task_id(1), new_task_id(1));
    }

    #[test]
    fn toggle_status_round_trips() {
        assert_eq!(Status::NotSet.toggled(), Status::Done);
        assert_eq!(Status::Done.toggled(), Status::NotSet);
    }
}
