//! Local edits to a day's collection.
//!
//! Each mutation reads the cached collection (never a fresh fetch), produces
//! the next collection, and the engine writes it back to the cache and to the
//! store in one step.

use crate::{
    record_key::RecordKey,
    sync_error::SyncError,
    task::{new_task_id, Collection, Priority, Task, TaskId},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    Add { text: String, priority: Priority },
    Toggle { id: TaskId },
    Delete { id: TaskId },
}

impl Mutation {
    pub fn add(text: impl Into<String>, priority: Priority) -> Self {
        Mutation::Add {
            text: text.into(),
            priority,
        }
    }

    pub fn toggle(id: impl Into<TaskId>) -> Self {
        Mutation::Toggle { id: id.into() }
    }

    pub fn delete(id: impl Into<TaskId>) -> Self {
        Mutation::Delete { id: id.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Add { .. } => "add",
            Mutation::Toggle { .. } => "toggle",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// Result of applying a mutation to a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    pub collection: Collection,
    /// The task that was added, toggled or removed.
    pub task_id: TaskId,
}

/// Computes the next collection for `key`.
///
/// `current` is the cached collection, if any. Adding to an absent entry
/// starts from an empty collection; toggling or deleting against one is
/// `TaskNotFound`. Blank text yields `Ok(None)`: nothing to do.
pub fn apply(
    key: &RecordKey,
    current: Option<&Collection>,
    mutation: &Mutation,
    now: u64,
) -> Result<Option<Applied>, SyncError> {
    let not_found = |id: &str| SyncError::TaskNotFound {
        id: id.to_string(),
        key: key.to_string(),
    };

    match mutation {
        Mutation::Add { text, priority } => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            let mut next = current.cloned().unwrap_or_default();
            let mut task = Task::new(text, *priority, now);
            while next.contains(&task.id) {
                task.id = new_task_id(now);
            }
            let task_id = task.id.clone();
            next.push(task);
            Ok(Some(Applied {
                collection: next,
                task_id,
            }))
        }
        Mutation::Toggle { id } => {
            let mut next = current.cloned().ok_or_else(|| not_found(id))?;
            let task = next.get_mut(id).ok_or_else(|| not_found(id))?;
            task.status = task.status.toggled();
            Ok(Some(Applied {
                collection: next,
                task_id: id.clone(),
            }))
        }
        Mutation::Delete { id } => {
            let mut next = current.cloned().ok_or_else(|| not_found(id))?;
            next.remove(id).ok_or_else(|| not_found(id))?;
            Ok(Some(Applied {
                collection: next,
                task_id: id.clone(),
            }))
        }
    }
}

/// Read-before-write resolution after a conflict: start from the store's
/// copy, let our cached version of each task win, and append tasks only we
/// know about.
pub fn merge_for_retry(remote: &Collection, local: &Collection) -> Collection {
    let mut merged = Vec::with_capacity(remote.len().max(local.len()));
    for t in remote.iter() {
        merged.push(local.get(&t.id).unwrap_or(t).clone());
    }
    for t in local.iter() {
        if !remote.contains(&t.id) {
            merged.push(t.clone());
        }
    }
    Collection::from_tasks(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Status;

    fn key() -> RecordKey {
        RecordKey::parse("todos-20250101").unwrap()
    }

    fn added(current: Option<&Collection>, text: &str, now: u64) -> Applied {
        apply(&key(), current, &Mutation::add(text, Priority::Low), now)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn add_on_absent_cache_starts_empty() {
        let a = added(None, "  buy milk ", 1_000);
        assert_eq!(a.collection.len(), 1);
        let t = &a.collection.tasks()[0];
        assert_eq!(t.text, "buy milk");
        assert_eq!(t.priority, Priority::Low);
        assert_eq!(t.status, Status::NotSet);
        assert_eq!(t.created, 1_000);
        assert_eq!(t.id, a.task_id);
    }

    #[test]
    fn blank_text_is_ignored() {
        let r = apply(&key(), None, &Mutation::add("   ", Priority::High), 1).unwrap();
        assert!(r.is_none());
    }

    #[test]
    fn sequential_adds_both_land_with_unique_ids() {
        let first = added(None, "one", 5);
        let second = added(Some(&first.collection), "two", 5);
        assert_eq!(second.collection.len(), 2);
        assert_ne!(first.task_id, second.task_id);
        assert!(second.collection.contains(&first.task_id));
    }

    #[test]
    fn toggle_flips_and_flips_back() {
        let a = added(None, "x", 1);
        let once = apply(&key(), Some(&a.collection), &Mutation::toggle(&a.task_id), 2)
            .unwrap()
            .unwrap();
        assert_eq!(once.collection.get(&a.task_id).unwrap().status, Status::Done);
        let twice = apply(&key(), Some(&once.collection), &Mutation::toggle(&a.task_id), 3)
            .unwrap()
            .unwrap();
        assert_eq!(twice.collection.get(&a.task_id).unwrap().status, Status::NotSet);
    }

    #[test]
    fn toggle_and_delete_report_missing_tasks() {
        let err = apply(&key(), None, &Mutation::toggle("nope"), 1).unwrap_err();
        assert!(matches!(err, SyncError::TaskNotFound { .. }));

        let a = added(None, "x", 1);
        let err = apply(&key(), Some(&a.collection), &Mutation::delete("nope"), 1).unwrap_err();
        assert_eq!(
            err,
            SyncError::TaskNotFound {
                id: "nope".into(),
                key: "todos-20250101".into()
            }
        );
    }

    #[test]
    fn delete_removes_without_tombstone() {
        let a = added(None, "x", 1);
        let b = added(Some(&a.collection), "y", 2);
        let d = apply(&key(), Some(&b.collection), &Mutation::delete(&a.task_id), 3)
            .unwrap()
            .unwrap();
        assert_eq!(d.collection.len(), 1);
        assert!(!d.collection.contains(&a.task_id));
        assert!(!d.collection.canonical().unwrap().contains(&a.task_id));
    }

    #[test]
    fn merge_keeps_local_versions_and_local_only_tasks() {
        let shared = added(None, "shared", 1);
        let shared_id = shared.task_id.clone();

        let remote = added(Some(&shared.collection), "remote only", 2).collection;
        let mut local = added(Some(&shared.collection), "local only", 3).collection;
        local.get_mut(&shared_id).unwrap().status = Status::Done;

        let merged = merge_for_retry(&remote, &local);
        let texts: Vec<&str> = merged.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["shared", "remote only", "local only"]);
        assert_eq!(merged.get(&shared_id).unwrap().status, Status::Done);
    }
}
