use std::cmp::Ordering;

use crate::{
    record_key::RecordKey,
    sync_error::SyncError,
    task::{Collection, Priority, Task},
};

/// Receives what the engine wants shown.
///
/// Called from the session loop; implementations must not block.
pub trait Renderer: Send {
    /// `tasks` is already in display order. `changed` is false when the
    /// collection is identical to what was last shown for `key`.
    fn render(&mut self, key: &RecordKey, tasks: &[Task], changed: bool);

    /// The session ended; nothing more will be rendered.
    fn disconnected(&mut self, reason: &SyncError);

    /// Something failed without ending the session.
    fn report(&mut self, _err: &SyncError) {}
}

/// Not-done first, then high priority, then oldest, then id.
pub fn display_cmp(a: &Task, b: &Task) -> Ordering {
    a.status
        .is_done()
        .cmp(&b.status.is_done())
        .then_with(|| priority_rank(a.priority).cmp(&priority_rank(b.priority)))
        .then_with(|| a.created.cmp(&b.created))
        .then_with(|| a.id.cmp(&b.id))
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::High => 0,
        Priority::Low => 1,
    }
}

pub fn display_order(collection: &Collection) -> Vec<Task> {
    let mut tasks = collection.tasks().to_vec();
    tasks.sort_by(display_cmp);
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Status;

    fn task(id: &str, priority: Priority, status: Status, created: u64) -> Task {
        Task {
            id: id.into(),
            text: id.into(),
            priority,
            status,
            created,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn orders_by_status_priority_then_age() {
        let c = Collection::from_tasks(vec![
            task("done-high", Priority::High, Status::Done, 1),
            task("low-old", Priority::Low, Status::NotSet, 1),
            task("high-new", Priority::High, Status::NotSet, 9),
            task("low-new", Priority::Low, Status::NotSet, 5),
            task("high-old", Priority::High, Status::NotSet, 2),
        ]);
        let ids: Vec<String> = display_order(&c).into_iter().map(|t| t.id).collect();
        assert_eq!(
            ids,
            vec!["high-old", "high-new", "low-old", "low-new", "done-high"]
        );
    }

    #[test]
    fn ties_fall_back_to_id() {
        let c = Collection::from_tasks(vec![
            task("b", Priority::Low, Status::NotSet, 1),
            task("a", Priority::Low, Status::NotSet, 1),
        ]);
        let ids: Vec<String> = display_order(&c).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
