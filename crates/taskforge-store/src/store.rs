use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use taskforge_types::{
    DependencyGraph, EdgeKind, Epic, NodeKind, OrchestratorError, Priority, Story, Task,
    TaskStatus, WorkItemStatus,
};

use crate::paths::StorePaths;
use crate::persist::{atomic_write_json, read_json};

pub struct Store {
    paths: StorePaths,
    epics: Arc<RwLock<HashMap<String, Epic>>>,
    stories: Arc<RwLock<HashMap<String, Story>>>,
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl Store {
    /// Loads every existing record under `root` into memory. Safe to call
    /// against an empty/non-existent directory.
    pub async fn load(root: impl Into<std::path::PathBuf>) -> Result<Self, OrchestratorError> {
        let paths = StorePaths::new(root);
        let epics = load_all(&paths.epics_dir()).await?;
        let stories = load_all(&paths.stories_dir()).await?;
        let tasks = load_all(&paths.tasks_dir()).await?;
        info!(
            epics = epics.len(),
            stories = stories.len(),
            tasks = tasks.len(),
            "task store loaded"
        );
        Ok(Self {
            paths,
            epics: Arc::new(RwLock::new(epics)),
            stories: Arc::new(RwLock::new(stories)),
            tasks: Arc::new(RwLock::new(tasks)),
        })
    }

    pub async fn create_epic(&self, epic: Epic) -> Result<Epic, OrchestratorError> {
        atomic_write_json(&self.paths.epic_file(&epic.id), &epic).await?;
        self.epics.write().await.insert(epic.id.clone(), epic.clone());
        Ok(epic)
    }

    pub async fn create_story(&self, story: Story) -> Result<Story, OrchestratorError> {
        let mut epics = self.epics.write().await;
        let epic = epics
            .get_mut(&story.epic_id)
            .ok_or_else(|| OrchestratorError::Validation(format!("epic {} does not exist", story.epic_id)))?;
        // Parent and child mutation happen within this single write-guard
        // window: the child is durable before the parent back-reference is,
        // and the parent is written last so it never dangles.
        atomic_write_json(&self.paths.story_file(&story.id), &story).await?;
        epic.stories.push(story.id.clone());
        epic.updated_at = Utc::now();
        atomic_write_json(&self.paths.epic_file(&epic.id), &*epic).await?;
        self.stories.write().await.insert(story.id.clone(), story.clone());
        Ok(story)
    }

    pub async fn create_task(&self, task: Task) -> Result<Task, OrchestratorError> {
        let mut stories = self.stories.write().await;
        let story = stories
            .get_mut(&task.story_id)
            .ok_or_else(|| OrchestratorError::Validation(format!("story {} does not exist", task.story_id)))?;
        if story.epic_id != task.epic_id {
            return Err(OrchestratorError::Validation(format!(
                "task epic {} does not match story's epic {}",
                task.epic_id, story.epic_id
            )));
        }
        atomic_write_json(&self.paths.task_file(&task.id), &task).await?;
        story.tasks.push(task.id.clone());
        story.updated_at = Utc::now();
        atomic_write_json(&self.paths.story_file(&story.id), &*story).await?;
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Adds `depends_on` as a dependency of `task_id` (i.e. a `blocks` edge
    /// `depends_on -> task_id`). Rejected without mutation if it would close
    /// a cycle.
    pub async fn add_task_dependency(&self, task_id: &str, depends_on: &str) -> Result<(), OrchestratorError> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(depends_on) {
            return Err(OrchestratorError::Validation(format!("task {depends_on} does not exist")));
        }
        let graph = self.build_dependency_graph(&tasks).await;
        let mut proposed = graph;
        proposed.add_edge(depends_on, task_id, EdgeKind::Blocks);
        if let Some(cycle) = proposed.find_blocks_cycle() {
            return Err(OrchestratorError::Validation(format!(
                "adding dependency would close a cycle: {}",
                cycle.join(" -> ")
            )));
        }

        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| OrchestratorError::Validation(format!("task {task_id} does not exist")))?;
        task.depends_on.insert(depends_on.to_string());
        task.updated_at = Utc::now();
        atomic_write_json(&self.paths.task_file(task_id), &*task).await?;
        Ok(())
    }

    async fn build_dependency_graph(&self, tasks: &HashMap<String, Task>) -> DependencyGraph {
        let mut graph = DependencyGraph::default();
        for task in tasks.values() {
            graph.add_node(&task.id, NodeKind::Task);
        }
        for task in tasks.values() {
            for dep in &task.depends_on {
                graph.add_edge(dep, &task.id, EdgeKind::Blocks);
            }
        }
        graph
    }

    /// Transitions a Task into `ready`, enforcing that every dependency is
    /// already `done`. Prerequisite strings are an external concern this
    /// store does not evaluate.
    pub async fn mark_task_ready(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let mut tasks = self.tasks.write().await;
        let deps: Vec<String> = {
            let task = tasks
                .get(task_id)
                .ok_or_else(|| OrchestratorError::Validation(format!("task {task_id} does not exist")))?;
            task.depends_on.iter().cloned().collect()
        };
        for dep in &deps {
            let done = tasks.get(dep).map(|t| t.status == TaskStatus::Done).unwrap_or(false);
            if !done {
                return Err(OrchestratorError::Validation(format!(
                    "task {task_id} cannot become ready: dependency {dep} is not done"
                )));
            }
        }
        let task = tasks.get_mut(task_id).expect("checked above");
        task.status = TaskStatus::Ready;
        task.updated_at = Utc::now();
        atomic_write_json(&self.paths.task_file(task_id), &*task).await?;
        Ok(())
    }

    /// Marks a Task `done` and cascades completion up to its Story and Epic
    /// when every sibling has also completed.
    pub async fn complete_task(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let story_id = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| OrchestratorError::Validation(format!("task {task_id} does not exist")))?;
            task.status = TaskStatus::Done;
            task.updated_at = Utc::now();
            atomic_write_json(&self.paths.task_file(task_id), &*task).await?;
            task.story_id.clone()
        };
        self.recheck_story_completion(&story_id).await
    }

    async fn recheck_story_completion(&self, story_id: &str) -> Result<(), OrchestratorError> {
        let (all_done, epic_id) = {
            let tasks = self.tasks.read().await;
            let stories = self.stories.read().await;
            let story = stories
                .get(story_id)
                .ok_or_else(|| OrchestratorError::Validation(format!("story {story_id} does not exist")))?;
            let all_done = !story.tasks.is_empty()
                && story
                    .tasks
                    .iter()
                    .all(|id| tasks.get(id).map(|t| t.status == TaskStatus::Done).unwrap_or(false));
            (all_done, story.epic_id.clone())
        };

        if !all_done {
            return Ok(());
        }

        {
            let mut stories = self.stories.write().await;
            let story = stories.get_mut(story_id).expect("checked above");
            story.status = WorkItemStatus::Done;
            story.ended_at = Some(Utc::now());
            story.updated_at = Utc::now();
            atomic_write_json(&self.paths.story_file(story_id), &*story).await?;
        }
        debug!(story_id, "story advanced to done, rechecking epic");
        self.recheck_epic_completion(&epic_id).await
    }

    async fn recheck_epic_completion(&self, epic_id: &str) -> Result<(), OrchestratorError> {
        let all_done = {
            let stories = self.stories.read().await;
            let epics = self.epics.read().await;
            let epic = epics
                .get(epic_id)
                .ok_or_else(|| OrchestratorError::Validation(format!("epic {epic_id} does not exist")))?;
            !epic.stories.is_empty()
                && epic
                    .stories
                    .iter()
                    .all(|id| stories.get(id).map(|s| s.status == WorkItemStatus::Done).unwrap_or(false))
        };

        if !all_done {
            return Ok(());
        }

        let mut epics = self.epics.write().await;
        let epic = epics.get_mut(epic_id).expect("checked above");
        epic.status = WorkItemStatus::Done;
        epic.ended_at = Some(Utc::now());
        epic.updated_at = Utc::now();
        atomic_write_json(&self.paths.epic_file(epic_id), &*epic).await?;
        Ok(())
    }

    /// Pure projection: Tasks in {ready, backlog} whose dependencies are all
    /// done, sorted critical > high > normal > low then by creation order.
    pub async fn ready_tasks(&self, priority_filter: Option<Priority>) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut ready: Vec<Task> = tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Ready | TaskStatus::Backlog))
            .filter(|t| priority_filter.map(|p| p == t.priority).unwrap_or(true))
            .filter(|t| {
                t.depends_on
                    .iter()
                    .all(|dep| tasks.get(dep).map(|d| d.status == TaskStatus::Done).unwrap_or(false))
            })
            .cloned()
            .collect();
        ready.sort_by(|a, b| priority_rank(b.priority).cmp(&priority_rank(a.priority)).then(a.created_at.cmp(&b.created_at)));
        ready
    }

    pub async fn get_epic(&self, id: &str) -> Option<Epic> {
        self.epics.read().await.get(id).cloned()
    }

    pub async fn get_story(&self, id: &str) -> Option<Story> {
        self.stories.read().await.get(id).cloned()
    }

    pub async fn get_task(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Deleting an Epic is forbidden while any owned Task is not terminal.
    pub async fn delete_epic(&self, id: &str) -> Result<(), OrchestratorError> {
        let epics = self.epics.read().await;
        let epic = epics
            .get(id)
            .ok_or_else(|| OrchestratorError::Validation(format!("epic {id} does not exist")))?;
        let stories = self.stories.read().await;
        let tasks = self.tasks.read().await;
        for story_id in &epic.stories {
            if let Some(story) = stories.get(story_id) {
                for task_id in &story.tasks {
                    if let Some(task) = tasks.get(task_id) {
                        if !matches!(task.status, TaskStatus::Done | TaskStatus::Cancelled) {
                            return Err(OrchestratorError::Validation(format!(
                                "cannot delete epic {id}: task {task_id} is not terminal"
                            )));
                        }
                    }
                }
            }
        }
        drop(tasks);
        drop(stories);
        drop(epics);
        self.epics.write().await.remove(id);
        let _ = tokio::fs::remove_file(self.paths.epic_file(id)).await;
        Ok(())
    }
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::Critical => 3,
        Priority::High => 2,
        Priority::Normal => 1,
        Priority::Low => 0,
    }
}

async fn load_all<T: serde::de::DeserializeOwned>(
    dir: &std::path::Path,
) -> Result<HashMap<String, T>, OrchestratorError>
where
    T: HasId,
{
    let mut out = HashMap::new();
    if !dir.exists() {
        return Ok(out);
    }
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(value) = read_json::<T>(&path).await? {
            out.insert(value.id().to_string(), value);
        }
    }
    Ok(out)
}

trait HasId {
    fn id(&self) -> &str;
}

impl HasId for Epic {
    fn id(&self) -> &str {
        &self.id
    }
}

impl HasId for Story {
    fn id(&self) -> &str {
        &self.id
    }
}

impl HasId for Task {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn new_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load(dir.path().to_path_buf()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn creating_story_requires_existing_epic() {
        let (store, _dir) = new_store().await;
        let story = Story::new("missing-epic", "title", "desc");
        let err = store.create_story(story).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn story_appears_on_epic_after_creation() {
        let (store, _dir) = new_store().await;
        let epic = store.create_epic(Epic::new("Epic", "desc")).await.unwrap();
        let story = store
            .create_story(Story::new(epic.id.clone(), "Story", "desc"))
            .await
            .unwrap();
        let reloaded = store.get_epic(&epic.id).await.unwrap();
        assert!(reloaded.stories.contains(&story.id));
    }

    #[tokio::test]
    async fn completing_every_task_cascades_to_story_and_epic() {
        let (store, _dir) = new_store().await;
        let epic = store.create_epic(Epic::new("Epic", "desc")).await.unwrap();
        let story = store
            .create_story(Story::new(epic.id.clone(), "Story", "desc"))
            .await
            .unwrap();
        let task = store
            .create_task(Task::new(story.id.clone(), epic.id.clone(), "Task", "desc"))
            .await
            .unwrap();
        store.complete_task(&task.id).await.unwrap();
        let story = store.get_story(&story.id).await.unwrap();
        assert_eq!(story.status, WorkItemStatus::Done);
        let epic = store.get_epic(&epic.id).await.unwrap();
        assert_eq!(epic.status, WorkItemStatus::Done);
        assert!(epic.ended_at.is_some());
    }

    #[tokio::test]
    async fn cyclical_dependency_is_rejected_and_store_unchanged() {
        let (store, _dir) = new_store().await;
        let epic = store.create_epic(Epic::new("Epic", "desc")).await.unwrap();
        let story = store
            .create_story(Story::new(epic.id.clone(), "Story", "desc"))
            .await
            .unwrap();
        let t1 = store
            .create_task(Task::new(story.id.clone(), epic.id.clone(), "T1", "d"))
            .await
            .unwrap();
        let t2 = store
            .create_task(Task::new(story.id.clone(), epic.id.clone(), "T2", "d"))
            .await
            .unwrap();
        let t3 = store
            .create_task(Task::new(story.id.clone(), epic.id.clone(), "T3", "d"))
            .await
            .unwrap();

        store.add_task_dependency(&t2.id, &t1.id).await.unwrap();
        store.add_task_dependency(&t3.id, &t2.id).await.unwrap();
        let err = store.add_task_dependency(&t1.id, &t3.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let t1_reloaded = store.get_task(&t1.id).await.unwrap();
        assert!(t1_reloaded.depends_on.is_empty());
    }

    #[tokio::test]
    async fn ready_tasks_excludes_tasks_with_unmet_dependencies() {
        let (store, _dir) = new_store().await;
        let epic = store.create_epic(Epic::new("Epic", "desc")).await.unwrap();
        let story = store
            .create_story(Story::new(epic.id.clone(), "Story", "desc"))
            .await
            .unwrap();
        let mut blocker = Task::new(story.id.clone(), epic.id.clone(), "Blocker", "d");
        blocker.status = TaskStatus::Ready;
        let blocker = store.create_task(blocker).await.unwrap();
        let mut blocked = Task::new(story.id.clone(), epic.id.clone(), "Blocked", "d");
        blocked.status = TaskStatus::Backlog;
        let blocked = store.create_task(blocked).await.unwrap();
        store.add_task_dependency(&blocked.id, &blocker.id).await.unwrap();

        let ready = store.ready_tasks(None).await;
        assert!(ready.iter().any(|t| t.id == blocker.id));
        assert!(!ready.iter().any(|t| t.id == blocked.id));
    }

    #[tokio::test]
    async fn ready_tasks_sorted_by_priority_descending() {
        let (store, _dir) = new_store().await;
        let epic = store.create_epic(Epic::new("Epic", "desc")).await.unwrap();
        let story = store
            .create_story(Story::new(epic.id.clone(), "Story", "desc"))
            .await
            .unwrap();
        let mut low = Task::new(story.id.clone(), epic.id.clone(), "Low", "d");
        low.priority = Priority::Low;
        low.status = TaskStatus::Backlog;
        store.create_task(low).await.unwrap();
        let mut critical = Task::new(story.id.clone(), epic.id.clone(), "Critical", "d");
        critical.priority = Priority::Critical;
        critical.status = TaskStatus::Backlog;
        store.create_task(critical).await.unwrap();

        let ready = store.ready_tasks(None).await;
        assert_eq!(ready[0].priority, Priority::Critical);
    }

    #[tokio::test]
    async fn delete_epic_rejected_while_task_not_terminal() {
        let (store, _dir) = new_store().await;
        let epic = store.create_epic(Epic::new("Epic", "desc")).await.unwrap();
        let story = store
            .create_story(Story::new(epic.id.clone(), "Story", "desc"))
            .await
            .unwrap();
        store
            .create_task(Task::new(story.id.clone(), epic.id.clone(), "Task", "d"))
            .await
            .unwrap();
        let err = store.delete_epic(&epic.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }
}
