use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Status domain shared by Epic and Story. `done` is reachable only through
/// the completion cascade driven by owned children; it is never set directly
/// by a plain `update_status` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Backlog,
    Ready,
    InProgress,
    Blocked,
    Review,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Ready,
    InProgress,
    Blocked,
    Review,
    Done,
    Cancelled,
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    #[serde(default = "crate::default_schema_version")]
    pub schema_version: u32,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub business_value: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub status: WorkItemStatus,
    #[serde(default)]
    pub estimated_effort: Option<f64>,
    #[serde(default)]
    pub actual_effort: Option<f64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub stories: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Epic {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("epic"),
            schema_version: crate::default_schema_version(),
            title: title.into(),
            description: description.into(),
            business_value: String::new(),
            acceptance_criteria: Vec::new(),
            priority: Priority::default(),
            status: WorkItemStatus::Backlog,
            estimated_effort: None,
            actual_effort: None,
            started_at: None,
            ended_at: None,
            tags: HashSet::new(),
            stories: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    #[serde(default = "crate::default_schema_version")]
    pub schema_version: u32,
    pub epic_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub user_story: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub status: WorkItemStatus,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub depends_on: HashSet<String>,
    #[serde(default)]
    pub estimated_effort: Option<f64>,
    #[serde(default)]
    pub actual_effort: Option<f64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    pub fn new(epic_id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("story"),
            schema_version: crate::default_schema_version(),
            epic_id: epic_id.into(),
            title: title.into(),
            description: description.into(),
            user_story: String::new(),
            acceptance_criteria: Vec::new(),
            priority: Priority::default(),
            status: WorkItemStatus::Backlog,
            tasks: Vec::new(),
            depends_on: HashSet::new(),
            estimated_effort: None,
            actual_effort: None,
            started_at: None,
            ended_at: None,
            tags: HashSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_micros: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default = "crate::default_schema_version")]
    pub schema_version: u32,
    pub story_id: String,
    pub epic_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub technical_detail: String,
    #[serde(default)]
    pub priority: Priority,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    #[serde(default)]
    pub estimated_input_tokens: u64,
    #[serde(default)]
    pub estimated_cost_micros: i64,
    #[serde(default)]
    pub actual_usage: Option<TaskUsage>,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub depends_on: HashSet<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        story_id: impl Into<String>,
        epic_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("task"),
            schema_version: crate::default_schema_version(),
            story_id: story_id.into(),
            epic_id: epic_id.into(),
            title: title.into(),
            description: description.into(),
            technical_detail: String::new(),
            priority: Priority::default(),
            status: TaskStatus::Backlog,
            assigned_agent_id: None,
            estimated_input_tokens: 0,
            estimated_cost_micros: 0,
            actual_usage: None,
            pipeline_id: None,
            depends_on: HashSet::new(),
            prerequisites: Vec::new(),
            tags: HashSet::new(),
            outputs: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Decorative only; the pipeline never reads or writes these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckItem {
    pub id: String,
    pub text: String,
    pub checked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub check_items: Vec<CheckItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Epic,
    Story,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Requires,
    Blocks,
    Relates,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// Derived projection over Epics/Stories/Tasks. Never persisted on its own;
/// rebuilt from the entity stores whenever the store needs to check acyclicity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl DependencyGraph {
    pub fn add_node(&mut self, id: impl Into<String>, kind: NodeKind) {
        let id = id.into();
        if !self.nodes.iter().any(|n| n.id == id) {
            self.nodes.push(GraphNode { id, kind });
        }
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) {
        self.edges.push(GraphEdge {
            from: from.into(),
            to: to.into(),
            kind,
        });
    }

    /// DFS-with-recursion-stack cycle check over `blocks` edges only.
    /// Returns the first cycle found as a list of node ids, innermost last.
    pub fn find_blocks_cycle(&self) -> Option<Vec<String>> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            if edge.kind == EdgeKind::Blocks {
                adjacency.entry(&edge.from).or_default().push(&edge.to);
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InStack,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            if let Some(mark) = marks.get(node) {
                return match mark {
                    Mark::InStack => {
                        let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(node.to_string());
                        Some(cycle)
                    }
                    Mark::Done => None,
                };
            }
            marks.insert(node, Mark::InStack);
            stack.push(node);
            if let Some(neighbors) = adjacency.get(node) {
                for next in neighbors {
                    if let Some(cycle) = visit(next, adjacency, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let node_ids: Vec<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        for node in node_ids {
            if !marks.contains_key(node) {
                if let Some(cycle) = visit(node, &adjacency, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acyclic_graph_reports_no_cycle() {
        let mut graph = DependencyGraph::default();
        graph.add_node("t1", NodeKind::Task);
        graph.add_node("t2", NodeKind::Task);
        graph.add_edge("t1", "t2", EdgeKind::Blocks);
        assert!(graph.find_blocks_cycle().is_none());
    }

    #[test]
    fn three_node_cycle_is_detected() {
        let mut graph = DependencyGraph::default();
        for id in ["t1", "t2", "t3"] {
            graph.add_node(id, NodeKind::Task);
        }
        graph.add_edge("t1", "t2", EdgeKind::Blocks);
        graph.add_edge("t2", "t3", EdgeKind::Blocks);
        graph.add_edge("t3", "t1", EdgeKind::Blocks);
        let cycle = graph.find_blocks_cycle().expect("cycle expected");
        assert!(cycle.len() >= 3);
    }

    #[test]
    fn relates_edges_never_trigger_cycle_detection() {
        let mut graph = DependencyGraph::default();
        graph.add_node("t1", NodeKind::Task);
        graph.add_node("t2", NodeKind::Task);
        graph.add_edge("t1", "t2", EdgeKind::Relates);
        graph.add_edge("t2", "t1", EdgeKind::Relates);
        assert!(graph.find_blocks_cycle().is_none());
    }
}
