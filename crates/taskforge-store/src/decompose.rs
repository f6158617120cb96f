use taskforge_types::{DependencyGraph, Epic, NodeKind, Story, Task};

#[derive(Debug, Clone)]
pub struct DecomposeRisk {
    pub code: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct DecomposeProposal {
    pub stories: Vec<Story>,
    pub tasks: Vec<Task>,
    pub dependency_graph: DependencyGraph,
    pub estimated_total_effort: f64,
    pub estimated_total_cost_micros: i64,
    pub risks: Vec<DecomposeRisk>,
}

const HIGH_STORY_COUNT_THRESHOLD: usize = 8;
const HIGH_COST_THRESHOLD_MICROS: i64 = 50_000_000; // $50.00 in micro-currency

/// Template-based, deterministic proposal from an Epic's title/description.
/// Produces a proposal only — the caller persists explicitly via the store.
/// A later revision may replace this with an LLM call without changing the
/// return shape.
pub fn decompose(epic: &Epic) -> DecomposeProposal {
    let lines: Vec<&str> = epic
        .description
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let story_chunks: Vec<&str> = if lines.is_empty() {
        vec![epic.title.as_str()]
    } else {
        lines
    };

    let mut stories = Vec::new();
    let mut tasks = Vec::new();
    let mut graph = DependencyGraph::default();
    graph.add_node(&epic.id, NodeKind::Epic);

    let mut previous_story_id: Option<String> = None;
    for (index, chunk) in story_chunks.iter().enumerate() {
        let mut story = Story::new(
            epic.id.clone(),
            format!("{} — part {}", epic.title, index + 1),
            (*chunk).to_string(),
        );
        story.priority = epic.priority;
        graph.add_node(&story.id, NodeKind::Story);

        if let Some(prev) = &previous_story_id {
            story.depends_on.insert(prev.clone());
            graph.add_edge(prev.clone(), story.id.clone(), taskforge_types::EdgeKind::Requires);
        }

        let design_task = Task::new(story.id.clone(), epic.id.clone(), format!("Design: {chunk}"), chunk.to_string());
        let implement_task = Task::new(
            story.id.clone(),
            epic.id.clone(),
            format!("Implement: {chunk}"),
            chunk.to_string(),
        );
        let validate_task = Task::new(
            story.id.clone(),
            epic.id.clone(),
            format!("Validate: {chunk}"),
            chunk.to_string(),
        );

        graph.add_node(&design_task.id, NodeKind::Task);
        graph.add_node(&implement_task.id, NodeKind::Task);
        graph.add_node(&validate_task.id, NodeKind::Task);
        graph.add_edge(&design_task.id, &implement_task.id, taskforge_types::EdgeKind::Blocks);
        graph.add_edge(&implement_task.id, &validate_task.id, taskforge_types::EdgeKind::Blocks);

        story.tasks = vec![design_task.id.clone(), implement_task.id.clone(), validate_task.id.clone()];

        let mut implement_task = implement_task;
        implement_task.depends_on.insert(design_task.id.clone());
        let mut validate_task = validate_task;
        validate_task.depends_on.insert(implement_task.id.clone());

        previous_story_id = Some(story.id.clone());
        stories.push(story);
        tasks.push(design_task);
        tasks.push(implement_task);
        tasks.push(validate_task);
    }

    let estimated_total_effort = tasks.len() as f64 * 0.5;
    let estimated_total_cost_micros = tasks.len() as i64 * 250_000; // cheap flat placeholder per task

    let mut risks = Vec::new();
    if graph.find_blocks_cycle().is_some() {
        risks.push(DecomposeRisk {
            code: "cycle_present",
            detail: "proposed dependency graph contains a blocks cycle".to_string(),
        });
    }
    if stories.len() > HIGH_STORY_COUNT_THRESHOLD {
        risks.push(DecomposeRisk {
            code: "high_story_count",
            detail: format!("{} stories proposed (threshold {})", stories.len(), HIGH_STORY_COUNT_THRESHOLD),
        });
    }
    if estimated_total_cost_micros > HIGH_COST_THRESHOLD_MICROS {
        risks.push(DecomposeRisk {
            code: "high_total_cost",
            detail: format!(
                "estimated cost {estimated_total_cost_micros} micros exceeds threshold {HIGH_COST_THRESHOLD_MICROS}"
            ),
        });
    }

    DecomposeProposal {
        stories,
        tasks,
        dependency_graph: graph,
        estimated_total_effort,
        estimated_total_cost_micros,
        risks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompose_produces_three_tasks_per_story_line() {
        let mut epic = Epic::new("Ship the thing", "line one\nline two");
        epic.id = "epic-1".to_string();
        let proposal = decompose(&epic);
        assert_eq!(proposal.stories.len(), 2);
        assert_eq!(proposal.tasks.len(), 6);
    }

    #[test]
    fn decompose_is_deterministic() {
        let epic = Epic::new("Ship the thing", "only one line");
        let a = decompose(&epic);
        let b = decompose(&epic);
        assert_eq!(a.stories.len(), b.stories.len());
        assert_eq!(a.tasks.len(), b.tasks.len());
    }

    #[test]
    fn proposed_graph_is_acyclic() {
        let epic = Epic::new("Ship it", "a\nb\nc");
        let proposal = decompose(&epic);
        assert!(proposal.dependency_graph.find_blocks_cycle().is_none());
        assert!(proposal.risks.iter().all(|r| r.code != "cycle_present"));
    }
}
