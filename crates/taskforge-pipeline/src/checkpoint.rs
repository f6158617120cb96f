use std::path::PathBuf;

use taskforge_types::{OrchestratorError, Pipeline};

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, pipeline_id: &str) -> PathBuf {
        self.root.join("pipelines").join(format!("{pipeline_id}.json"))
    }

    pub async fn save(&self, pipeline: &Pipeline) -> Result<(), OrchestratorError> {
        taskforge_store::atomic_write_json(&self.path_for(&pipeline.id), pipeline).await
    }

    pub async fn load(&self, pipeline_id: &str) -> Result<Option<Pipeline>, OrchestratorError> {
        taskforge_store::read_json(&self.path_for(pipeline_id)).await
    }
}
