use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::{definition::WorkflowDefinition, Result};

#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default)]
    workflows: Vec<WorkflowDefinition>,
}

/// Parse a YAML document with a top-level `workflows:` list.
pub fn parse_definitions(yaml: &str) -> Result<Vec<WorkflowDefinition>> {
    let file: DefinitionFile = serde_yaml::from_str(yaml)?;
    Ok(file.workflows)
}

pub async fn load_definitions(path: &Path) -> Result<Vec<WorkflowDefinition>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let definitions = parse_definitions(&contents)?;
    info!("Loaded {} workflow definitions from {}", definitions.len(), path.display());
    Ok(definitions)
}
