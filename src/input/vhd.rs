use super::{Error, InputArtifact, JSON_SCHEMA_DRAFT};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

/// Where the VHD image comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum VhdSource {
    LocalFile(PathBuf),
    BlobSasUri(String),
}

/// A virtual hard disk image. The schema is fixed.
#[derive(Debug, Clone)]
pub struct VhdFileInput {
    artifact_name: String,
    artifact_version: String,
    source: VhdSource,
    default_config: Map<String, Value>,
}

impl VhdFileInput {
    pub fn new(name: &str, version: &str, source: VhdSource, default_config: Map<String, Value>) -> Self {
        Self {
            artifact_name: name.to_string(),
            artifact_version: version.to_string(),
            source,
            default_config,
        }
    }

    pub fn source(&self) -> &VhdSource {
        &self.source
    }
}

impl InputArtifact for VhdFileInput {
    fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    fn artifact_version(&self) -> &str {
        &self.artifact_version
    }

    fn get_schema(&self) -> Result<Value, Error> {
        Ok(json!({
            "$schema": JSON_SCHEMA_DRAFT,
            "type": "object",
            "properties": {
                "imageName": {"type": "string"},
                "azureDeployLocation": {"type": "string"},
            },
            "required": ["imageName"],
        }))
    }

    fn get_defaults(&self) -> Result<Map<String, Value>, Error> {
        Ok(self.default_config.clone())
    }
}
