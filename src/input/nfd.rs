use super::{read_json, Error, InputArtifact};
use serde_json::{Map, Value};
use std::path::Path;

/// A published network function definition version, seen through its deploy parameters.
#[derive(Debug, Clone)]
pub struct NfdInput {
    artifact_name: String,
    artifact_version: String,
    deploy_parameters: Value,
}

impl NfdInput {
    /// `deploy_parameters` may be the schema itself or the JSON string the service stores.
    pub fn new(name: &str, version: &str, deploy_parameters: Value) -> Result<Self, Error> {
        let deploy_parameters = match deploy_parameters {
            Value::String(raw) => serde_json::from_str(&raw).map_err(|err| Error::SchemaGeneration {
                name: name.to_string(),
                reason: format!("deploy parameters are not valid JSON: {err}"),
            })?,
            other => other,
        };
        if !deploy_parameters.is_object() {
            return Err(Error::SchemaGeneration {
                name: name.to_string(),
                reason: "deploy parameters must be a JSON object".into(),
            });
        }
        Ok(Self {
            artifact_name: name.to_string(),
            artifact_version: version.to_string(),
            deploy_parameters,
        })
    }

    /// Read the `deployParameters.json` of a locally built NFD.
    pub fn from_file(name: &str, version: &str, path: &Path) -> Result<Self, Error> {
        Self::new(name, version, read_json(path)?)
    }
}

impl InputArtifact for NfdInput {
    fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    fn artifact_version(&self) -> &str {
        &self.artifact_version
    }

    fn get_schema(&self) -> Result<Value, Error> {
        Ok(self.deploy_parameters.clone())
    }

    fn get_defaults(&self) -> Result<Map<String, Value>, Error> {
        Ok(Map::new())
    }
}
