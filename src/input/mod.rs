use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;

pub mod arm;
pub mod helm;
pub mod nfd;
pub mod vhd;

pub use arm::ArmTemplateInput;
pub use helm::HelmChartInput;
pub use nfd::NfdInput;
pub use vhd::{VhdFileInput, VhdSource};

pub const JSON_SCHEMA_DRAFT: &str = "https://json-schema.org/draft-07/schema#";

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid file type {path}: expected a chart directory or a .tgz/.tar.gz archive")]
    InvalidFileType { path: PathBuf },

    #[error("no default values file found for {0}")]
    MissingDefaultValues(String),

    #[error("chart {chart} depends on {dependency}, which is not present in its charts/ directory")]
    MissingChartDependency { chart: String, dependency: String },

    #[error("generate schema for {name}: {reason}")]
    SchemaGeneration { name: String, reason: String },

    #[error("read {path}: {err}")]
    ReadFile { err: std::io::Error, path: PathBuf },

    #[error("parse JSON {path}: {err}")]
    Json { err: serde_json::Error, path: PathBuf },

    #[error("parse YAML {path}: {err}")]
    Yaml { err: serde_yaml::Error, path: PathBuf },

    #[error("extract {path}: tar exited with {status}")]
    Extract { path: PathBuf, status: ExitStatus },

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// A source definition that can be turned into deployable artifacts.
pub trait InputArtifact {
    fn artifact_name(&self) -> &str;

    fn artifact_version(&self) -> &str;

    /// JSON schema of the configurable parameters.
    fn get_schema(&self) -> Result<Value, Error>;

    /// Default values for (some of) the parameters in the schema.
    fn get_defaults(&self) -> Result<Map<String, Value>, Error>;
}

pub(crate) fn object_schema(properties: Map<String, Value>, required: Vec<String>) -> Value {
    json!({
        "$schema": JSON_SCHEMA_DRAFT,
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Infer a schema from an example value.
///
/// Objects recurse; when `required` is set every key of every object is listed as required.
pub(crate) fn infer_schema(value: &Value, required: bool) -> Value {
    match value {
        Value::Object(fields) => {
            let properties: Map<String, Value> = fields
                .iter()
                .map(|(key, field)| (key.clone(), infer_schema(field, required)))
                .collect();
            let required_keys: Vec<String> = if required {
                fields.keys().cloned().collect()
            } else {
                vec![]
            };
            json!({
                "type": "object",
                "properties": properties,
                "required": required_keys,
            })
        }
        Value::Array(_) => json!({"type": "array"}),
        Value::String(_) => json!({"type": "string"}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Number(n) if n.is_f64() => json!({"type": "number"}),
        Value::Number(_) => json!({"type": "integer"}),
        Value::Null => json!({"type": "null"}),
    }
}

pub(crate) fn read_to_string(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
        err,
        path: path.to_path_buf(),
    })
}

pub(crate) fn read_json(path: &Path) -> Result<Value, Error> {
    serde_json::from_str(&read_to_string(path)?).map_err(|err| Error::Json {
        err,
        path: path.to_path_buf(),
    })
}

/// Read a YAML (or JSON) document into a JSON value.
pub(crate) fn read_yaml(path: &Path) -> Result<Value, Error> {
    serde_yaml::from_str(&read_to_string(path)?).map_err(|err| Error::Yaml {
        err,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_nested_schema() {
        let schema = infer_schema(
            &json!({"replicas": 2, "image": {"repository": "nginx", "pullPolicy": null}, "ratio": 0.5}),
            true,
        );
        assert_eq!(schema["properties"]["replicas"]["type"], "integer");
        assert_eq!(schema["properties"]["ratio"]["type"], "number");
        assert_eq!(schema["properties"]["image"]["type"], "object");
        assert_eq!(
            schema["properties"]["image"]["properties"]["repository"]["type"],
            "string"
        );
        assert_eq!(schema["properties"]["image"]["required"], json!(["pullPolicy", "repository"]));
    }

    #[test]
    fn infer_optional_schema() {
        let schema = infer_schema(&json!({"a": {"b": true}}), false);
        assert_eq!(schema["required"], json!([]));
        assert_eq!(schema["properties"]["a"]["required"], json!([]));
        assert_eq!(schema["properties"]["a"]["properties"]["b"]["type"], "boolean");
    }
}
