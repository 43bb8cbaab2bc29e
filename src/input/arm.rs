use super::{infer_schema, object_schema, read_json, Error, InputArtifact};
use log::{debug, warn};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// An ARM template whose declared `parameters` form the input schema.
#[derive(Debug, Clone)]
pub struct ArmTemplateInput {
    artifact_name: String,
    artifact_version: String,
    template_path: PathBuf,
    template: Value,
}

/// Map an ARM parameter type onto a JSON schema type.
fn json_type(arm_type: &str) -> Option<&'static str> {
    match arm_type.to_lowercase().as_str() {
        "string" | "securestring" => Some("string"),
        "int" => Some("integer"),
        "bool" => Some("boolean"),
        "array" => Some("array"),
        "object" | "secureobject" => Some("object"),
        _ => None,
    }
}

impl ArmTemplateInput {
    pub fn from_file(name: &str, version: &str, template_path: &Path) -> Result<Self, Error> {
        debug!("Reading ARM template {}", template_path.display());
        let template = read_json(template_path)?;
        Ok(Self::new(name, version, template_path, template))
    }

    pub fn new(name: &str, version: &str, template_path: &Path, template: Value) -> Self {
        Self {
            artifact_name: name.to_string(),
            artifact_version: version.to_string(),
            template_path: template_path.to_path_buf(),
            template,
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    fn parameters(&self) -> Option<&Map<String, Value>> {
        self.template.get("parameters").and_then(Value::as_object)
    }
}

impl InputArtifact for ArmTemplateInput {
    fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    fn artifact_version(&self) -> &str {
        &self.artifact_version
    }

    fn get_schema(&self) -> Result<Value, Error> {
        let Some(parameters) = self.parameters() else {
            warn!(
                "ARM template {} declares no parameters, its schema is empty",
                self.template_path.display()
            );
            return Ok(object_schema(Map::new(), vec![]));
        };

        let mut properties = Map::new();
        let mut required = Vec::new();
        for (key, parameter) in parameters {
            let arm_type = parameter
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::SchemaGeneration {
                    name: self.artifact_name.clone(),
                    reason: format!("parameter {key} has no type"),
                })?;
            let schema_type = json_type(arm_type).ok_or_else(|| Error::SchemaGeneration {
                name: self.artifact_name.clone(),
                reason: format!("parameter {key} has unsupported type {arm_type}"),
            })?;

            let default = parameter.get("defaultValue");
            let property = match default {
                Some(object @ Value::Object(_)) if schema_type == "object" => infer_schema(object, false),
                _ => json!({"type": schema_type}),
            };
            if default.is_none() {
                required.push(key.clone());
            }
            properties.insert(key.clone(), property);
        }

        Ok(object_schema(properties, required))
    }

    fn get_defaults(&self) -> Result<Map<String, Value>, Error> {
        Ok(self
            .parameters()
            .map(|parameters| {
                parameters
                    .iter()
                    .filter_map(|(key, parameter)| {
                        parameter
                            .get("defaultValue")
                            .map(|default| (key.clone(), default.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(template: Value) -> ArmTemplateInput {
        ArmTemplateInput::new("ubuntu-template", "1.0.0", Path::new("ubuntu.json"), template)
    }

    #[test]
    fn required_iff_no_default() {
        let schema = input(json!({
            "parameters": {
                "adminUsername": {"type": "string"},
                "adminPassword": {"type": "securestring", "defaultValue": "x"},
            }
        }))
        .get_schema()
        .unwrap();

        assert_eq!(schema["properties"]["adminUsername"], json!({"type": "string"}));
        assert_eq!(schema["properties"]["adminPassword"], json!({"type": "string"}));
        assert_eq!(schema["required"], json!(["adminUsername"]));
    }

    #[test]
    fn arm_types_are_mapped() {
        let schema = input(json!({
            "parameters": {
                "count": {"type": "int"},
                "enabled": {"type": "Bool"},
                "subnets": {"type": "array"},
                "secrets": {"type": "secureObject"},
            }
        }))
        .get_schema()
        .unwrap();

        assert_eq!(schema["properties"]["count"]["type"], "integer");
        assert_eq!(schema["properties"]["enabled"]["type"], "boolean");
        assert_eq!(schema["properties"]["subnets"]["type"], "array");
        assert_eq!(schema["properties"]["secrets"]["type"], "object");
    }

    #[test]
    fn object_defaults_become_nested_properties() {
        let arm = input(json!({
            "parameters": {
                "network": {
                    "type": "object",
                    "defaultValue": {"vnetName": "vnet", "subnet": {"prefix": "10.0.0.0/24"}}
                }
            }
        }));
        let schema = arm.get_schema().unwrap();
        let network = &schema["properties"]["network"];
        assert_eq!(network["type"], "object");
        assert_eq!(network["properties"]["vnetName"]["type"], "string");
        assert_eq!(network["properties"]["subnet"]["properties"]["prefix"]["type"], "string");
        assert_eq!(schema["required"], json!([]));

        let defaults = arm.get_defaults().unwrap();
        assert_eq!(defaults["network"]["vnetName"], "vnet");
    }

    #[test]
    fn template_without_parameters_has_empty_schema() {
        let arm = input(json!({"resources": []}));
        let schema = arm.get_schema().unwrap();
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["required"], json!([]));
        assert!(arm.get_defaults().unwrap().is_empty());
    }

    #[test]
    fn unsupported_type_fails_schema_generation() {
        let err = input(json!({"parameters": {"when": {"type": "datetime"}}}))
            .get_schema()
            .unwrap_err();
        assert!(matches!(err, Error::SchemaGeneration { .. }));
        assert!(err.to_string().contains("datetime"));
    }
}
