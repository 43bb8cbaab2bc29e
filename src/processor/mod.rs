use crate::artifact::{Artifact, ManifestArtifactFormat};
use crate::input::{self, InputArtifact, JSON_SCHEMA_DRAFT};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use thiserror::Error;

pub mod arm;
pub mod helm;
pub mod nfd;
pub mod vhd;

pub use arm::ArmTemplateProcessor;
pub use helm::HelmChartProcessor;
pub use nfd::{NfReference, NfdProcessor};
pub use vhd::VhdProcessor;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{processor}: {operation} is not supported, {reason}")]
    NotSupported {
        processor: String,
        operation: &'static str,
        reason: &'static str,
    },

    #[error(transparent)]
    Input(#[from] input::Error),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What a required-but-unset parameter gets bound to in a generated mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterBinding {
    /// Deploy parameters of a network function definition version.
    DeployParameters,
    /// Configuration group values supplied when a network service is deployed.
    ConfigurationParameters,
}

impl ParameterBinding {
    pub fn expression(&self, name: &str, key: &str) -> String {
        match self {
            ParameterBinding::DeployParameters => format!("{{deployParameters.{name}.{key}}}"),
            ParameterBinding::ConfigurationParameters => {
                format!("{{configurationparameters('{name}').{key}}}")
            }
        }
    }
}

/// A file generated during the build that ships alongside a definition element.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    /// Relative to the element directory.
    pub path: PathBuf,
    pub contents: String,
}

impl LocalFile {
    pub fn json(path: impl Into<PathBuf>, value: &Value) -> Result<Self, Error> {
        Ok(Self {
            path: path.into(),
            contents: serde_json::to_string_pretty(value)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactDetails {
    pub artifacts: Vec<Artifact>,
    pub supporting_files: Vec<LocalFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NfApplicationKind {
    ArmTemplate,
    VhdImageFile,
    HelmPackage {
        release_name: String,
        release_namespace: String,
    },
}

/// One network function application of an NFD version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NfApplication {
    pub name: String,
    pub kind: NfApplicationKind,
    pub artifact: ManifestArtifactFormat,
    /// Schema of the deploy parameters this application consumes.
    pub deploy_parameters_schema: Value,
    /// Template parameters, VHD user configuration or Helm values, as applicable.
    pub mappings: Value,
}

impl NfApplication {
    pub fn artifact_type(&self) -> &'static str {
        match self.kind {
            NfApplicationKind::ArmTemplate => "ArmTemplate",
            NfApplicationKind::VhdImageFile => "VhdImageFile",
            NfApplicationKind::HelmPackage { .. } => "HelmPackage",
        }
    }

    pub fn is_arm_template(&self) -> bool {
        self.kind == NfApplicationKind::ArmTemplate
    }

    pub fn is_vhd(&self) -> bool {
        self.kind == NfApplicationKind::VhdImageFile
    }

    pub fn is_helm(&self) -> bool {
        matches!(self.kind, NfApplicationKind::HelmPackage { .. })
    }

    pub fn release_name(&self) -> &str {
        match &self.kind {
            NfApplicationKind::HelmPackage { release_name, .. } => release_name,
            _ => "",
        }
    }

    pub fn release_namespace(&self) -> &str {
        match &self.kind {
            NfApplicationKind::HelmPackage { release_namespace, .. } => release_namespace,
            _ => "",
        }
    }

    pub fn mappings_file(&self) -> String {
        format!("configMappings/{}-mappings.json", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceElementKind {
    ArmTemplate,
    NetworkFunctionDefinition,
}

/// One resource element of an NSD version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceElementTemplate {
    pub name: String,
    pub kind: ResourceElementKind,
    pub artifact: ManifestArtifactFormat,
    /// Configuration group schema for this element.
    pub configuration_schema: Value,
    pub parameter_values: Value,
}

impl ResourceElementTemplate {
    pub fn element_type(&self) -> &'static str {
        match self.kind {
            ResourceElementKind::ArmTemplate => "ArmResourceDefinition",
            ResourceElementKind::NetworkFunctionDefinition => "NetworkFunctionDefinition",
        }
    }

    pub fn mappings_file(&self) -> String {
        format!("configMappings/{}-mappings.json", self.name)
    }

    pub fn schema_file(&self) -> String {
        format!("schemas/{}.json", self.name)
    }
}

/// The capability every processor provides.
pub trait BuildProcessor {
    fn name(&self) -> &str;

    fn input_artifact(&self) -> &dyn InputArtifact;

    fn get_artifact_manifest_list(&self) -> Result<Vec<ManifestArtifactFormat>, Error>;

    fn get_artifact_details(&self) -> Result<ArtifactDetails, Error>;

    fn generate_nf_application(&self) -> Result<NfApplication, Error>;

    fn generate_resource_element_template(&self) -> Result<ResourceElementTemplate, Error>;

    /// Schema the generated parameters are derived from.
    fn source_schema(&self) -> Result<Value, Error> {
        Ok(self.input_artifact().get_schema()?)
    }

    fn generate_params_schema(&self) -> Result<Value, Error> {
        Ok(generate_params_schema(
            &self.source_schema()?,
            &self.input_artifact().get_defaults()?,
        ))
    }

    fn generate_values_mappings(&self, binding: ParameterBinding) -> Result<Value, Error> {
        Ok(Value::Object(generate_values_mappings(
            self.name(),
            &self.source_schema()?,
            self.input_artifact().get_defaults()?,
            binding,
        )))
    }
}

fn required_keys(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn is_object_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("object")
}

/// Build the schema of the parameters a deployer still has to supply.
///
/// Only properties that are required and have no value are exposed. Required
/// objects without a value are recursed into with no values, and their leaves
/// are lifted to the top level. Objects with a non-empty value are recursed
/// into with that value.
pub fn generate_params_schema(source_schema: &Value, values: &Map<String, Value>) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    collect_params(source_schema, values, &mut properties, &mut required);
    json!({
        "$schema": JSON_SCHEMA_DRAFT,
        "title": "DeployParametersSchema",
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn collect_params(
    source_schema: &Value,
    values: &Map<String, Value>,
    properties: &mut Map<String, Value>,
    required: &mut Vec<String>,
) {
    let Some(source_properties) = source_schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let source_required = required_keys(source_schema);

    for (key, property) in source_properties {
        let is_object = is_object_schema(property);
        if source_required.contains(&key.as_str()) && !values.contains_key(key) {
            if is_object {
                collect_params(property, &Map::new(), properties, required);
            } else {
                if !required.contains(key) {
                    required.push(key.clone());
                }
                properties.insert(key.clone(), property.clone());
            }
        }
        if let Some(Value::Object(nested)) = values.get(key) {
            if is_object && !nested.is_empty() {
                collect_params(property, nested, properties, required);
            }
        }
    }
}

/// Fill `mapping` with late-bound expressions for every required parameter it lacks.
///
/// Values already in the mapping are never replaced. Nested objects are filled
/// in when they are required and missing, or when they already hold a
/// non-empty value.
pub fn generate_values_mappings(
    name: &str,
    schema: &Value,
    mut mapping: Map<String, Value>,
    binding: ParameterBinding,
) -> Map<String, Value> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return mapping;
    };
    let required = required_keys(schema);

    for (key, property) in properties {
        let is_object = is_object_schema(property);
        if required.contains(&key.as_str()) && !mapping.contains_key(key) {
            let value = if is_object {
                Value::Object(generate_values_mappings(name, property, Map::new(), binding))
            } else {
                Value::String(binding.expression(name, key))
            };
            mapping.insert(key.clone(), value);
        } else if is_object {
            if let Some(Value::Object(nested)) = mapping.get_mut(key) {
                if !nested.is_empty() {
                    let filled = generate_values_mappings(name, property, std::mem::take(nested), binding);
                    *nested = filled;
                }
            }
        }
    }
    mapping
}
