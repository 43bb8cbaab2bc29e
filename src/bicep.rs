use crate::artifact::{ManifestArtifactFormat, StoreType};
use crate::processor::{NfApplication, ResourceElementTemplate};
use crate::HYBRID_NETWORK_API_VERSION;
use askama::Template;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("render {template}: {err}")]
    Render {
        template: &'static str,
        err: askama::Error,
    },
}

/// Publisher, artifact stores and the definition or design group.
#[derive(Template)]
#[template(path = "publisher_base.bicep", escape = "none")]
pub struct PublisherBase {
    pub api_version: &'static str,
    pub has_storage_account: bool,
    pub group_resource: &'static str,
}

impl PublisherBase {
    pub fn nf_definition_group(has_storage_account: bool) -> Self {
        Self {
            api_version: HYBRID_NETWORK_API_VERSION,
            has_storage_account,
            group_resource: "networkfunctiondefinitiongroups",
        }
    }

    pub fn ns_design_group() -> Self {
        Self {
            api_version: HYBRID_NETWORK_API_VERSION,
            has_storage_account: false,
            group_resource: "networkservicedesigngroups",
        }
    }
}

#[derive(Template)]
#[template(path = "artifact_manifest.bicep", escape = "none")]
pub struct ArtifactManifest {
    pub api_version: &'static str,
    pub acr_artifacts: Vec<ManifestArtifactFormat>,
    pub sa_artifacts: Vec<ManifestArtifactFormat>,
}

impl ArtifactManifest {
    /// Split manifest entries between the registry and the storage account.
    pub fn new(entries: Vec<ManifestArtifactFormat>) -> Self {
        let (sa_artifacts, acr_artifacts) = entries
            .into_iter()
            .partition(|entry| entry.store_type() == StoreType::AzureStorageAccount);
        Self {
            api_version: HYBRID_NETWORK_API_VERSION,
            acr_artifacts,
            sa_artifacts,
        }
    }
}

#[derive(Template)]
#[template(path = "nf_definition.bicep", escape = "none")]
pub struct NfDefinition {
    pub api_version: &'static str,
    pub nf_type: &'static str,
    pub nfvi_type: &'static str,
    pub has_storage_account: bool,
    pub applications: Vec<NfApplication>,
}

#[derive(Template)]
#[template(path = "ns_design.bicep", escape = "none")]
pub struct NsDesign {
    pub api_version: &'static str,
    /// Already a Bicep string literal.
    pub description: String,
    pub nfvi_type: &'static str,
    pub elements: Vec<ResourceElementTemplate>,
}

/// Quote `value` as a Bicep string literal.
pub fn string_literal(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace("${", "\\${");
    format!("'{escaped}'")
}

pub fn render(template: &impl Template, name: &'static str) -> Result<String, Error> {
    template.render().map_err(|err| Error::Render { template: name, err })
}

/// ARM deployment parameters file content for the given values.
pub fn parameters_file(values: &[(&str, &str)]) -> Value {
    let parameters: Map<String, Value> = values
        .iter()
        .map(|(key, value)| (key.to_string(), json!({"value": value})))
        .collect();
    json!({
        "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#",
        "contentVersion": "1.0.0.0",
        "parameters": parameters,
    })
}
