use super::{
    ArtifactDetails, BuildProcessor, Error, LocalFile, NfApplication, ResourceElementKind,
    ResourceElementTemplate,
};
use crate::artifact::{Artifact, ArtifactType, LocalFileArtifact, ManifestArtifactFormat};
use crate::config::NfType;
use crate::input::{InputArtifact, NfdInput, JSON_SCHEMA_DRAFT};
use crate::HYBRID_NETWORK_API_VERSION;
use serde_json::{json, Value};

/// Where the referenced network function definition version is published.
#[derive(Debug, Clone, PartialEq)]
pub struct NfReference {
    pub publisher: String,
    pub publisher_resource_group: String,
    pub nf_definition_group: String,
    pub version: String,
    pub nf_type: NfType,
}

/// Wraps a published NFD in an ARM template that an NSD can deploy.
pub struct NfdProcessor {
    name: String,
    input: NfdInput,
    reference: NfReference,
    template_version: String,
}

impl NfdProcessor {
    pub fn new(name: &str, input: NfdInput, reference: NfReference, template_version: &str) -> Self {
        Self {
            name: name.to_string(),
            input,
            reference,
            template_version: template_version.to_string(),
        }
    }

    fn template_artifact_name(&self) -> String {
        format!("{}-nf-template", self.name)
    }

    fn template_file_name(&self) -> String {
        format!("{}.json", self.template_artifact_name())
    }

    fn manifest_entry(&self) -> ManifestArtifactFormat {
        ManifestArtifactFormat::new(
            &self.template_artifact_name(),
            ArtifactType::ArmTemplate,
            &self.template_version,
        )
    }

    /// ARM template deploying one network function from the referenced NFD version.
    pub fn nf_template(&self) -> Value {
        let reference = &self.reference;
        let nfdv_id = format!(
            "[resourceId('{}', 'Microsoft.HybridNetwork/publishers/networkfunctiondefinitiongroups/networkfunctiondefinitionversions', '{}', '{}', '{}')]",
            reference.publisher_resource_group,
            reference.publisher,
            reference.nf_definition_group,
            reference.version,
        );
        json!({
            "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
            "contentVersion": "1.0.0.0",
            "parameters": {
                "location": {"type": "string"},
                "nfviId": {"type": "string"},
                "deploymentParameters": {"type": "object"},
            },
            "resources": [{
                "type": "Microsoft.HybridNetwork/networkFunctions",
                "apiVersion": HYBRID_NETWORK_API_VERSION,
                "name": format!("{}-nf", self.name),
                "location": "[parameters('location')]",
                "properties": {
                    "networkFunctionDefinitionVersionResourceReference": {
                        "idType": "Open",
                        "id": nfdv_id,
                    },
                    "nfviType": reference.nf_type.nfvi_type(),
                    "nfviId": "[parameters('nfviId')]",
                    "allowSoftwareUpdate": true,
                    "configurationType": "Open",
                    "deploymentValues": "[string(parameters('deploymentParameters'))]",
                },
            }],
        })
    }
}

impl BuildProcessor for NfdProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_artifact(&self) -> &dyn InputArtifact {
        &self.input
    }

    /// The NF template's own parameters, with the NFD deploy parameters nested inside.
    fn source_schema(&self) -> Result<Value, Error> {
        let mut deploy_parameters = self.input.get_schema()?;
        if let Value::Object(fields) = &mut deploy_parameters {
            fields.remove("$schema");
            fields.insert("type".into(), json!("object"));
        }
        Ok(json!({
            "$schema": JSON_SCHEMA_DRAFT,
            "type": "object",
            "properties": {
                "location": {"type": "string"},
                "nfviId": {"type": "string"},
                "deploymentParameters": deploy_parameters,
            },
            "required": ["deploymentParameters", "location", "nfviId"],
        }))
    }

    fn get_artifact_manifest_list(&self) -> Result<Vec<ManifestArtifactFormat>, Error> {
        Ok(vec![self.manifest_entry()])
    }

    fn get_artifact_details(&self) -> Result<ArtifactDetails, Error> {
        let file_name = self.template_file_name();
        Ok(ArtifactDetails {
            artifacts: vec![Artifact::LocalFileAcr(LocalFileArtifact {
                artifact_name: self.template_artifact_name(),
                artifact_type: ArtifactType::ArmTemplate,
                artifact_version: self.template_version.clone(),
                file_path: file_name.clone().into(),
            })],
            supporting_files: vec![LocalFile::json(file_name, &self.nf_template())?],
        })
    }

    fn generate_nf_application(&self) -> Result<NfApplication, Error> {
        Err(Error::NotSupported {
            processor: self.name.clone(),
            operation: "NF application generation",
            reason: "a network function definition cannot contain another one",
        })
    }

    fn generate_resource_element_template(&self) -> Result<ResourceElementTemplate, Error> {
        Ok(ResourceElementTemplate {
            name: self.name.clone(),
            kind: ResourceElementKind::NetworkFunctionDefinition,
            artifact: self.manifest_entry(),
            configuration_schema: self.generate_params_schema()?,
            parameter_values: self.generate_values_mappings(super::ParameterBinding::ConfigurationParameters)?,
        })
    }
}
