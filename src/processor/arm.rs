use super::{
    ArtifactDetails, BuildProcessor, Error, NfApplication, NfApplicationKind, ParameterBinding,
    ResourceElementKind, ResourceElementTemplate,
};
use crate::artifact::{Artifact, ArtifactType, LocalFileArtifact, ManifestArtifactFormat};
use crate::input::{ArmTemplateInput, InputArtifact};

/// Deploys an ARM template, either as an NF application or as an NSD resource element.
pub struct ArmTemplateProcessor {
    name: String,
    input: ArmTemplateInput,
}

impl ArmTemplateProcessor {
    pub fn new(name: &str, input: ArmTemplateInput) -> Self {
        Self {
            name: name.to_string(),
            input,
        }
    }

    fn manifest_entry(&self) -> ManifestArtifactFormat {
        ManifestArtifactFormat::new(
            self.input.artifact_name(),
            ArtifactType::ArmTemplate,
            self.input.artifact_version(),
        )
    }
}

impl BuildProcessor for ArmTemplateProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_artifact(&self) -> &dyn InputArtifact {
        &self.input
    }

    fn get_artifact_manifest_list(&self) -> Result<Vec<ManifestArtifactFormat>, Error> {
        Ok(vec![self.manifest_entry()])
    }

    fn get_artifact_details(&self) -> Result<ArtifactDetails, Error> {
        Ok(ArtifactDetails {
            artifacts: vec![Artifact::LocalFileAcr(LocalFileArtifact {
                artifact_name: self.input.artifact_name().to_string(),
                artifact_type: ArtifactType::ArmTemplate,
                artifact_version: self.input.artifact_version().to_string(),
                file_path: self.input.template_path().to_path_buf(),
            })],
            supporting_files: vec![],
        })
    }

    fn generate_nf_application(&self) -> Result<NfApplication, Error> {
        Ok(NfApplication {
            name: self.name.clone(),
            kind: NfApplicationKind::ArmTemplate,
            artifact: self.manifest_entry(),
            deploy_parameters_schema: self.generate_params_schema()?,
            mappings: self.generate_values_mappings(ParameterBinding::DeployParameters)?,
        })
    }

    fn generate_resource_element_template(&self) -> Result<ResourceElementTemplate, Error> {
        Ok(ResourceElementTemplate {
            name: self.name.clone(),
            kind: ResourceElementKind::ArmTemplate,
            artifact: self.manifest_entry(),
            configuration_schema: self.generate_params_schema()?,
            parameter_values: self.generate_values_mappings(ParameterBinding::ConfigurationParameters)?,
        })
    }
}
