use super::{
    ArtifactDetails, BuildProcessor, Error, NfApplication, NfApplicationKind, ParameterBinding,
    ResourceElementTemplate,
};
use crate::artifact::{Artifact, ArtifactType, LocalFileArtifact, ManifestArtifactFormat, RemoteAcrArtifact};
use crate::input::{HelmChartInput, InputArtifact};

/// Publishes a Helm chart and the images its values reference.
pub struct HelmChartProcessor {
    name: String,
    input: HelmChartInput,
    source_registry: String,
    source_registry_namespace: String,
    release_namespace: String,
}

impl HelmChartProcessor {
    pub fn new(
        name: &str,
        input: HelmChartInput,
        source_registry: &str,
        source_registry_namespace: &str,
        release_namespace: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            input,
            source_registry: source_registry.to_string(),
            source_registry_namespace: source_registry_namespace.to_string(),
            release_namespace: release_namespace.to_string(),
        }
    }

    fn chart_entry(&self) -> ManifestArtifactFormat {
        ManifestArtifactFormat::new(
            self.input.artifact_name(),
            ArtifactType::OCIArtifact,
            self.input.artifact_version(),
        )
    }
}

impl BuildProcessor for HelmChartProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_artifact(&self) -> &dyn InputArtifact {
        &self.input
    }

    fn get_artifact_manifest_list(&self) -> Result<Vec<ManifestArtifactFormat>, Error> {
        let mut entries = vec![self.chart_entry()];
        entries.extend(
            self.input
                .images()?
                .into_iter()
                .map(|image| ManifestArtifactFormat::new(&image.name, ArtifactType::OCIArtifact, &image.tag)),
        );
        Ok(entries)
    }

    fn get_artifact_details(&self) -> Result<ArtifactDetails, Error> {
        let mut artifacts = vec![Artifact::LocalFileAcr(LocalFileArtifact {
            artifact_name: self.input.artifact_name().to_string(),
            artifact_type: ArtifactType::OCIArtifact,
            artifact_version: self.input.artifact_version().to_string(),
            file_path: self.input.source_path().to_path_buf(),
        })];
        artifacts.extend(self.input.images()?.into_iter().map(|image| {
            Artifact::RemoteAcr(RemoteAcrArtifact {
                artifact_name: image.name,
                artifact_type: ArtifactType::OCIArtifact,
                artifact_version: image.tag,
                source_registry: self.source_registry.clone(),
                source_registry_namespace: self.source_registry_namespace.clone(),
            })
        }));
        Ok(ArtifactDetails {
            artifacts,
            supporting_files: vec![],
        })
    }

    fn generate_nf_application(&self) -> Result<NfApplication, Error> {
        Ok(NfApplication {
            name: self.name.clone(),
            kind: NfApplicationKind::HelmPackage {
                release_name: self.name.clone(),
                release_namespace: self.release_namespace.clone(),
            },
            artifact: self.chart_entry(),
            deploy_parameters_schema: self.generate_params_schema()?,
            mappings: self.generate_values_mappings(ParameterBinding::DeployParameters)?,
        })
    }

    fn generate_resource_element_template(&self) -> Result<ResourceElementTemplate, Error> {
        Err(Error::NotSupported {
            processor: self.name.clone(),
            operation: "resource element template generation",
            reason: "NSDs cannot deploy Helm charts directly",
        })
    }
}
