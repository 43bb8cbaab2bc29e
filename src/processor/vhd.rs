use super::{
    ArtifactDetails, BuildProcessor, Error, NfApplication, NfApplicationKind, ParameterBinding,
    ResourceElementTemplate,
};
use crate::artifact::{Artifact, ArtifactType, BlobStorageArtifact, LocalFileArtifact, ManifestArtifactFormat};
use crate::input::{InputArtifact, VhdFileInput, VhdSource};

/// Uploads a VHD image to the storage account artifact store.
pub struct VhdProcessor {
    name: String,
    input: VhdFileInput,
}

impl VhdProcessor {
    pub fn new(name: &str, input: VhdFileInput) -> Self {
        Self {
            name: name.to_string(),
            input,
        }
    }

    fn manifest_entry(&self) -> ManifestArtifactFormat {
        ManifestArtifactFormat::new(
            self.input.artifact_name(),
            ArtifactType::VhdImageFile,
            self.input.artifact_version(),
        )
    }
}

impl BuildProcessor for VhdProcessor {
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
        let artifact_name = self.input.artifact_name().to_string();
        let artifact_version = self.input.artifact_version().to_string();
        let artifact = match self.input.source() {
            VhdSource::LocalFile(path) => Artifact::LocalFileStorageAccount(LocalFileArtifact {
                artifact_name,
                artifact_type: ArtifactType::VhdImageFile,
                artifact_version,
                file_path: path.clone(),
            }),
            VhdSource::BlobSasUri(uri) => Artifact::BlobStorageAccount(BlobStorageArtifact {
                artifact_name,
                artifact_type: ArtifactType::VhdImageFile,
                artifact_version,
                blob_sas_uri: uri.clone(),
            }),
        };
        Ok(ArtifactDetails {
            artifacts: vec![artifact],
            supporting_files: vec![],
        })
    }

    fn generate_nf_application(&self) -> Result<NfApplication, Error> {
        Ok(NfApplication {
            name: self.name.clone(),
            kind: NfApplicationKind::VhdImageFile,
            artifact: self.manifest_entry(),
            deploy_parameters_schema: self.generate_params_schema()?,
            mappings: self.generate_values_mappings(ParameterBinding::DeployParameters)?,
        })
    }

    fn generate_resource_element_template(&self) -> Result<ResourceElementTemplate, Error> {
        Err(Error::NotSupported {
            processor: self.name.clone(),
            operation: "resource element template generation",
            reason: "NSDs cannot deploy VHDs directly",
        })
    }
}
