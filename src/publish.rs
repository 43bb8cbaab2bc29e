use crate::artifact::{Artifact, ArtifactType, StoreType};
use crate::azure::{self, ArtifactCredential, ContainerCredential, ManagementClient};
use crate::definition::{ArtifactElement, BicepElement, DefinitionElement, ElementHandler, PublishTarget};
use crate::upload::{self, RegistryClient};
use crate::{deploy, HYBRID_NETWORK_API_VERSION};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("deploy {element}: {err}")]
    Deploy { element: String, err: deploy::Error },

    #[error("azure: {0}")]
    Azure(#[from] azure::Error),

    #[error("upload: {0}")]
    Upload(#[from] upload::Error),

    #[error("no {0:?} artifact store configured for artifacts in {1}")]
    NoArtifactStore(StoreType, String),

    #[error("manifest {0} returned credentials for the wrong store type")]
    UnexpectedCredential(String),

    #[error("no storage container for artifact {0}")]
    NoContainer(String),

    #[error("deployment record {path}: {err}")]
    Record { err: String, path: PathBuf },
}

/// Written next to a Bicep template once it has been deployed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub deployment_name: String,
    pub resource_group: String,
}

/// Deploys definition elements with a management client and the upload tools.
pub struct Publisher<'a> {
    client: &'a dyn ManagementClient,
}

impl<'a> Publisher<'a> {
    pub fn new(client: &'a dyn ManagementClient) -> Self {
        Self { client }
    }

    async fn deploy_bicep(&self, target: &PublishTarget, element: &BicepElement) -> Result<(), Error> {
        let resource_group = &target.publisher_resource_group;
        let deployment_name = deploy::deploy_bicep(
            self.client,
            resource_group,
            &format!("aosm-{}", element.name),
            &element.template_path(),
            &element.parameters_path(),
        )
        .await
        .map_err(|err| Error::Deploy {
            element: element.name.clone(),
            err,
        })?;

        let record = DeploymentRecord {
            deployment_name,
            resource_group: resource_group.clone(),
        };
        let path = element.deployment_record_path();
        let contents = serde_json::to_string_pretty(&record).map_err(|err| Error::Record {
            err: err.to_string(),
            path: path.clone(),
        })?;
        std::fs::write(&path, contents).map_err(|err| Error::Record {
            err: err.to_string(),
            path,
        })?;
        info!("Deployed {} as {}", element.name, record.deployment_name);
        Ok(())
    }

    async fn delete_bicep(&self, element: &BicepElement) -> Result<(), Error> {
        let path = element.deployment_record_path();
        if !path.is_file() {
            warn!("{} was never deployed from this folder, skipping", element.name);
            return Ok(());
        }
        let record_error = |err: String| Error::Record { err, path: path.clone() };
        let contents = std::fs::read_to_string(&path).map_err(|err| record_error(err.to_string()))?;
        let record: DeploymentRecord = serde_json::from_str(&contents).map_err(|err| record_error(err.to_string()))?;

        let resources = self
            .client
            .deployment_output_resources(&record.resource_group, &record.deployment_name)
            .await?;
        for resource_id in deletion_order(resources) {
            info!("Deleting {resource_id}");
            self.client.delete_resource(&resource_id, HYBRID_NETWORK_API_VERSION).await?;
        }
        std::fs::remove_file(&path).map_err(|err| record_error(err.to_string()))?;
        Ok(())
    }

    async fn credential(&self, target: &PublishTarget, store_type: StoreType, element: &str) -> Result<ArtifactCredential, Error> {
        let manifest_id = target
            .manifest_id(self.client.subscription_id(), store_type)
            .ok_or_else(|| Error::NoArtifactStore(store_type, element.to_string()))?;
        debug!("Listing credentials for {manifest_id}");
        Ok(self.client.list_manifest_credential(&manifest_id).await?)
    }

    async fn upload_artifacts(&self, target: &PublishTarget, element: &ArtifactElement) -> Result<(), Error> {
        let (acr, storage): (Vec<&Artifact>, Vec<&Artifact>) = element
            .artifacts
            .iter()
            .partition(|artifact| artifact.store_type() == StoreType::AzureContainerRegistry);

        if !acr.is_empty() {
            let manifest = &target.acr_manifest_name;
            match self.credential(target, StoreType::AzureContainerRegistry, &element.name).await? {
                ArtifactCredential::ContainerRegistry {
                    username,
                    acr_token,
                    acr_server_url,
                    ..
                } => upload_to_registry(&acr, &username, &acr_token, upload::registry_host(&acr_server_url))?,
                ArtifactCredential::StorageAccount { .. } => return Err(Error::UnexpectedCredential(manifest.clone())),
            }
        }

        if !storage.is_empty() {
            let manifest = target.sa_manifest_name.clone().unwrap_or_default();
            match self.credential(target, StoreType::AzureStorageAccount, &element.name).await? {
                ArtifactCredential::StorageAccount { container_credentials } => {
                    upload_to_storage(&storage, &container_credentials)?
                }
                ArtifactCredential::ContainerRegistry { .. } => return Err(Error::UnexpectedCredential(manifest)),
            }
        }
        Ok(())
    }
}

/// Children before parents, so nested resources go first.
fn deletion_order(mut resources: Vec<String>) -> Vec<String> {
    resources.reverse();
    resources.sort_by_key(|id| std::cmp::Reverse(id.matches('/').count()));
    resources
}

fn upload_to_registry(artifacts: &[&Artifact], username: &str, token: &str, registry: &str) -> Result<(), upload::Error> {
    let needs_helm = artifacts.iter().any(|artifact| {
        matches!(artifact, Artifact::LocalFileAcr(file) if file.artifact_type == ArtifactType::OCIArtifact)
    });

    upload::login(RegistryClient::Oras, registry, username, token)?;
    let mut sessions = vec![RegistryClient::Oras];
    let logged_in = if needs_helm {
        upload::login(RegistryClient::Helm, registry, username, token).map(|()| sessions.push(RegistryClient::Helm))
    } else {
        Ok(())
    };

    let result = logged_in.and_then(|()| {
        artifacts.iter().try_for_each(|artifact| match artifact {
            Artifact::LocalFileAcr(file) if file.artifact_type == ArtifactType::OCIArtifact => {
                upload::helm_push(&file.file_path, registry)
            }
            Artifact::LocalFileAcr(file) => {
                upload::oras_push(registry, &file.artifact_name, &file.artifact_version, &file.file_path)
            }
            Artifact::RemoteAcr(image) => upload::oras_copy(
                &image.source_reference(),
                &format!("{registry}/{}:{}", image.artifact_name, image.artifact_version),
            ),
            Artifact::LocalFileStorageAccount(_) | Artifact::BlobStorageAccount(_) => Ok(()),
        })
    });
    end_sessions(&sessions, result, |client| upload::logout(client, registry))
}

/// Log out of every opened session, newest first. Logout failures are only
/// logged so the upload result is what gets reported.
fn end_sessions(
    sessions: &[RegistryClient],
    result: Result<(), upload::Error>,
    logout: impl Fn(RegistryClient) -> Result<(), upload::Error>,
) -> Result<(), upload::Error> {
    for client in sessions.iter().rev() {
        if let Err(err) = logout(*client) {
            warn!("{err}");
        }
    }
    result
}

/// Storage containers are named after the artifact; fall back to the only one there is.
fn container_for<'c>(containers: &'c [ContainerCredential], artifact_name: &str) -> Option<&'c ContainerCredential> {
    let wanted = artifact_name.to_lowercase();
    containers
        .iter()
        .find(|container| container.container_name.starts_with(&wanted))
        .or(match containers {
            [only] => Some(only),
            _ => None,
        })
}

fn upload_to_storage(artifacts: &[&Artifact], containers: &[ContainerCredential]) -> Result<(), Error> {
    for artifact in artifacts {
        let container = container_for(containers, artifact.artifact_name())
            .ok_or_else(|| Error::NoContainer(artifact.artifact_name().to_string()))?;
        let blob_name = format!("{}-{}.vhd", artifact.artifact_name(), artifact.artifact_version());
        let destination = upload::blob_url(&container.container_sas_uri, &blob_name);
        match artifact {
            Artifact::LocalFileStorageAccount(file) => {
                upload::azcopy(&file.file_path.to_string_lossy(), &destination)?
            }
            Artifact::BlobStorageAccount(blob) => upload::azcopy(&blob.blob_sas_uri, &destination)?,
            Artifact::LocalFileAcr(_) | Artifact::RemoteAcr(_) => {}
        }
    }
    Ok(())
}

#[async_trait]
impl ElementHandler for Publisher<'_> {
    type Error = Error;

    async fn deploy(&self, target: &PublishTarget, element: &DefinitionElement) -> Result<(), Error> {
        match element {
            DefinitionElement::Bicep(bicep) => self.deploy_bicep(target, bicep).await,
            DefinitionElement::Artifact(artifacts) => self.upload_artifacts(target, artifacts).await,
        }
    }

    async fn delete(&self, _target: &PublishTarget, element: &DefinitionElement) -> Result<(), Error> {
        match element {
            DefinitionElement::Bicep(bicep) => self.delete_bicep(bicep).await,
            DefinitionElement::Artifact(artifacts) => {
                debug!("Artifacts in {} are removed with their manifest", artifacts.name);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::fake::FakeClient;

    fn bicep_element(dir: &std::path::Path) -> BicepElement {
        BicepElement {
            name: "nfDefinition".into(),
            path: dir.to_path_buf(),
            only_delete_on_clean: false,
        }
    }

    fn target() -> PublishTarget {
        PublishTarget {
            publisher_name: "contoso".into(),
            publisher_resource_group: "contoso-rg".into(),
            acr_artifact_store_name: "contoso-acr".into(),
            acr_manifest_name: "ubuntu-acr-manifest-1-0-0".into(),
            sa_artifact_store_name: None,
            sa_manifest_name: None,
        }
    }

    #[test]
    fn nested_resources_are_deleted_first() {
        let publisher = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.HybridNetwork/publishers/contoso";
        let store = format!("{publisher}/artifactStores/acr");
        let group = format!("{publisher}/networkFunctionDefinitionGroups/ubuntu");
        assert_eq!(
            deletion_order(vec![publisher.to_string(), store.clone(), group.clone()]),
            vec![group, store, publisher.to_string()]
        );
    }

    #[test]
    fn containers_match_artifact_names() {
        let containers = vec![
            ContainerCredential {
                container_name: "ubuntu-vhd-1-0-0".into(),
                container_sas_uri: "https://sa/ubuntu-vhd-1-0-0?sig=1".into(),
            },
            ContainerCredential {
                container_name: "other-1-0-0".into(),
                container_sas_uri: "https://sa/other-1-0-0?sig=2".into(),
            },
        ];
        assert_eq!(container_for(&containers, "Ubuntu-VHD").unwrap().container_name, "ubuntu-vhd-1-0-0");
        assert!(container_for(&containers, "missing").is_none());
        assert!(container_for(&containers[..1], "missing").is_some());
    }

    #[test]
    fn upload_error_survives_failed_logouts() {
        let logged_out = std::sync::Mutex::new(vec![]);
        let exit_status = |code: i32| {
            std::process::Command::new("sh")
                .arg("-c")
                .arg(format!("exit {code}"))
                .status()
                .unwrap()
        };
        let result = end_sessions(
            &[RegistryClient::Oras, RegistryClient::Helm],
            Err(upload::Error::Copy("docker.io/library/nginx:1.25".into(), exit_status(3))),
            |client| {
                logged_out.lock().unwrap().push(client);
                Err(upload::Error::Logout("oras", exit_status(4)))
            },
        );
        assert!(matches!(result, Err(upload::Error::Copy(ref source, _)) if source == "docker.io/library/nginx:1.25"));
        assert_eq!(*logged_out.lock().unwrap(), vec![RegistryClient::Helm, RegistryClient::Oras]);

        let result = end_sessions(&[RegistryClient::Oras], Ok(()), |_| {
            Err(upload::Error::Logout("oras", exit_status(4)))
        });
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn delete_without_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient::default();
        let publisher = Publisher::new(&client);
        publisher
            .delete(&target(), &DefinitionElement::Bicep(bicep_element(dir.path())))
            .await
            .unwrap();
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_deployed_resources() {
        let dir = tempfile::tempdir().unwrap();
        let element = bicep_element(dir.path());
        let record = DeploymentRecord {
            deployment_name: "aosm-nfDefinition-20240301123005".into(),
            resource_group: "contoso-rg".into(),
        };
        std::fs::write(element.deployment_record_path(), serde_json::to_string(&record).unwrap()).unwrap();

        let client = FakeClient::default();
        *client.output_resources.lock().unwrap() = vec!["/a".into(), "/a/b".into()];
        let publisher = Publisher::new(&client);
        publisher
            .delete(&target(), &DefinitionElement::Bicep(element.clone()))
            .await
            .unwrap();
        assert_eq!(
            client.calls(),
            vec![
                "outputs contoso-rg/aosm-nfDefinition-20240301123005",
                "delete /a/b",
                "delete /a",
            ]
        );
        assert!(!element.deployment_record_path().exists());
    }

    #[tokio::test]
    async fn storage_artifacts_need_a_storage_account() {
        let element = ArtifactElement {
            name: "artifacts".into(),
            path: PathBuf::from("artifacts"),
            artifacts: vec![Artifact::BlobStorageAccount(crate::artifact::BlobStorageArtifact {
                artifact_name: "ubuntu-vhd".into(),
                artifact_type: ArtifactType::VhdImageFile,
                artifact_version: "1.0.0".into(),
                blob_sas_uri: "https://source/vhd?sig=1".into(),
            })],
            only_delete_on_clean: false,
        };
        let client = FakeClient::default();
        let err = Publisher::new(&client)
            .deploy(&target(), &DefinitionElement::Artifact(element))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoArtifactStore(StoreType::AzureStorageAccount, _)));
    }
}
