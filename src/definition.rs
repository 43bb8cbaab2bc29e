//! Definition folders: the on-disk output of a build and the input of publish/delete.
//!
//! A folder holds an `index.json` listing its elements in deploy order, a
//! `target.json` naming the publisher and artifact stores, and one directory
//! per element. Bicep elements contain `deploy.bicep` and its parameters file;
//! artifact elements contain `artifacts.json`.

use crate::artifact::{self, Artifact, StoreType};
use crate::processor::LocalFile;
use async_trait::async_trait;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const INDEX_FILE: &str = "index.json";
pub const TARGET_FILE: &str = "target.json";
pub const TEMPLATE_FILE: &str = "deploy.bicep";
pub const PARAMETERS_FILE: &str = "deploy.parameters.json";
pub const ARTIFACTS_FILE: &str = "artifacts.json";
pub const DEPLOYMENT_RECORD_FILE: &str = "deployment.json";

#[derive(Error, Debug)]
pub enum Error {
    #[error("output folder {0} already exists, use --force to overwrite it")]
    OutputExists(PathBuf),

    #[error("read {path}: {err}")]
    ReadFile { err: std::io::Error, path: PathBuf },

    #[error("write {path}: {err}")]
    WriteFile { err: std::io::Error, path: PathBuf },

    #[error("parse {path}: {err}")]
    Json { err: serde_json::Error, path: PathBuf },

    #[error("{path}: {err}")]
    Artifact { err: artifact::Error, path: PathBuf },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Bicep,
    Artifact,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub only_delete_on_clean: bool,
}

/// Publisher and artifact stores a definition folder is published into.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub publisher_name: String,
    pub publisher_resource_group: String,
    pub acr_artifact_store_name: String,
    pub acr_manifest_name: String,
    #[serde(default)]
    pub sa_artifact_store_name: Option<String>,
    #[serde(default)]
    pub sa_manifest_name: Option<String>,
}

impl PublishTarget {
    pub fn artifact_store_id(&self, subscription: &str, store_type: StoreType) -> Option<String> {
        let store = match store_type {
            StoreType::AzureContainerRegistry => &self.acr_artifact_store_name,
            StoreType::AzureStorageAccount => self.sa_artifact_store_name.as_ref()?,
        };
        Some(format!(
            "/subscriptions/{subscription}/resourceGroups/{}/providers/Microsoft.HybridNetwork/publishers/{}/artifactStores/{store}",
            self.publisher_resource_group, self.publisher_name,
        ))
    }

    pub fn manifest_id(&self, subscription: &str, store_type: StoreType) -> Option<String> {
        let manifest = match store_type {
            StoreType::AzureContainerRegistry => &self.acr_manifest_name,
            StoreType::AzureStorageAccount => self.sa_manifest_name.as_ref()?,
        };
        Some(format!(
            "{}/artifactManifests/{manifest}",
            self.artifact_store_id(subscription, store_type)?
        ))
    }
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let contents = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
        err,
        path: path.to_path_buf(),
    })?;
    serde_json::from_str(&contents).map_err(|err| Error::Json {
        err,
        path: path.to_path_buf(),
    })
}

fn write_file(path: &Path, contents: &str) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| Error::WriteFile {
            err,
            path: parent.to_path_buf(),
        })?;
    }
    std::fs::write(path, contents).map_err(|err| Error::WriteFile {
        err,
        path: path.to_path_buf(),
    })
}

fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let contents = serde_json::to_string_pretty(value).map_err(|err| Error::Json {
        err,
        path: path.to_path_buf(),
    })?;
    write_file(path, &contents)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementPayload {
    Bicep { template: String, parameters: Value },
    Artifacts(Vec<Artifact>),
}

/// Writes one element directory.
#[derive(Debug, Clone)]
pub struct DefinitionElementBuilder {
    name: String,
    payload: ElementPayload,
    only_delete_on_clean: bool,
    supporting_files: Vec<LocalFile>,
}

impl DefinitionElementBuilder {
    pub fn bicep(name: &str, template: String, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            payload: ElementPayload::Bicep {
                template,
                parameters,
            },
            only_delete_on_clean: false,
            supporting_files: vec![],
        }
    }

    pub fn artifacts(name: &str, artifacts: Vec<Artifact>) -> Self {
        Self {
            name: name.to_string(),
            payload: ElementPayload::Artifacts(artifacts),
            only_delete_on_clean: false,
            supporting_files: vec![],
        }
    }

    /// Mark the element as shared infrastructure that survives an ordinary delete.
    pub fn only_delete_on_clean(mut self) -> Self {
        self.only_delete_on_clean = true;
        self
    }

    pub fn with_supporting_files(mut self, files: Vec<LocalFile>) -> Self {
        self.supporting_files.extend(files);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            name: self.name.clone(),
            element_type: match self.payload {
                ElementPayload::Bicep { .. } => ElementType::Bicep,
                ElementPayload::Artifacts(_) => ElementType::Artifact,
            },
            only_delete_on_clean: self.only_delete_on_clean,
        }
    }

    pub fn write(&self, folder: &Path) -> Result<(), Error> {
        let dir = folder.join(&self.name);
        debug!("Writing definition element {}", dir.display());
        std::fs::create_dir_all(&dir).map_err(|err| Error::WriteFile {
            err,
            path: dir.clone(),
        })?;

        match &self.payload {
            ElementPayload::Bicep {
                template,
                parameters,
            } => {
                write_file(&dir.join(TEMPLATE_FILE), template)?;
                write_json_file(&dir.join(PARAMETERS_FILE), parameters)?;
            }
            ElementPayload::Artifacts(artifacts) => {
                write_json_file(&dir.join(ARTIFACTS_FILE), artifacts)?;
            }
        }
        for file in &self.supporting_files {
            write_file(&dir.join(&file.path), &file.contents)?;
        }
        Ok(())
    }
}

/// Writes a whole definition folder.
#[derive(Debug, Clone)]
pub struct DefinitionFolderBuilder {
    path: PathBuf,
    target: PublishTarget,
    elements: Vec<DefinitionElementBuilder>,
}

impl DefinitionFolderBuilder {
    pub fn new(path: &Path, target: PublishTarget) -> Self {
        Self {
            path: path.to_path_buf(),
            target,
            elements: vec![],
        }
    }

    pub fn add_element(&mut self, element: DefinitionElementBuilder) {
        self.elements.push(element);
    }

    pub fn elements(&self) -> &[DefinitionElementBuilder] {
        &self.elements
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, force: bool) -> Result<(), Error> {
        if self.path.exists() {
            if !force {
                return Err(Error::OutputExists(self.path.clone()));
            }
            info!("Removing existing output folder {}", self.path.display());
            std::fs::remove_dir_all(&self.path).map_err(|err| Error::WriteFile {
                err,
                path: self.path.clone(),
            })?;
        }

        for element in &self.elements {
            element.write(&self.path)?;
        }
        let index: Vec<IndexEntry> = self.elements.iter().map(|e| e.index_entry()).collect();
        write_json_file(&self.path.join(INDEX_FILE), &index)?;
        write_json_file(&self.path.join(TARGET_FILE), &self.target)?;
        info!("Definition written to {}", self.path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BicepElement {
    pub name: String,
    pub path: PathBuf,
    pub only_delete_on_clean: bool,
}

impl BicepElement {
    pub fn template_path(&self) -> PathBuf {
        self.path.join(TEMPLATE_FILE)
    }

    pub fn parameters_path(&self) -> PathBuf {
        self.path.join(PARAMETERS_FILE)
    }

    pub fn deployment_record_path(&self) -> PathBuf {
        self.path.join(DEPLOYMENT_RECORD_FILE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactElement {
    pub name: String,
    pub path: PathBuf,
    pub artifacts: Vec<Artifact>,
    pub only_delete_on_clean: bool,
}

impl ArtifactElement {
    fn read(name: &str, path: PathBuf, only_delete_on_clean: bool) -> Result<Self, Error> {
        let artifacts_path = path.join(ARTIFACTS_FILE);
        let records: Vec<Value> = read_json_file(&artifacts_path)?;
        let artifacts = records
            .iter()
            .map(|record| {
                Artifact::from_record(record)
                    .map(|artifact| artifact.resolve_relative_to(&path))
                    .map_err(|err| Error::Artifact {
                        err,
                        path: artifacts_path.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            path,
            artifacts,
            only_delete_on_clean,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionElement {
    Bicep(BicepElement),
    Artifact(ArtifactElement),
}

impl DefinitionElement {
    fn read(folder: &Path, entry: IndexEntry) -> Result<Self, Error> {
        let path = folder.join(&entry.name);
        Ok(match entry.element_type {
            ElementType::Bicep => DefinitionElement::Bicep(BicepElement {
                name: entry.name,
                path,
                only_delete_on_clean: entry.only_delete_on_clean,
            }),
            ElementType::Artifact => DefinitionElement::Artifact(ArtifactElement::read(
                &entry.name,
                path,
                entry.only_delete_on_clean,
            )?),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            DefinitionElement::Bicep(e) => &e.name,
            DefinitionElement::Artifact(e) => &e.name,
        }
    }

    pub fn only_delete_on_clean(&self) -> bool {
        match self {
            DefinitionElement::Bicep(e) => e.only_delete_on_clean,
            DefinitionElement::Artifact(e) => e.only_delete_on_clean,
        }
    }
}

/// Does the actual work of deploying and deleting elements.
#[async_trait]
pub trait ElementHandler: Sync {
    type Error: Send;

    async fn deploy(&self, target: &PublishTarget, element: &DefinitionElement) -> Result<(), Self::Error>;

    async fn delete(&self, target: &PublishTarget, element: &DefinitionElement) -> Result<(), Self::Error>;
}

/// A definition folder read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionFolder {
    pub path: PathBuf,
    pub target: PublishTarget,
    pub elements: Vec<DefinitionElement>,
}

impl DefinitionFolder {
    pub fn read(path: &Path) -> Result<Self, Error> {
        let index: Vec<IndexEntry> = read_json_file(&path.join(INDEX_FILE))?;
        let target: PublishTarget = read_json_file(&path.join(TARGET_FILE))?;
        let elements = index
            .into_iter()
            .map(|entry| DefinitionElement::read(path, entry))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Read {} elements from {}", elements.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            target,
            elements,
        })
    }

    /// Elements a delete touches, in the order it touches them.
    pub fn elements_to_delete(&self, clean: bool) -> Vec<&DefinitionElement> {
        self.elements
            .iter()
            .rev()
            .filter(|element| clean || !element.only_delete_on_clean())
            .collect()
    }

    pub async fn deploy<H: ElementHandler>(&self, handler: &H) -> Result<(), H::Error> {
        for element in &self.elements {
            info!("Deploying {}", element.name());
            handler.deploy(&self.target, element).await?;
        }
        Ok(())
    }

    pub async fn delete<H: ElementHandler>(&self, handler: &H, clean: bool) -> Result<(), H::Error> {
        for element in self.elements_to_delete(clean) {
            info!("Deleting {}", element.name());
            handler.delete(&self.target, element).await?;
        }
        Ok(())
    }
}
