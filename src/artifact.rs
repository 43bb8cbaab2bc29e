use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("artifact record must be a JSON object")]
    NotAnObject,

    #[error("artifact record has no `type` discriminator")]
    MissingType,

    #[error("unknown artifact type {0}")]
    UnknownType(String),

    #[error("artifact of type {artifact_type} is missing required field(s): {}", .fields.join(", "))]
    MissingFields {
        artifact_type: String,
        fields: Vec<String>,
    },

    #[error("deserialize {artifact_type}: {err}")]
    Deserialize {
        artifact_type: String,
        err: serde_json::Error,
    },
}

/// Kinds of artifact an artifact manifest can register.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactType {
    ArmTemplate,
    VhdImageFile,
    OCIArtifact,
}

impl Display for ArtifactType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ArtifactType::ArmTemplate => "ArmTemplate",
            ArtifactType::VhdImageFile => "VhdImageFile",
            ArtifactType::OCIArtifact => "OCIArtifact",
        })
    }
}

/// The two artifact store flavours a publisher owns.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreType {
    AzureContainerRegistry,
    AzureStorageAccount,
}

/// One entry of an artifact manifest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestArtifactFormat {
    pub artifact_name: String,
    pub artifact_type: ArtifactType,
    pub artifact_version: String,
}

impl ManifestArtifactFormat {
    pub fn new(name: &str, artifact_type: ArtifactType, version: &str) -> Self {
        Self {
            artifact_name: name.to_string(),
            artifact_type,
            artifact_version: version.to_string(),
        }
    }

    /// VHD images live in storage accounts, everything else in the registry.
    pub fn store_type(&self) -> StoreType {
        match self.artifact_type {
            ArtifactType::VhdImageFile => StoreType::AzureStorageAccount,
            _ => StoreType::AzureContainerRegistry,
        }
    }
}

/// A file on the local machine that must be uploaded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LocalFileArtifact {
    pub artifact_name: String,
    pub artifact_type: ArtifactType,
    pub artifact_version: String,
    pub file_path: PathBuf,
}

/// A container image copied from another registry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteAcrArtifact {
    pub artifact_name: String,
    pub artifact_type: ArtifactType,
    pub artifact_version: String,
    pub source_registry: String,
    pub source_registry_namespace: String,
}

impl RemoteAcrArtifact {
    /// Fully qualified reference of the image in the source registry.
    pub fn source_reference(&self) -> String {
        let registry = self.source_registry.trim_end_matches('/');
        let namespace = self.source_registry_namespace.trim_matches('/');
        if namespace.is_empty() {
            format!("{registry}/{}:{}", self.artifact_name, self.artifact_version)
        } else {
            format!("{registry}/{namespace}/{}:{}", self.artifact_name, self.artifact_version)
        }
    }
}

/// A blob already present in some storage account, addressed by SAS URI.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlobStorageArtifact {
    pub artifact_name: String,
    pub artifact_type: ArtifactType,
    pub artifact_version: String,
    pub blob_sas_uri: String,
}

/// Upload descriptor, as stored in `artifacts.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Artifact {
    #[serde(rename = "LocalFileACRArtifact")]
    LocalFileAcr(LocalFileArtifact),
    #[serde(rename = "RemoteACRArtifact")]
    RemoteAcr(RemoteAcrArtifact),
    #[serde(rename = "LocalFileStorageAccountArtifact")]
    LocalFileStorageAccount(LocalFileArtifact),
    #[serde(rename = "BlobStorageAccountArtifact")]
    BlobStorageAccount(BlobStorageArtifact),
}

const COMMON_FIELDS: [&str; 3] = ["artifact_name", "artifact_type", "artifact_version"];

/// Fields each artifact type requires on top of the common ones.
const ARTIFACT_REGISTRY: &[(&str, &[&str])] = &[
    ("LocalFileACRArtifact", &["file_path"]),
    ("RemoteACRArtifact", &["source_registry", "source_registry_namespace"]),
    ("LocalFileStorageAccountArtifact", &["file_path"]),
    ("BlobStorageAccountArtifact", &["blob_sas_uri"]),
];

impl Artifact {
    /// Parse one `artifacts.json` record.
    ///
    /// The `type` discriminator selects the artifact variant; every field that
    /// variant requires must be present, and all missing ones are reported at once.
    pub fn from_record(record: &Value) -> Result<Self, Error> {
        let fields = record.as_object().ok_or(Error::NotAnObject)?;
        let artifact_type = fields
            .get("type")
            .and_then(Value::as_str)
            .ok_or(Error::MissingType)?;

        let (_, extra) = ARTIFACT_REGISTRY
            .iter()
            .find(|(name, _)| *name == artifact_type)
            .ok_or_else(|| Error::UnknownType(artifact_type.to_string()))?;

        let missing: Vec<String> = COMMON_FIELDS
            .iter()
            .chain(extra.iter())
            .filter(|field| !fields.contains_key(**field))
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingFields {
                artifact_type: artifact_type.to_string(),
                fields: missing,
            });
        }

        serde_json::from_value(record.clone()).map_err(|err| Error::Deserialize {
            artifact_type: artifact_type.to_string(),
            err,
        })
    }

    fn common(&self) -> (&str, ArtifactType, &str) {
        match self {
            Artifact::LocalFileAcr(a) | Artifact::LocalFileStorageAccount(a) => {
                (&a.artifact_name, a.artifact_type, &a.artifact_version)
            }
            Artifact::RemoteAcr(a) => (&a.artifact_name, a.artifact_type, &a.artifact_version),
            Artifact::BlobStorageAccount(a) => {
                (&a.artifact_name, a.artifact_type, &a.artifact_version)
            }
        }
    }

    pub fn artifact_name(&self) -> &str {
        self.common().0
    }

    pub fn artifact_version(&self) -> &str {
        self.common().2
    }

    pub fn manifest_format(&self) -> ManifestArtifactFormat {
        let (name, artifact_type, version) = self.common();
        ManifestArtifactFormat::new(name, artifact_type, version)
    }

    pub fn store_type(&self) -> StoreType {
        match self {
            Artifact::LocalFileAcr(_) | Artifact::RemoteAcr(_) => StoreType::AzureContainerRegistry,
            Artifact::LocalFileStorageAccount(_) | Artifact::BlobStorageAccount(_) => {
                StoreType::AzureStorageAccount
            }
        }
    }

    /// Resolve a relative `file_path` against the folder `artifacts.json` lives in.
    pub fn resolve_relative_to(mut self, base: &Path) -> Self {
        match &mut self {
            Artifact::LocalFileAcr(a) | Artifact::LocalFileStorageAccount(a) => {
                if a.file_path.is_relative() {
                    a.file_path = base.join(&a.file_path);
                }
            }
            Artifact::RemoteAcr(_) | Artifact::BlobStorageAccount(_) => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_local_file_acr_artifact() {
        let record = json!({
            "type": "LocalFileACRArtifact",
            "artifact_name": "ubuntu-template",
            "artifact_type": "ArmTemplate",
            "artifact_version": "1.0.0",
            "file_path": "templates/ubuntu.json",
        });
        let artifact = Artifact::from_record(&record).unwrap();
        assert_eq!(
            artifact,
            Artifact::LocalFileAcr(LocalFileArtifact {
                artifact_name: "ubuntu-template".into(),
                artifact_type: ArtifactType::ArmTemplate,
                artifact_version: "1.0.0".into(),
                file_path: "templates/ubuntu.json".into(),
            })
        );
        assert_eq!(artifact.store_type(), StoreType::AzureContainerRegistry);
    }

    #[test]
    fn missing_fields_are_named() {
        let record = json!({
            "type": "RemoteACRArtifact",
            "artifact_name": "nginx",
            "artifact_type": "OCIArtifact",
        });
        let err = Artifact::from_record(&record).unwrap_err();
        match &err {
            Error::MissingFields { artifact_type, fields } => {
                assert_eq!(artifact_type, "RemoteACRArtifact");
                assert_eq!(
                    fields,
                    &vec![
                        "artifact_version".to_string(),
                        "source_registry".to_string(),
                        "source_registry_namespace".to_string(),
                    ]
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("source_registry_namespace"));
    }

    #[test]
    fn unknown_and_untyped_records_are_rejected() {
        assert!(matches!(
            Artifact::from_record(&json!({"type": "FtpArtifact"})),
            Err(Error::UnknownType(t)) if t == "FtpArtifact"
        ));
        assert!(matches!(
            Artifact::from_record(&json!({"artifact_name": "x"})),
            Err(Error::MissingType)
        ));
        assert!(matches!(
            Artifact::from_record(&json!(["x"])),
            Err(Error::NotAnObject)
        ));
    }

    #[test]
    fn serialized_artifact_carries_type_discriminator() {
        let artifact = Artifact::BlobStorageAccount(BlobStorageArtifact {
            artifact_name: "ubuntu-vhd".into(),
            artifact_type: ArtifactType::VhdImageFile,
            artifact_version: "1-0-0".into(),
            blob_sas_uri: "https://example.blob.core.windows.net/c/b.vhd?sig=x".into(),
        });
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["type"], "BlobStorageAccountArtifact");
        assert_eq!(value["artifact_type"], "VhdImageFile");
        assert_eq!(Artifact::from_record(&value).unwrap(), artifact);
    }

    #[test]
    fn relative_paths_resolve_against_element_folder() {
        let artifact = Artifact::LocalFileAcr(LocalFileArtifact {
            artifact_name: "nf".into(),
            artifact_type: ArtifactType::ArmTemplate,
            artifact_version: "1.0.0".into(),
            file_path: "nf.json".into(),
        })
        .resolve_relative_to(Path::new("/out/artifacts"));
        match artifact {
            Artifact::LocalFileAcr(a) => assert_eq!(a.file_path, PathBuf::from("/out/artifacts/nf.json")),
            other => panic!("unexpected artifact {other:?}"),
        }
    }

    #[test]
    fn remote_source_reference() {
        let image = RemoteAcrArtifact {
            artifact_name: "nginx".into(),
            artifact_type: ArtifactType::OCIArtifact,
            artifact_version: "1.25".into(),
            source_registry: "source.azurecr.io/".into(),
            source_registry_namespace: "".into(),
        };
        assert_eq!(image.source_reference(), "source.azurecr.io/nginx:1.25");
        let namespaced = RemoteAcrArtifact {
            source_registry_namespace: "/library/".into(),
            ..image
        };
        assert_eq!(namespaced.source_reference(), "source.azurecr.io/library/nginx:1.25");
    }
}
