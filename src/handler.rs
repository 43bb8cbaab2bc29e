use crate::azure::{self, ManagementClient};
use crate::config::{self, CnfConfig, InputConfig, NfType, NsdConfig, SnsConfig, VnfConfig};
use crate::definition::{self, DefinitionFolder, DefinitionFolderBuilder};
use crate::publish::{self, Publisher};
use crate::{build, sns};
use log::info;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] config::Error),

    #[error("build: {0}")]
    Build(#[from] build::Error),

    #[error("definition folder: {0}")]
    Definition(#[from] definition::Error),

    #[error("publish: {0}")]
    Publish(#[from] publish::Error),

    #[error("site network service: {0}")]
    Sns(#[from] sns::Error),

    #[error("azure: {0}")]
    Azure(#[from] azure::Error),

    #[error("{0} already exists, remove it or pick another --output-file")]
    ConfigExists(PathBuf),

    #[error("write {path}: {err}")]
    WriteFile { err: std::io::Error, path: PathBuf },
}

/// Which configuration file `generate-config` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Nfd(NfType),
    Nsd,
    Sns,
}

impl ConfigKind {
    fn example(&self) -> &'static str {
        match self {
            ConfigKind::Nfd(NfType::Vnf) => VnfConfig::EXAMPLE,
            ConfigKind::Nfd(NfType::Cnf) => CnfConfig::EXAMPLE,
            ConfigKind::Nsd => NsdConfig::EXAMPLE,
            ConfigKind::Sns => SnsConfig::EXAMPLE,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            ConfigKind::Nfd(nf_type) => nf_type.as_str(),
            ConfigKind::Nsd => "nsd",
            ConfigKind::Sns => "sns",
        }
    }

    pub fn default_config_file(&self) -> PathBuf {
        PathBuf::from(format!("{}-input.toml", self.prefix()))
    }

    pub fn default_output_folder(&self) -> PathBuf {
        PathBuf::from(format!("{}-cli-output", self.prefix()))
    }
}

/// Write an example configuration file for the user to fill in.
pub fn generate_config(kind: ConfigKind, output_file: Option<&Path>) -> Result<PathBuf, Error> {
    let path = output_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| kind.default_config_file());
    if path.exists() {
        return Err(Error::ConfigExists(path));
    }
    std::fs::write(&path, kind.example()).map_err(|err| Error::WriteFile {
        err,
        path: path.clone(),
    })?;
    info!("Configuration written to {}, edit it before running build", path.display());
    Ok(path)
}

fn write(folder: DefinitionFolderBuilder, force: bool) -> Result<PathBuf, Error> {
    folder.write(force)?;
    Ok(folder.path().to_path_buf())
}

/// Build a network function definition folder from its configuration file.
pub fn build_nfd(nf_type: NfType, config_file: &Path, output: Option<&Path>, force: bool) -> Result<PathBuf, Error> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ConfigKind::Nfd(nf_type).default_output_folder());
    let folder = match nf_type {
        NfType::Vnf => build::build_vnf(&config::load::<VnfConfig>(config_file)?, &output)?,
        NfType::Cnf => build::build_cnf(&config::load::<CnfConfig>(config_file)?, &output)?,
    };
    write(folder, force)
}

/// Build a network service design folder. The client is only needed when
/// deploy parameters of a referenced definition are not available locally.
pub async fn build_nsd(
    config_file: &Path,
    output: Option<&Path>,
    force: bool,
    client: Option<&dyn ManagementClient>,
) -> Result<PathBuf, Error> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ConfigKind::Nsd.default_output_folder());
    let config = config::load::<NsdConfig>(config_file)?;
    let folder = build::build_nsd(&config, &output, client).await?;
    write(folder, force)
}

pub async fn publish(client: &dyn ManagementClient, folder: &Path) -> Result<(), Error> {
    let definition = DefinitionFolder::read(folder)?;
    definition.deploy(&Publisher::new(client)).await?;
    info!("Published {}", folder.display());
    Ok(())
}

pub async fn delete(client: &dyn ManagementClient, folder: &Path, clean: bool) -> Result<(), Error> {
    let definition = DefinitionFolder::read(folder)?;
    definition.delete(&Publisher::new(client), clean).await?;
    info!("Deleted {}", folder.display());
    Ok(())
}

pub async fn deploy_sns(client: &dyn ManagementClient, config_file: &Path) -> Result<String, Error> {
    let config = config::load::<SnsConfig>(config_file)?;
    Ok(sns::deploy_sns(client, &config).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::fake::FakeClient;

    #[test]
    fn default_file_names() {
        assert_eq!(ConfigKind::Nfd(NfType::Cnf).default_config_file(), PathBuf::from("cnf-input.toml"));
        assert_eq!(ConfigKind::Nsd.default_output_folder(), PathBuf::from("nsd-cli-output"));
    }

    #[test]
    fn generated_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sns.toml");
        generate_config(ConfigKind::Sns, Some(&path)).unwrap();
        let sns: SnsConfig = config::load(&path).unwrap();
        assert_eq!(sns.configuration_group_values[0].values_file, dir.path().join("ubuntu-vm-values.json"));

        assert!(matches!(
            generate_config(ConfigKind::Sns, Some(&path)),
            Err(Error::ConfigExists(_))
        ));
    }

    #[tokio::test]
    async fn delete_of_an_unpublished_folder_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.json");
        std::fs::write(&template, r#"{"parameters": {"adminUsername": {"type": "string"}}}"#).unwrap();
        let config_file = dir.path().join("nsd.json");
        std::fs::write(
            &config_file,
            serde_json::json!({
                "location": "westeurope",
                "publisher_name": "contoso",
                "publisher_resource_group_name": "contoso-rg",
                "acr_artifact_store_name": "contoso-acr",
                "nsd_name": "network",
                "nsd_version": "1.0.0",
                "resource_element_templates": [{
                    "resource_element_type": "ArmTemplate",
                    "artifact_name": "network-setup",
                    "version": "1.0.0",
                    "file_path": "template.json"
                }]
            })
            .to_string(),
        )
        .unwrap();

        let output = dir.path().join("nsd-cli-output");
        build_nsd(&config_file, Some(&output), false, None).await.unwrap();
        let client = FakeClient::default();
        delete(&client, &output, true).await.unwrap();
        assert!(client.calls().is_empty());
    }
}
