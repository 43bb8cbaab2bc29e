use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use std::path::{Path, PathBuf};
use thiserror::Error;
use Error::*;

const VNF_EXAMPLE: &str = include_str!("../config/vnf.toml");
const CNF_EXAMPLE: &str = include_str!("../config/cnf.toml");
const NSD_EXAMPLE: &str = include_str!("../config/nsd.toml");
const SNS_EXAMPLE: &str = include_str!("../config/sns.toml");

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile { err: std::io::Error, path: PathBuf },

    #[error("parse {path}: {err}")]
    Toml { err: toml::de::Error, path: PathBuf },

    #[error("parse {path}: {err}")]
    Json { err: serde_json::Error, path: PathBuf },

    #[error("{0}: configuration files must be .json, .jsonc or .toml")]
    UnsupportedFormat(PathBuf),

    #[error("{0} must be set")]
    Missing(String),

    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Kind of network function a definition describes.
#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NfType {
    Cnf,
    Vnf,
}

impl NfType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NfType::Cnf => "cnf",
            NfType::Vnf => "vnf",
        }
    }

    pub fn nf_type(&self) -> &'static str {
        match self {
            NfType::Cnf => "ContainerizedNetworkFunction",
            NfType::Vnf => "VirtualNetworkFunction",
        }
    }

    pub fn nfvi_type(&self) -> &'static str {
        match self {
            NfType::Cnf => "AzureArcKubernetes",
            NfType::Vnf => "AzureCore",
        }
    }
}

/// A configuration file kind that `generate-config` can write and `build` can read.
pub trait InputConfig: DeserializeOwned {
    const EXAMPLE: &'static str;

    fn validate(&self) -> Result<(), Error>;

    /// Make relative paths relative to `base` instead of the working directory.
    fn resolve_paths(&mut self, base: &Path);
}

fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn require(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        Err(Missing(field.to_string()))
    } else {
        Ok(())
    }
}

/// Names end up inside resource IDs and Bicep string literals.
fn validate_name(field: &str, value: &str) -> Result<(), Error> {
    require(field, value)?;
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        Ok(())
    } else {
        Err(Invalid {
            field: field.to_string(),
            reason: format!("'{value}' may only contain letters, digits, '-', '_' and '.'"),
        })
    }
}

fn validate_version(field: &str, value: &str, separator: char) -> Result<(), Error> {
    require(field, value)?;
    let parts: Vec<&str> = value.split(separator).collect();
    if parts.len() == 3 && parts.iter().all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())) {
        Ok(())
    } else {
        Err(Invalid {
            field: field.to_string(),
            reason: format!("'{value}' must have the form A{separator}B{separator}C"),
        })
    }
}

fn require_path(field: &str, path: &Path) -> Result<(), Error> {
    if path.as_os_str().is_empty() {
        Err(Missing(field.to_string()))
    } else {
        Ok(())
    }
}

/// Parameters shared by every definition configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommonParametersConfig {
    pub location: String,
    pub publisher_name: String,
    pub publisher_resource_group_name: String,
    pub acr_artifact_store_name: String,
}

impl CommonParametersConfig {
    fn validate(&self) -> Result<(), Error> {
        require("location", &self.location)?;
        validate_name("publisher_name", &self.publisher_name)?;
        validate_name("publisher_resource_group_name", &self.publisher_resource_group_name)?;
        validate_name("acr_artifact_store_name", &self.acr_artifact_store_name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArmTemplateConfig {
    pub artifact_name: String,
    pub version: String,
    pub file_path: PathBuf,
}

impl ArmTemplateConfig {
    fn validate(&self, field: &str) -> Result<(), Error> {
        validate_name(&format!("{field}.artifact_name"), &self.artifact_name)?;
        validate_version(&format!("{field}.version"), &self.version, '.')?;
        require_path(&format!("{field}.file_path"), &self.file_path)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VhdConfig {
    pub artifact_name: String,
    /// VHD versions use dashes, `A-B-C`.
    pub version: String,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub blob_sas_url: Option<String>,
    #[serde(default, rename = "image_disk_size_GB")]
    pub image_disk_size_gb: Option<u64>,
    #[serde(default)]
    pub image_hyper_v_generation: Option<String>,
    #[serde(default)]
    pub image_api_version: Option<String>,
}

impl VhdConfig {
    fn validate(&self) -> Result<(), Error> {
        validate_name("vhd.artifact_name", &self.artifact_name)?;
        validate_version("vhd.version", &self.version, '-')?;
        match (&self.file_path, &self.blob_sas_url) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (None, None) => Err(Missing("vhd.file_path or vhd.blob_sas_url".into())),
            (Some(_), Some(_)) => Err(Invalid {
                field: "vhd".into(),
                reason: "only one of file_path and blob_sas_url may be set".into(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VnfConfig {
    #[serde(flatten)]
    pub common: CommonParametersConfig,
    pub blob_artifact_store_name: String,
    pub nf_name: String,
    pub version: String,
    pub arm_templates: Vec<ArmTemplateConfig>,
    pub vhd: VhdConfig,
}

impl InputConfig for VnfConfig {
    const EXAMPLE: &'static str = VNF_EXAMPLE;

    fn validate(&self) -> Result<(), Error> {
        self.common.validate()?;
        validate_name("blob_artifact_store_name", &self.blob_artifact_store_name)?;
        validate_name("nf_name", &self.nf_name)?;
        validate_version("version", &self.version, '.')?;
        if self.arm_templates.is_empty() {
            return Err(Missing("arm_templates".into()));
        }
        for (i, template) in self.arm_templates.iter().enumerate() {
            template.validate(&format!("arm_templates[{i}]"))?;
        }
        self.vhd.validate()
    }

    fn resolve_paths(&mut self, base: &Path) {
        for template in &mut self.arm_templates {
            resolve(base, &mut template.file_path);
        }
        if let Some(file_path) = &mut self.vhd.file_path {
            resolve(base, file_path);
        }
    }
}

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HelmPackageConfig {
    pub name: String,
    pub path_to_chart: PathBuf,
    #[serde(default)]
    pub default_values: Option<PathBuf>,
    #[serde_inline_default("default".to_string())]
    pub release_namespace: String,
}

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CnfConfig {
    #[serde(flatten)]
    pub common: CommonParametersConfig,
    pub nf_name: String,
    pub version: String,
    pub source_registry: String,
    #[serde_inline_default(String::new())]
    pub source_registry_namespace: String,
    pub helm_packages: Vec<HelmPackageConfig>,
}

impl InputConfig for CnfConfig {
    const EXAMPLE: &'static str = CNF_EXAMPLE;

    fn validate(&self) -> Result<(), Error> {
        self.common.validate()?;
        validate_name("nf_name", &self.nf_name)?;
        validate_version("version", &self.version, '.')?;
        require("source_registry", &self.source_registry)?;
        if self.helm_packages.is_empty() {
            return Err(Missing("helm_packages".into()));
        }
        for (i, package) in self.helm_packages.iter().enumerate() {
            validate_name(&format!("helm_packages[{i}].name"), &package.name)?;
            require_path(&format!("helm_packages[{i}].path_to_chart"), &package.path_to_chart)?;
            validate_name(&format!("helm_packages[{i}].release_namespace"), &package.release_namespace)?;
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for package in &mut self.helm_packages {
            resolve(base, &mut package.path_to_chart);
            if let Some(default_values) = &mut package.default_values {
                resolve(base, default_values);
            }
        }
    }
}

/// A published network function definition version deployed by a design.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NfRetConfig {
    /// Network function definition group.
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub publisher_resource_group: String,
    pub publisher_offering_location: String,
    #[serde(rename = "type")]
    pub nf_type: NfType,
    #[serde(default)]
    pub deploy_parameters_file: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "resource_element_type")]
pub enum ResourceElementConfig {
    ArmTemplate(ArmTemplateConfig),
    #[serde(rename = "NF")]
    Nf(NfRetConfig),
}

impl ResourceElementConfig {
    pub fn name(&self) -> &str {
        match self {
            ResourceElementConfig::ArmTemplate(template) => &template.artifact_name,
            ResourceElementConfig::Nf(nf) => &nf.name,
        }
    }
}

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NsdConfig {
    #[serde(flatten)]
    pub common: CommonParametersConfig,
    pub nsd_name: String,
    pub nsd_version: String,
    #[serde_inline_default("Network service design".to_string())]
    pub nsdv_description: String,
    #[serde(default)]
    pub nfvi_site_name: Option<String>,
    pub resource_element_templates: Vec<ResourceElementConfig>,
}

impl NsdConfig {
    /// Defaults to `<nsd_name>_NFVI`.
    pub fn nfvi_site_name(&self) -> String {
        self.nfvi_site_name
            .clone()
            .unwrap_or_else(|| format!("{}_NFVI", self.nsd_name))
    }

    /// Sites are typed by a single NFVI, so every NF element must agree.
    pub fn nf_type(&self) -> NfType {
        self.resource_element_templates
            .iter()
            .find_map(|element| match element {
                ResourceElementConfig::Nf(nf) => Some(nf.nf_type),
                ResourceElementConfig::ArmTemplate(_) => None,
            })
            .unwrap_or(NfType::Vnf)
    }
}

impl InputConfig for NsdConfig {
    const EXAMPLE: &'static str = NSD_EXAMPLE;

    fn validate(&self) -> Result<(), Error> {
        self.common.validate()?;
        validate_name("nsd_name", &self.nsd_name)?;
        validate_version("nsd_version", &self.nsd_version, '.')?;
        if let Some(site) = &self.nfvi_site_name {
            validate_name("nfvi_site_name", site)?;
        }
        if self.resource_element_templates.is_empty() {
            return Err(Missing("resource_element_templates".into()));
        }
        let nf_type = self.nf_type();
        let mut names = std::collections::HashSet::new();
        for (i, element) in self.resource_element_templates.iter().enumerate() {
            let field = format!("resource_element_templates[{i}]");
            match element {
                ResourceElementConfig::ArmTemplate(template) => template.validate(&field)?,
                ResourceElementConfig::Nf(nf) => {
                    validate_name(&format!("{field}.name"), &nf.name)?;
                    validate_version(&format!("{field}.version"), &nf.version, '.')?;
                    validate_name(&format!("{field}.publisher"), &nf.publisher)?;
                    validate_name(&format!("{field}.publisher_resource_group"), &nf.publisher_resource_group)?;
                    require(&format!("{field}.publisher_offering_location"), &nf.publisher_offering_location)?;
                    if nf.nf_type != nf_type {
                        return Err(Invalid {
                            field: format!("{field}.type"),
                            reason: "all network functions of a design must share one type".into(),
                        });
                    }
                }
            }
            if !names.insert(element.name()) {
                return Err(Invalid {
                    field: format!("{field}.name"),
                    reason: format!("'{}' is used by more than one element", element.name()),
                });
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for element in &mut self.resource_element_templates {
            match element {
                ResourceElementConfig::ArmTemplate(template) => resolve(base, &mut template.file_path),
                ResourceElementConfig::Nf(nf) => {
                    if let Some(file) = &mut nf.deploy_parameters_file {
                        resolve(base, file);
                    }
                }
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigurationGroupValuesConfig {
    pub schema_name: String,
    pub values_file: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnsConfig {
    pub location: String,
    pub resource_group: String,
    pub publisher_name: String,
    pub publisher_resource_group_name: String,
    pub nsd_name: String,
    pub nsd_version: String,
    pub site_name: String,
    pub sns_name: String,
    pub nfvi_site_name: String,
    pub nfvi_type: NfType,
    #[serde(default)]
    pub custom_location_id: Option<String>,
    pub configuration_group_values: Vec<ConfigurationGroupValuesConfig>,
}

impl InputConfig for SnsConfig {
    const EXAMPLE: &'static str = SNS_EXAMPLE;

    fn validate(&self) -> Result<(), Error> {
        require("location", &self.location)?;
        validate_name("resource_group", &self.resource_group)?;
        validate_name("publisher_name", &self.publisher_name)?;
        validate_name("publisher_resource_group_name", &self.publisher_resource_group_name)?;
        validate_name("nsd_name", &self.nsd_name)?;
        validate_version("nsd_version", &self.nsd_version, '.')?;
        validate_name("site_name", &self.site_name)?;
        validate_name("sns_name", &self.sns_name)?;
        validate_name("nfvi_site_name", &self.nfvi_site_name)?;
        if self.nfvi_type == NfType::Cnf && self.custom_location_id.is_none() {
            return Err(Missing("custom_location_id".into()));
        }
        for (i, values) in self.configuration_group_values.iter().enumerate() {
            validate_name(&format!("configuration_group_values[{i}].schema_name"), &values.schema_name)?;
            require_path(&format!("configuration_group_values[{i}].values_file"), &values.values_file)?;
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for values in &mut self.configuration_group_values {
            resolve(base, &mut values.values_file);
        }
    }
}

/// Parse configuration text, picking the format from `path`'s extension.
pub fn parse<C: InputConfig>(path: &Path, contents: &str) -> Result<C, Error> {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("toml") => toml::from_str(contents).map_err(|err| Toml {
            err,
            path: path.to_path_buf(),
        }),
        Some("json") | Some("jsonc") => serde_json::from_str(contents).map_err(|err| Json {
            err,
            path: path.to_path_buf(),
        }),
        _ => Err(UnsupportedFormat(path.to_path_buf())),
    }
}

/// Read, resolve and validate a configuration file.
pub fn load<C: InputConfig>(path: &Path) -> Result<C, Error> {
    let contents = std::fs::read_to_string(path).map_err(|err| ReadFile {
        err,
        path: path.to_path_buf(),
    })?;
    let mut config: C = parse(path, &contents)?;
    let base = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let base = std::path::absolute(base).unwrap_or_else(|_| base.to_path_buf());
    config.resolve_paths(&base);
    config.validate()?;
    Ok(config)
}
