//! Assemble definition folders from a validated configuration.
//!
//! Every folder has the same shape: publisher base resources (kept on an
//! ordinary delete), the artifact manifests, the artifacts themselves and
//! finally the definition or design version.

use crate::artifact::{Artifact, ManifestArtifactFormat, StoreType};
use crate::azure::{self, ManagementClient};
use crate::bicep::{self, ArtifactManifest, NfDefinition, NsDesign, PublisherBase};
use crate::config::{CnfConfig, CommonParametersConfig, NfType, NsdConfig, ResourceElementConfig, VnfConfig};
use crate::definition::{self, DefinitionElementBuilder, DefinitionFolderBuilder, PublishTarget};
use crate::input::{self, ArmTemplateInput, HelmChartInput, NfdInput, VhdFileInput, VhdSource, JSON_SCHEMA_DRAFT};
use crate::processor::{
    self, ArmTemplateProcessor, BuildProcessor, HelmChartProcessor, LocalFile, NfReference, NfdProcessor,
    VhdProcessor,
};
use crate::HYBRID_NETWORK_API_VERSION;
use log::{debug, info};
use serde_json::{json, Map, Value};
use std::path::Path;
use thiserror::Error;

pub const BASE_ELEMENT: &str = "base";
pub const MANIFEST_ELEMENT: &str = "artifactManifest";
pub const ARTIFACTS_ELEMENT: &str = "artifacts";
pub const NF_DEFINITION_ELEMENT: &str = "nfDefinition";
pub const NS_DESIGN_ELEMENT: &str = "nsDefinition";
pub const DEPLOY_PARAMETERS_FILE: &str = "deployParameters.json";

#[derive(Error, Debug)]
pub enum Error {
    #[error("input: {0}")]
    Input(#[from] input::Error),

    #[error("processor: {0}")]
    Processor(#[from] processor::Error),

    #[error("template: {0}")]
    Bicep(#[from] bicep::Error),

    #[error("definition: {0}")]
    Definition(#[from] definition::Error),

    #[error("azure: {0}")]
    Azure(#[from] azure::Error),

    #[error("deploy parameters of {0} are needed: set deploy_parameters_file or log in to Azure")]
    NoDeployParameters(String),

    #[error("VHD {0} needs a file_path or a blob_sas_url")]
    NoVhdSource(String),

    #[error("network function definition version {0} not found")]
    NfdvNotFound(String),
}

/// `<name>-<store>-manifest-<version>`, with dots in the version turned into dashes.
pub fn manifest_name(name: &str, store: &str, version: &str) -> String {
    format!("{name}-{store}-manifest-{}", version.replace('.', "-"))
}

fn strip_schema_header(mut schema: Value) -> Value {
    if let Value::Object(fields) = &mut schema {
        fields.remove("$schema");
        fields.remove("title");
    }
    schema
}

/// Parameters every template in a folder takes.
fn common_parameters<'a>(common: &'a CommonParametersConfig, target: &'a PublishTarget) -> Vec<(&'a str, &'a str)> {
    let mut parameters = vec![
        ("location", common.location.as_str()),
        ("publisherName", common.publisher_name.as_str()),
        ("acrArtifactStoreName", target.acr_artifact_store_name.as_str()),
    ];
    if let Some(sa) = &target.sa_artifact_store_name {
        parameters.push(("saArtifactStoreName", sa.as_str()));
    }
    parameters
}

/// What all processors of one build contribute to the folder.
struct Collected {
    manifest: Vec<ManifestArtifactFormat>,
    artifacts: Vec<Artifact>,
    supporting_files: Vec<LocalFile>,
}

fn collect(processors: &[Box<dyn BuildProcessor>]) -> Result<Collected, Error> {
    let mut collected = Collected {
        manifest: vec![],
        artifacts: vec![],
        supporting_files: vec![],
    };
    for processor in processors {
        debug!("Collecting artifacts of {}", processor.name());
        for entry in processor.get_artifact_manifest_list()? {
            if !collected.manifest.contains(&entry) {
                collected.manifest.push(entry);
            }
        }
        let details = processor.get_artifact_details()?;
        collected.artifacts.extend(details.artifacts);
        collected.supporting_files.extend(details.supporting_files);
    }
    Ok(collected)
}

fn base_elements(
    common: &CommonParametersConfig,
    target: &PublishTarget,
    base: PublisherBase,
    group_name: &str,
    collected: Collected,
) -> Result<Vec<DefinitionElementBuilder>, Error> {
    let mut base_parameters = common_parameters(common, target);
    base_parameters.push(("groupName", group_name));

    let mut manifest_parameters = common_parameters(common, target);
    manifest_parameters.push(("acrManifestName", target.acr_manifest_name.as_str()));
    if let Some(sa_manifest) = &target.sa_manifest_name {
        manifest_parameters.push(("saManifestName", sa_manifest.as_str()));
    }

    Ok(vec![
        DefinitionElementBuilder::bicep(
            BASE_ELEMENT,
            bicep::render(&base, "publisher base")?,
            bicep::parameters_file(&base_parameters),
        )
        .only_delete_on_clean(),
        DefinitionElementBuilder::bicep(
            MANIFEST_ELEMENT,
            bicep::render(&ArtifactManifest::new(collected.manifest), "artifact manifest")?,
            bicep::parameters_file(&manifest_parameters),
        ),
        DefinitionElementBuilder::artifacts(ARTIFACTS_ELEMENT, collected.artifacts)
            .with_supporting_files(collected.supporting_files),
    ])
}

/// Build the folder of a network function definition version.
fn nfd_folder(
    common: &CommonParametersConfig,
    nf_name: &str,
    version: &str,
    nf_type: NfType,
    sa_artifact_store_name: Option<&str>,
    processors: Vec<Box<dyn BuildProcessor>>,
    output: &Path,
) -> Result<DefinitionFolderBuilder, Error> {
    let collected = collect(&processors)?;
    let has_storage_account = collected
        .manifest
        .iter()
        .any(|entry| entry.store_type() == StoreType::AzureStorageAccount);

    let target = PublishTarget {
        publisher_name: common.publisher_name.clone(),
        publisher_resource_group: common.publisher_resource_group_name.clone(),
        acr_artifact_store_name: common.acr_artifact_store_name.clone(),
        acr_manifest_name: manifest_name(nf_name, "acr", version),
        sa_artifact_store_name: sa_artifact_store_name
            .filter(|_| has_storage_account)
            .map(str::to_string),
        sa_manifest_name: has_storage_account.then(|| manifest_name(nf_name, "sa", version)),
    };

    let applications = processors
        .iter()
        .map(|processor| processor.generate_nf_application())
        .collect::<Result<Vec<_>, _>>()?;

    let mut deploy_parameters = Map::new();
    let mut required = vec![];
    let mut supporting_files = vec![];
    for application in &applications {
        let schema = strip_schema_header(application.deploy_parameters_schema.clone());
        if schema
            .get("required")
            .and_then(Value::as_array)
            .is_some_and(|keys| !keys.is_empty())
        {
            required.push(application.name.clone());
        }
        deploy_parameters.insert(application.name.clone(), schema);
        supporting_files.push(LocalFile::json(application.mappings_file(), &application.mappings)?);
    }
    supporting_files.push(LocalFile::json(
        DEPLOY_PARAMETERS_FILE,
        &json!({
            "$schema": JSON_SCHEMA_DRAFT,
            "title": "DeployParametersSchema",
            "type": "object",
            "properties": deploy_parameters,
            "required": required,
        }),
    )?);

    let mut nfdv_parameters = common_parameters(common, &target);
    nfdv_parameters.push(("nfDefinitionGroup", nf_name));
    nfdv_parameters.push(("nfDefinitionVersion", version));
    let nf_definition = NfDefinition {
        api_version: HYBRID_NETWORK_API_VERSION,
        nf_type: nf_type.nf_type(),
        nfvi_type: nf_type.nfvi_type(),
        has_storage_account,
        applications,
    };
    let nfdv_element = DefinitionElementBuilder::bicep(
        NF_DEFINITION_ELEMENT,
        bicep::render(&nf_definition, "network function definition")?,
        bicep::parameters_file(&nfdv_parameters),
    )
    .with_supporting_files(supporting_files);

    let base = PublisherBase::nf_definition_group(has_storage_account);
    let mut folder = DefinitionFolderBuilder::new(output, target.clone());
    for element in base_elements(common, &target, base, nf_name, collected)? {
        folder.add_element(element);
    }
    folder.add_element(nfdv_element);
    Ok(folder)
}

pub fn build_vnf(config: &VnfConfig, output: &Path) -> Result<DefinitionFolderBuilder, Error> {
    info!("Building VNF definition {} {}", config.nf_name, config.version);
    let mut processors: Vec<Box<dyn BuildProcessor>> = vec![];
    for template in &config.arm_templates {
        let input = ArmTemplateInput::from_file(&template.artifact_name, &template.version, &template.file_path)?;
        processors.push(Box::new(ArmTemplateProcessor::new(&template.artifact_name, input)));
    }

    let vhd = &config.vhd;
    let source = match (&vhd.file_path, &vhd.blob_sas_url) {
        (Some(path), _) => VhdSource::LocalFile(path.clone()),
        (None, Some(url)) => VhdSource::BlobSasUri(url.clone()),
        (None, None) => return Err(Error::NoVhdSource(vhd.artifact_name.clone())),
    };
    let mut image_config = Map::new();
    if let Some(size) = vhd.image_disk_size_gb {
        image_config.insert("imageDiskSizeGB".into(), json!(size));
    }
    if let Some(generation) = &vhd.image_hyper_v_generation {
        image_config.insert("imageHyperVGeneration".into(), json!(generation));
    }
    if let Some(api_version) = &vhd.image_api_version {
        image_config.insert("imageApiVersion".into(), json!(api_version));
    }
    let input = VhdFileInput::new(&vhd.artifact_name, &vhd.version, source, image_config);
    processors.push(Box::new(VhdProcessor::new(&vhd.artifact_name, input)));

    nfd_folder(
        &config.common,
        &config.nf_name,
        &config.version,
        NfType::Vnf,
        Some(&config.blob_artifact_store_name),
        processors,
        output,
    )
}

pub fn build_cnf(config: &CnfConfig, output: &Path) -> Result<DefinitionFolderBuilder, Error> {
    info!("Building CNF definition {} {}", config.nf_name, config.version);
    let mut processors: Vec<Box<dyn BuildProcessor>> = vec![];
    for package in &config.helm_packages {
        let input = HelmChartInput::from_path(&package.path_to_chart, package.default_values.as_deref())?;
        processors.push(Box::new(HelmChartProcessor::new(
            &package.name,
            input,
            &config.source_registry,
            &config.source_registry_namespace,
            &package.release_namespace,
        )));
    }
    nfd_folder(
        &config.common,
        &config.nf_name,
        &config.version,
        NfType::Cnf,
        None,
        processors,
        output,
    )
}

pub fn nfdv_id(subscription: &str, reference: &NfReference) -> String {
    format!(
        "/subscriptions/{subscription}/resourceGroups/{}/providers/Microsoft.HybridNetwork/publishers/{}/networkfunctiondefinitiongroups/{}/networkfunctiondefinitionversions/{}",
        reference.publisher_resource_group, reference.publisher, reference.nf_definition_group, reference.version,
    )
}

/// Deploy parameters of a published NFD version, from a local file or from Azure.
async fn nfd_input(
    reference: &NfReference,
    deploy_parameters_file: Option<&Path>,
    client: Option<&dyn ManagementClient>,
) -> Result<NfdInput, Error> {
    let name = &reference.nf_definition_group;
    if let Some(path) = deploy_parameters_file {
        debug!("Reading deploy parameters of {name} from {}", path.display());
        return Ok(NfdInput::from_file(name, &reference.version, path)?);
    }
    let client = client.ok_or_else(|| Error::NoDeployParameters(name.clone()))?;
    let id = nfdv_id(client.subscription_id(), reference);
    debug!("Fetching deploy parameters from {id}");
    let nfdv = client
        .get_resource(&id, HYBRID_NETWORK_API_VERSION)
        .await?
        .ok_or_else(|| Error::NfdvNotFound(id.clone()))?;
    let deploy_parameters = nfdv
        .pointer("/properties/deployParameters")
        .cloned()
        .ok_or(Error::NfdvNotFound(id))?;
    Ok(NfdInput::new(name, &reference.version, deploy_parameters)?)
}

pub async fn build_nsd(
    config: &NsdConfig,
    output: &Path,
    client: Option<&dyn ManagementClient>,
) -> Result<DefinitionFolderBuilder, Error> {
    info!("Building network service design {} {}", config.nsd_name, config.nsd_version);
    let mut processors: Vec<Box<dyn BuildProcessor>> = vec![];
    for element in &config.resource_element_templates {
        match element {
            ResourceElementConfig::ArmTemplate(template) => {
                let input = ArmTemplateInput::from_file(&template.artifact_name, &template.version, &template.file_path)?;
                processors.push(Box::new(ArmTemplateProcessor::new(&template.artifact_name, input)));
            }
            ResourceElementConfig::Nf(nf) => {
                let reference = NfReference {
                    publisher: nf.publisher.clone(),
                    publisher_resource_group: nf.publisher_resource_group.clone(),
                    nf_definition_group: nf.name.clone(),
                    version: nf.version.clone(),
                    nf_type: nf.nf_type,
                };
                let input = nfd_input(&reference, nf.deploy_parameters_file.as_deref(), client).await?;
                processors.push(Box::new(NfdProcessor::new(&nf.name, input, reference, &config.nsd_version)));
            }
        }
    }

    let collected = collect(&processors)?;
    let common = &config.common;
    let target = PublishTarget {
        publisher_name: common.publisher_name.clone(),
        publisher_resource_group: common.publisher_resource_group_name.clone(),
        acr_artifact_store_name: common.acr_artifact_store_name.clone(),
        acr_manifest_name: manifest_name(&config.nsd_name, "acr", &config.nsd_version),
        sa_artifact_store_name: None,
        sa_manifest_name: None,
    };

    let elements = processors
        .iter()
        .map(|processor| processor.generate_resource_element_template())
        .collect::<Result<Vec<_>, _>>()?;
    let mut supporting_files = vec![];
    for element in &elements {
        supporting_files.push(LocalFile::json(element.schema_file(), &element.configuration_schema)?);
        supporting_files.push(LocalFile::json(element.mappings_file(), &element.parameter_values)?);
    }

    let nfvi_site_name = config.nfvi_site_name();
    let mut nsdv_parameters = common_parameters(common, &target);
    nsdv_parameters.push(("nsDesignGroup", config.nsd_name.as_str()));
    nsdv_parameters.push(("nsDesignVersion", config.nsd_version.as_str()));
    nsdv_parameters.push(("nfviSiteName", nfvi_site_name.as_str()));
    let design = NsDesign {
        api_version: HYBRID_NETWORK_API_VERSION,
        description: bicep::string_literal(&config.nsdv_description),
        nfvi_type: config.nf_type().nfvi_type(),
        elements,
    };
    let nsdv_element = DefinitionElementBuilder::bicep(
        NS_DESIGN_ELEMENT,
        bicep::render(&design, "network service design")?,
        bicep::parameters_file(&nsdv_parameters),
    )
    .with_supporting_files(supporting_files);

    let mut folder = DefinitionFolderBuilder::new(output, target.clone());
    for element in base_elements(common, &target, PublisherBase::ns_design_group(), &config.nsd_name, collected)? {
        folder.add_element(element);
    }
    folder.add_element(nsdv_element);
    Ok(folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::fake::FakeClient;
    use crate::config::{ArmTemplateConfig, NfRetConfig, VhdConfig};
    use crate::definition::{DefinitionElement, DefinitionFolder};
    use std::fs;

    fn common() -> CommonParametersConfig {
        CommonParametersConfig {
            location: "westeurope".into(),
            publisher_name: "contoso".into(),
            publisher_resource_group_name: "contoso-rg".into(),
            acr_artifact_store_name: "contoso-acr".into(),
        }
    }

    fn vnf_config(dir: &Path) -> VnfConfig {
        fs::write(
            dir.join("ubuntu-template.json"),
            r#"{"parameters": {
                "adminUsername": {"type": "string"},
                "vmSize": {"type": "string", "defaultValue": "Standard_D2s_v3"}
            }}"#,
        )
        .unwrap();
        VnfConfig {
            common: common(),
            blob_artifact_store_name: "contoso-sa".into(),
            nf_name: "ubuntu-vm".into(),
            version: "1.0.0".into(),
            arm_templates: vec![ArmTemplateConfig {
                artifact_name: "ubuntu-template".into(),
                version: "1.0.0".into(),
                file_path: dir.join("ubuntu-template.json"),
            }],
            vhd: VhdConfig {
                artifact_name: "ubuntu-vhd".into(),
                version: "1-0-0".into(),
                file_path: Some(dir.join("ubuntu.vhd")),
                blob_sas_url: None,
                image_disk_size_gb: Some(30),
                image_hyper_v_generation: None,
                image_api_version: None,
            },
        }
    }

    #[test]
    fn manifest_names_use_dashed_versions() {
        assert_eq!(manifest_name("ubuntu-vm", "acr", "1.0.0"), "ubuntu-vm-acr-manifest-1-0-0");
    }

    #[test]
    fn vnf_folder_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("vnf-cli-output");
        let folder = build_vnf(&vnf_config(dir.path()), &output).unwrap();
        folder.write(false).unwrap();

        let read = DefinitionFolder::read(&output).unwrap();
        let names: Vec<&str> = read.elements.iter().map(|element| element.name()).collect();
        assert_eq!(names, vec!["base", "artifactManifest", "artifacts", "nfDefinition"]);
        assert!(read.elements[0].only_delete_on_clean());
        assert_eq!(read.target.sa_manifest_name.as_deref(), Some("ubuntu-vm-sa-manifest-1-0-0"));
        assert_eq!(read.target.sa_artifact_store_name.as_deref(), Some("contoso-sa"));

        match &read.elements[2] {
            DefinitionElement::Artifact(artifacts) => {
                assert_eq!(artifacts.artifacts.len(), 2);
                assert_eq!(artifacts.artifacts[1].store_type(), StoreType::AzureStorageAccount);
            }
            other => panic!("unexpected element {other:?}"),
        }

        let nfdv = output.join("nfDefinition");
        let deploy_parameters: Value =
            serde_json::from_str(&fs::read_to_string(nfdv.join("deployParameters.json")).unwrap()).unwrap();
        assert_eq!(
            deploy_parameters["properties"]["ubuntu-template"]["required"],
            json!(["adminUsername"])
        );
        assert!(deploy_parameters["required"]
            .as_array()
            .unwrap()
            .contains(&json!("ubuntu-vhd")));

        let mappings: Value = serde_json::from_str(
            &fs::read_to_string(nfdv.join("configMappings/ubuntu-template-mappings.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(mappings["adminUsername"], "{deployParameters.ubuntu-template.adminUsername}");
        assert_eq!(mappings["vmSize"], "Standard_D2s_v3");

        let parameters: Value =
            serde_json::from_str(&fs::read_to_string(nfdv.join("deploy.parameters.json")).unwrap()).unwrap();
        assert_eq!(parameters["parameters"]["nfDefinitionGroup"]["value"], "ubuntu-vm");
        assert_eq!(parameters["parameters"]["saArtifactStoreName"]["value"], "contoso-sa");

        assert!(matches!(
            folder.write(false),
            Err(definition::Error::OutputExists(_))
        ));
    }

    fn nsd_config(deploy_parameters_file: Option<std::path::PathBuf>) -> NsdConfig {
        NsdConfig {
            common: common(),
            nsd_name: "ubuntu-nsd".into(),
            nsd_version: "1.0.0".into(),
            nsdv_description: "Ubuntu".into(),
            nfvi_site_name: None,
            resource_element_templates: vec![ResourceElementConfig::Nf(NfRetConfig {
                name: "ubuntu-vm".into(),
                version: "1.0.0".into(),
                publisher: "contoso".into(),
                publisher_resource_group: "contoso-rg".into(),
                publisher_offering_location: "westeurope".into(),
                nf_type: NfType::Vnf,
                deploy_parameters_file,
            })],
        }
    }

    fn deploy_parameters() -> Value {
        json!({
            "type": "object",
            "properties": {"ubuntu-template": {"type": "object", "properties": {"adminUsername": {"type": "string"}}, "required": ["adminUsername"]}},
            "required": ["ubuntu-template"],
        })
    }

    #[tokio::test]
    async fn nsd_folder_from_local_deploy_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let parameters_path = dir.path().join("deployParameters.json");
        fs::write(&parameters_path, deploy_parameters().to_string()).unwrap();

        let output = dir.path().join("nsd-cli-output");
        let folder = build_nsd(&nsd_config(Some(parameters_path)), &output, None).await.unwrap();
        folder.write(false).unwrap();

        let nsdv = output.join("nsDefinition");
        assert!(nsdv.join("schemas/ubuntu-vm.json").is_file());
        let parameters: Value =
            serde_json::from_str(&fs::read_to_string(nsdv.join("deploy.parameters.json")).unwrap()).unwrap();
        assert_eq!(parameters["parameters"]["nfviSiteName"]["value"], "ubuntu-nsd_NFVI");
        assert!(output.join("artifacts/ubuntu-vm-nf-template.json").is_file());

        let read = DefinitionFolder::read(&output).unwrap();
        assert_eq!(read.target.acr_manifest_name, "ubuntu-nsd-acr-manifest-1-0-0");
    }

    #[tokio::test]
    async fn nsd_fetches_deploy_parameters_from_azure() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient::default();
        let reference = NfReference {
            publisher: "contoso".into(),
            publisher_resource_group: "contoso-rg".into(),
            nf_definition_group: "ubuntu-vm".into(),
            version: "1.0.0".into(),
            nf_type: NfType::Vnf,
        };
        let id = nfdv_id(client.subscription_id(), &reference);
        client.resources.lock().unwrap().insert(
            id.clone(),
            json!({"properties": {"deployParameters": deploy_parameters().to_string()}}),
        );

        let folder = build_nsd(&nsd_config(None), &dir.path().join("out"), Some(&client as &dyn ManagementClient))
            .await
            .unwrap();
        assert_eq!(folder.elements().len(), 4);
        assert_eq!(client.calls(), vec![format!("get {id}")]);
    }

    #[tokio::test]
    async fn nsd_without_deploy_parameters_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_nsd(&nsd_config(None), &dir.path().join("out"), None).await.unwrap_err();
        assert!(matches!(err, Error::NoDeployParameters(name) if name == "ubuntu-vm"));
    }
}
