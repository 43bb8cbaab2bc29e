use crate::azure::ManagementClient;
use crate::config::{NfType, SnsConfig};
use crate::{deploy, HYBRID_NETWORK_API_VERSION};
use chrono::Utc;
use log::info;
use serde_json::{json, Value};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("read configuration group values {path}: {err}")]
    Values { err: String, path: PathBuf },

    #[error(transparent)]
    Deploy(#[from] deploy::Error),
}

fn configuration_group_values_name(config: &SnsConfig, schema_name: &str) -> String {
    format!("{}-{schema_name}", config.sns_name)
}

fn nfvi(config: &SnsConfig) -> Value {
    match (config.nfvi_type, &config.custom_location_id) {
        (NfType::Cnf, Some(custom_location)) => json!({
            "name": config.nfvi_site_name,
            "nfviType": config.nfvi_type.nfvi_type(),
            "customLocationReference": {"id": custom_location},
        }),
        _ => json!({
            "name": config.nfvi_site_name,
            "nfviType": config.nfvi_type.nfvi_type(),
            "location": config.location,
        }),
    }
}

/// ARM template creating the site, one configuration group value per schema and the site network service.
pub fn sns_template(config: &SnsConfig, values: &[(String, Value)]) -> Value {
    let publisher_rg = &config.publisher_resource_group_name;
    let publisher = &config.publisher_name;

    let mut resources = vec![json!({
        "type": "Microsoft.HybridNetwork/sites",
        "apiVersion": HYBRID_NETWORK_API_VERSION,
        "name": config.site_name,
        "location": "[parameters('location')]",
        "properties": {"nfvis": [nfvi(config)]},
    })];

    let mut depends_on = vec![format!(
        "[resourceId('Microsoft.HybridNetwork/sites', '{}')]",
        config.site_name
    )];
    let mut references = serde_json::Map::new();
    for (schema_name, value) in values {
        let name = configuration_group_values_name(config, schema_name);
        let id = format!("[resourceId('Microsoft.HybridNetwork/configurationGroupValues', '{name}')]");
        resources.push(json!({
            "type": "Microsoft.HybridNetwork/configurationGroupValues",
            "apiVersion": HYBRID_NETWORK_API_VERSION,
            "name": name,
            "location": "[parameters('location')]",
            "properties": {
                "configurationType": "Open",
                "configurationGroupSchemaResourceReference": {
                    "idType": "Open",
                    "id": format!(
                        "[resourceId('{publisher_rg}', 'Microsoft.HybridNetwork/publishers/configurationGroupSchemas', '{publisher}', '{schema_name}')]"
                    ),
                },
                "configurationValue": value.to_string(),
            },
        }));
        references.insert(schema_name.clone(), json!({"id": id}));
        depends_on.push(id);
    }

    resources.push(json!({
        "type": "Microsoft.HybridNetwork/siteNetworkServices",
        "apiVersion": HYBRID_NETWORK_API_VERSION,
        "name": config.sns_name,
        "location": "[parameters('location')]",
        "dependsOn": depends_on,
        "properties": {
            "siteReference": {
                "id": format!("[resourceId('Microsoft.HybridNetwork/sites', '{}')]", config.site_name),
            },
            "networkServiceDesignVersionResourceReference": {
                "idType": "Open",
                "id": format!(
                    "[resourceId('{publisher_rg}', 'Microsoft.HybridNetwork/publishers/networkservicedesigngroups/networkservicedesignversions', '{publisher}', '{}', '{}')]",
                    config.nsd_name, config.nsd_version,
                ),
            },
            "desiredStateConfigurationGroupValueReferences": references,
        },
    }));

    json!({
        "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
        "contentVersion": "1.0.0.0",
        "parameters": {"location": {"type": "string"}},
        "resources": resources,
    })
}

fn read_values(config: &SnsConfig) -> Result<Vec<(String, Value)>, Error> {
    config
        .configuration_group_values
        .iter()
        .map(|values| {
            let error = |err: String| Error::Values {
                err,
                path: values.values_file.clone(),
            };
            let contents = std::fs::read_to_string(&values.values_file).map_err(|err| error(err.to_string()))?;
            let value: Value = serde_json::from_str(&contents).map_err(|err| error(err.to_string()))?;
            if !value.is_object() {
                return Err(error("values must be a JSON object".into()));
            }
            Ok((values.schema_name.clone(), value))
        })
        .collect()
}

/// Deploy the site network service and return the deployment name.
pub async fn deploy_sns(client: &dyn ManagementClient, config: &SnsConfig) -> Result<String, Error> {
    let values = read_values(config)?;
    let template = sns_template(config, &values);
    let name = deploy::deployment_name(&format!("aosm-sns-{}", config.sns_name), Utc::now());
    deploy::validate_and_deploy(
        client,
        &config.resource_group,
        &name,
        template,
        json!({"location": {"value": config.location}}),
    )
    .await?;
    info!("Site network service {} deployed", config.sns_name);
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::fake::FakeClient;
    use crate::config::ConfigurationGroupValuesConfig;

    fn config(values_file: PathBuf) -> SnsConfig {
        SnsConfig {
            location: "westeurope".into(),
            resource_group: "operator-rg".into(),
            publisher_name: "contoso".into(),
            publisher_resource_group_name: "contoso-rg".into(),
            nsd_name: "ubuntu-nsd".into(),
            nsd_version: "1.0.0".into(),
            site_name: "ubuntu-site".into(),
            sns_name: "ubuntu-sns".into(),
            nfvi_site_name: "ubuntu-nsd_NFVI".into(),
            nfvi_type: NfType::Vnf,
            custom_location_id: None,
            configuration_group_values: vec![ConfigurationGroupValuesConfig {
                schema_name: "ubuntu-vm".into(),
                values_file,
            }],
        }
    }

    #[test]
    fn template_references_design_and_values() {
        let values = vec![("ubuntu-vm".to_string(), json!({"adminUsername": "azureuser"}))];
        let template = sns_template(&config(PathBuf::from("values.json")), &values);
        let resources = template["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0]["properties"]["nfvis"][0]["nfviType"], "AzureCore");
        assert_eq!(resources[1]["name"], "ubuntu-sns-ubuntu-vm");
        assert_eq!(resources[1]["properties"]["configurationValue"], r#"{"adminUsername":"azureuser"}"#);

        let sns = &resources[2]["properties"];
        assert!(sns["networkServiceDesignVersionResourceReference"]["id"]
            .as_str()
            .unwrap()
            .ends_with("'contoso', 'ubuntu-nsd', '1.0.0')]"));
        assert!(sns["desiredStateConfigurationGroupValueReferences"]["ubuntu-vm"]["id"]
            .as_str()
            .unwrap()
            .contains("ubuntu-sns-ubuntu-vm"));
        assert_eq!(resources[2]["dependsOn"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deploys_into_the_operator_resource_group() {
        let dir = tempfile::tempdir().unwrap();
        let values_file = dir.path().join("values.json");
        std::fs::write(&values_file, r#"{"adminUsername": "azureuser"}"#).unwrap();

        let client = FakeClient::default();
        let name = deploy_sns(&client, &config(values_file)).await.unwrap();
        assert!(name.starts_with("aosm-sns-ubuntu-sns-"));
        assert_eq!(
            client.calls(),
            vec![format!("validate operator-rg/{name}"), format!("create operator-rg/{name}")]
        );
    }

    #[tokio::test]
    async fn values_must_be_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let values_file = dir.path().join("values.json");
        std::fs::write(&values_file, "[1, 2]").unwrap();
        let err = deploy_sns(&FakeClient::default(), &config(values_file)).await.unwrap_err();
        assert!(matches!(err, Error::Values { .. }));
    }
}
