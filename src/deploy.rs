use crate::azure::{self, ManagementClient};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;

/// ARM refuses deployment names longer than this.
pub const MAX_DEPLOYMENT_NAME_LENGTH: usize = 64;
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LENGTH: usize = 14;

#[cfg(not(test))]
const VALIDATION_RETRY_DELAY: Duration = Duration::from_secs(10);
#[cfg(test)]
const VALIDATION_RETRY_DELAY: Duration = Duration::ZERO;

#[derive(Error, Debug)]
pub enum Error {
    #[error("bicep build of {0} exited with code {1}")]
    Compile(PathBuf, ExitStatus),

    #[error("bicep build of {path} produced invalid JSON: {err}")]
    CompileOutput { err: serde_json::Error, path: PathBuf },

    #[error("read parameters {path}: {err}")]
    Parameters { err: String, path: PathBuf },

    #[error("validation of deployment {name} failed: {message}")]
    Validation { name: String, message: String },

    #[error("deployment {name} finished with provisioning state {state}")]
    Provisioning { name: String, state: String },

    #[error("azure: {0}")]
    Azure(#[from] azure::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Compile a Bicep file to an ARM JSON template with `az bicep build`.
pub fn compile_bicep(path: &Path) -> Result<Value, Error> {
    debug!("Compiling {}", path.display());
    let output = std::process::Command::new("az")
        .arg("bicep")
        .arg("build")
        .arg("--file")
        .arg(path)
        .arg("--stdout")
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()?;
    if !output.status.success() {
        return Err(Error::Compile(path.to_path_buf(), output.status));
    }
    serde_json::from_slice(&output.stdout).map_err(|err| Error::CompileOutput {
        err,
        path: path.to_path_buf(),
    })
}

/// The `parameters` object of an ARM deployment parameters file.
pub fn read_parameters(path: &Path) -> Result<Value, Error> {
    let parameters_error = |err: String| Error::Parameters {
        err,
        path: path.to_path_buf(),
    };
    let contents = std::fs::read_to_string(path).map_err(|err| parameters_error(err.to_string()))?;
    let file: Value = serde_json::from_str(&contents).map_err(|err| parameters_error(err.to_string()))?;
    match file.get("parameters") {
        Some(parameters @ Value::Object(_)) => Ok(parameters.clone()),
        _ => Err(parameters_error("no parameters object".into())),
    }
}

/// `<base>-<timestamp>`, shortened with a hash when `base` leaves no room for the timestamp.
pub fn deployment_name(base: &str, now: DateTime<Utc>) -> String {
    let max_base = MAX_DEPLOYMENT_NAME_LENGTH - TIMESTAMP_LENGTH - 1;
    let base = if base.len() > max_base {
        crate::auth::slug_hash_prefix_truncate(base, "aosm", max_base).unwrap_or_else(|| "aosm".to_string())
    } else {
        base.to_string()
    };
    format!("{base}-{}", now.format(TIMESTAMP_FORMAT))
}

/// Validate and create a deployment, returning its outputs.
///
/// Validation is retried once when the failure looks transient. Anything
/// other than a `Succeeded` provisioning state is an error.
pub async fn validate_and_deploy(
    client: &dyn ManagementClient,
    resource_group: &str,
    name: &str,
    template: Value,
    parameters: Value,
) -> Result<Value, Error> {
    let deployment = json!({
        "properties": {
            "mode": "Incremental",
            "template": template,
            "parameters": parameters,
        }
    });

    let validation = match client.validate_deployment(resource_group, name, &deployment).await {
        Err(err) if err.is_transient() => {
            warn!("Validation of {name} failed with {err}, retrying");
            tokio::time::sleep(VALIDATION_RETRY_DELAY).await;
            client.validate_deployment(resource_group, name, &deployment).await
        }
        result => result,
    };
    match validation {
        Ok(()) => {}
        Err(azure::Error::Validation(message)) => {
            return Err(Error::Validation {
                name: name.to_string(),
                message,
            })
        }
        Err(err) => return Err(err.into()),
    }

    info!("Deploying {name} into resource group {resource_group}");
    let properties = client.create_deployment(resource_group, name, &deployment).await?;
    let state = properties
        .get("provisioningState")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    if state != "Succeeded" {
        return Err(Error::Provisioning {
            name: name.to_string(),
            state: state.to_string(),
        });
    }
    debug!("Deployment {name} succeeded");
    Ok(properties.get("outputs").cloned().unwrap_or_else(|| json!({})))
}

/// Compile a Bicep template and deploy it with its parameters file.
/// Returns the name of the created deployment.
pub async fn deploy_bicep(
    client: &dyn ManagementClient,
    resource_group: &str,
    name_base: &str,
    template_path: &Path,
    parameters_path: &Path,
) -> Result<String, Error> {
    let template = compile_bicep(template_path)?;
    let parameters = read_parameters(parameters_path)?;
    let name = deployment_name(name_base, Utc::now());
    validate_and_deploy(client, resource_group, &name, template, parameters).await?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::fake::FakeClient;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
    }

    fn unavailable() -> azure::Error {
        azure::Error::Status {
            method: "POST",
            url: "validate".into(),
            status: 503,
            body: String::new(),
        }
    }

    #[test]
    fn deployment_names_carry_a_timestamp() {
        assert_eq!(deployment_name("ubuntu-nfdv", now()), "ubuntu-nfdv-20240301123005");
    }

    #[test]
    fn long_deployment_names_are_truncated() {
        let base = "a-very-long-network-function-definition-name-that-goes-on-and-on";
        let name = deployment_name(base, now());
        assert_eq!(name.len(), MAX_DEPLOYMENT_NAME_LENGTH);
        assert!(name.starts_with("aosm-a-very-long"));
        assert!(name.ends_with("-20240301123005"));
        assert_ne!(name, deployment_name(&format!("{base}-2"), now()));
    }

    #[tokio::test]
    async fn validation_is_retried_once_on_transient_failure() {
        let client = FakeClient::default();
        client.validation_results.lock().unwrap().push_back(Err(unavailable()));
        validate_and_deploy(&client, "rg", "d", json!({}), json!({})).await.unwrap();
        assert_eq!(client.calls(), vec!["validate rg/d", "validate rg/d", "create rg/d"]);
    }

    #[tokio::test]
    async fn second_transient_failure_is_fatal() {
        let client = FakeClient::default();
        client.validation_results.lock().unwrap().extend([Err(unavailable()), Err(unavailable())]);
        let err = validate_and_deploy(&client, "rg", "d", json!({}), json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Azure(_)));
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let client = FakeClient::default();
        client
            .validation_results
            .lock()
            .unwrap()
            .push_back(Err(azure::Error::Validation("missing parameter".into())));
        let err = validate_and_deploy(&client, "rg", "d", json!({}), json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Validation { ref message, .. } if message == "missing parameter"));
        assert_eq!(client.calls(), vec!["validate rg/d"]);
    }

    #[tokio::test]
    async fn failed_provisioning_state_is_an_error() {
        let client = FakeClient::default();
        *client.provisioning_state.lock().unwrap() = Some("Failed".into());
        let err = validate_and_deploy(&client, "rg", "d", json!({}), json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Provisioning { ref state, .. } if state == "Failed"));
    }

    #[test]
    fn parameters_are_read_from_the_parameters_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.parameters.json");
        std::fs::write(&path, r#"{"parameters": {"location": {"value": "westeurope"}}}"#).unwrap();
        assert_eq!(read_parameters(&path).unwrap()["location"]["value"], "westeurope");

        std::fs::write(&path, "{}").unwrap();
        assert!(matches!(read_parameters(&path), Err(Error::Parameters { .. })));
    }
}
