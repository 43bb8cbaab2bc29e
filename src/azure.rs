use crate::auth;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const DEPLOYMENTS_API_VERSION: &str = "2022-09-01";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum Error {
    #[error("auth: {0}")]
    Auth(#[from] auth::Error),

    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("long running operation {url} ended as {status}: {message}")]
    Operation {
        url: String,
        status: String,
        message: String,
    },

    #[error("unexpected response from {url}: {body}")]
    Deserialize { url: String, body: String },
}

impl Error {
    /// Failures worth retrying: throttling, server errors and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Reqwest(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Error::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Scoped credentials for pushing into an artifact store.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "credentialType")]
pub enum ArtifactCredential {
    #[serde(rename = "AzureContainerRegistryScopedToken", rename_all = "camelCase")]
    ContainerRegistry {
        username: String,
        acr_token: String,
        acr_server_url: String,
        #[serde(default)]
        repositories: Vec<String>,
    },
    #[serde(rename = "AzureStorageAccountToken", rename_all = "camelCase")]
    StorageAccount {
        container_credentials: Vec<ContainerCredential>,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerCredential {
    pub container_name: String,
    pub container_sas_uri: String,
}

/// The management plane operations the tool drives.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    fn subscription_id(&self) -> &str;

    /// Validate a deployment. Template errors come back as [`Error::Validation`].
    async fn validate_deployment(&self, resource_group: &str, name: &str, deployment: &Value) -> Result<(), Error>;

    /// Create a deployment, wait for it to finish, and return its `properties`.
    async fn create_deployment(&self, resource_group: &str, name: &str, deployment: &Value) -> Result<Value, Error>;

    /// IDs of the resources a finished deployment created.
    async fn deployment_output_resources(&self, resource_group: &str, name: &str) -> Result<Vec<String>, Error>;

    async fn get_resource(&self, resource_id: &str, api_version: &str) -> Result<Option<Value>, Error>;

    /// Delete a resource and wait for it to disappear. Missing resources are not an error.
    async fn delete_resource(&self, resource_id: &str, api_version: &str) -> Result<(), Error>;

    async fn list_manifest_credential(&self, manifest_id: &str) -> Result<ArtifactCredential, Error>;
}

/// Talks to ARM over HTTPS with a bearer token.
pub struct AzureClient {
    http: reqwest::Client,
    token: String,
    subscription_id: String,
    endpoint: String,
}

fn deployment_url(endpoint: &str, subscription: &str, resource_group: &str, name: &str) -> String {
    format!(
        "{endpoint}/subscriptions/{subscription}/resourcegroups/{resource_group}/providers/Microsoft.Resources/deployments/{name}"
    )
}

fn error_message(body: &Value) -> String {
    let error = body.get("error").unwrap_or(body);
    let mut message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    if let Some(details) = error.get("details").and_then(Value::as_array) {
        for detail in details {
            message.push_str("; ");
            message.push_str(&error_message(detail));
        }
    }
    message
}

fn retry_after(response: &Response) -> Duration {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL)
}

fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

impl AzureClient {
    /// Build a client from the ambient credentials.
    pub async fn from_environment(subscription_id: Option<String>) -> Result<Self, Error> {
        let token = auth::token().await?;
        let subscription_id = match subscription_id {
            Some(id) => id,
            None => auth::default_subscription()?,
        };
        debug!("Using subscription {subscription_id}");
        Ok(Self {
            http: reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?,
            token,
            subscription_id,
            endpoint: MANAGEMENT_ENDPOINT.to_string(),
        })
    }

    async fn json_body(method: &'static str, url: &str, response: Response) -> Result<Value, Error> {
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(Error::Status {
                method,
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|_| Error::Deserialize {
            url: url.to_string(),
            body: String::from_utf8_lossy(&bytes).to_string(),
        })
    }

    /// Follow a `Location` header until the operation stops answering 202.
    async fn poll_location(&self, url: &str, mut wait: Duration) -> Result<Response, Error> {
        loop {
            tokio::time::sleep(wait).await;
            debug!("Polling {url}");
            let response = self.http.get(url).bearer_auth(&self.token).send().await?;
            if response.status() != StatusCode::ACCEPTED {
                return Ok(response);
            }
            wait = retry_after(&response);
        }
    }

    /// Follow an `Azure-AsyncOperation` header until the operation reaches a terminal status.
    async fn poll_async_operation(&self, url: &str, mut wait: Duration) -> Result<(), Error> {
        loop {
            tokio::time::sleep(wait).await;
            debug!("Polling {url}");
            let response = self.http.get(url).bearer_auth(&self.token).send().await?;
            wait = retry_after(&response);
            let body = Self::json_body("GET", url, response).await?;
            let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
            match status {
                "Succeeded" => return Ok(()),
                "Failed" | "Canceled" => {
                    return Err(Error::Operation {
                        url: url.to_string(),
                        status: status.to_string(),
                        message: error_message(&body),
                    })
                }
                _ => continue,
            }
        }
    }

    async fn get_deployment(&self, resource_group: &str, name: &str) -> Result<Value, Error> {
        let url = deployment_url(&self.endpoint, &self.subscription_id, resource_group, name);
        let response = self
            .http
            .get(&url)
            .query(&[("api-version", DEPLOYMENTS_API_VERSION)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::json_body("GET", &url, response).await
    }
}

#[async_trait]
impl ManagementClient for AzureClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn validate_deployment(&self, resource_group: &str, name: &str, deployment: &Value) -> Result<(), Error> {
        let url = format!(
            "{}/validate",
            deployment_url(&self.endpoint, &self.subscription_id, resource_group, name)
        );
        debug!("Validating deployment {name} in {resource_group}");
        let mut response = self
            .http
            .post(&url)
            .query(&[("api-version", DEPLOYMENTS_API_VERSION)])
            .bearer_auth(&self.token)
            .json(deployment)
            .send()
            .await?;
        if response.status() == StatusCode::ACCEPTED {
            if let Some(location) = header(&response, "location") {
                let wait = retry_after(&response);
                response = self.poll_location(&location, wait).await?;
            }
        }

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let bytes = response.bytes().await?;
            let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            return Err(Error::Validation(error_message(&body)));
        }
        let body = Self::json_body("POST", &url, response).await?;
        if body.get("error").is_some() {
            return Err(Error::Validation(error_message(&body)));
        }
        Ok(())
    }

    async fn create_deployment(&self, resource_group: &str, name: &str, deployment: &Value) -> Result<Value, Error> {
        let url = deployment_url(&self.endpoint, &self.subscription_id, resource_group, name);
        debug!("Creating deployment {name} in {resource_group}");
        let response = self
            .http
            .put(&url)
            .query(&[("api-version", DEPLOYMENTS_API_VERSION)])
            .bearer_auth(&self.token)
            .json(deployment)
            .send()
            .await?;
        let operation = header(&response, "azure-asyncoperation");
        let wait = retry_after(&response);
        Self::json_body("PUT", &url, response).await?;

        if let Some(operation) = operation {
            if let Err(err) = self.poll_async_operation(&operation, wait).await {
                // The deployment itself carries the provisioning state and error details.
                warn!("Deployment {name} did not succeed: {err}");
            }
        }
        let deployment = self.get_deployment(resource_group, name).await?;
        Ok(deployment.get("properties").cloned().unwrap_or(Value::Null))
    }

    async fn deployment_output_resources(&self, resource_group: &str, name: &str) -> Result<Vec<String>, Error> {
        let deployment = self.get_deployment(resource_group, name).await?;
        Ok(deployment
            .pointer("/properties/outputResources")
            .and_then(Value::as_array)
            .map(|resources| {
                resources
                    .iter()
                    .filter_map(|resource| resource.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_resource(&self, resource_id: &str, api_version: &str) -> Result<Option<Value>, Error> {
        let url = format!("{}{resource_id}", self.endpoint);
        let response = self
            .http
            .get(&url)
            .query(&[("api-version", api_version)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::json_body("GET", &url, response).await.map(Some)
    }

    async fn delete_resource(&self, resource_id: &str, api_version: &str) -> Result<(), Error> {
        let url = format!("{}{resource_id}", self.endpoint);
        debug!("Deleting {resource_id}");
        let response = self
            .http
            .delete(&url)
            .query(&[("api-version", api_version)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => return Ok(()),
            StatusCode::ACCEPTED => match header(&response, "location") {
                Some(location) => {
                    let wait = retry_after(&response);
                    self.poll_location(&location, wait).await?
                }
                None => response,
            },
            _ => response,
        };
        Self::json_body("DELETE", &url, response).await.map(|_| ())
    }

    async fn list_manifest_credential(&self, manifest_id: &str) -> Result<ArtifactCredential, Error> {
        let url = format!("{}{manifest_id}/listCredential", self.endpoint);
        let response = self
            .http
            .post(&url)
            .query(&[("api-version", crate::HYBRID_NETWORK_API_VERSION)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body = Self::json_body("POST", &url, response).await?;
        serde_json::from_value(body.clone()).map_err(|_| Error::Deserialize {
            url,
            body: body.to_string(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transient_errors() {
        let status = |status| Error::Status {
            method: "POST",
            url: "u".into(),
            status,
            body: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(403).is_transient());
        assert!(!Error::Validation("bad template".into()).is_transient());
    }

    #[test]
    fn nested_error_messages() {
        let body = json!({
            "error": {
                "message": "Deployment template validation failed",
                "details": [{"message": "parameter 'location' is missing"}]
            }
        });
        assert_eq!(
            error_message(&body),
            "Deployment template validation failed; parameter 'location' is missing"
        );
    }

    #[test]
    fn credentials_deserialize() {
        let acr: ArtifactCredential = serde_json::from_value(json!({
            "credentialType": "AzureContainerRegistryScopedToken",
            "username": "contoso-token",
            "acrToken": "s3cr3t",
            "acrServerUrl": "https://contoso.azurecr.io",
            "repositories": ["ubuntu-template"],
            "expiry": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert!(matches!(acr, ArtifactCredential::ContainerRegistry { ref username, .. } if username == "contoso-token"));

        let sa: ArtifactCredential = serde_json::from_value(json!({
            "credentialType": "AzureStorageAccountToken",
            "containerCredentials": [{"containerName": "ubuntu-vhd-1-0-0", "containerSasUri": "https://sa/c?sig=1"}],
            "storageResourceId": "/x",
        }))
        .unwrap();
        match sa {
            ArtifactCredential::StorageAccount { container_credentials } => {
                assert_eq!(container_credentials[0].container_name, "ubuntu-vhd-1-0-0")
            }
            other => panic!("unexpected credential {other:?}"),
        }
    }
}
