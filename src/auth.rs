use log::debug;
use serde::Deserialize;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;

const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("read federated token {path}: {err}")]
    FederatedToken { err: std::io::Error, path: String },

    #[error("az cli exited with code {0}")]
    AzCli(ExitStatus),

    #[error("az cli returned no value for {0}")]
    AzCliOutput(&'static str),

    #[error("code: {0}, body: {1}")]
    Deserialize(u16, String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Bearer token for Azure Resource Manager.
///
/// Tried in order: `AZURE_ACCESS_TOKEN`, a workload identity federated token
/// (`AZURE_FEDERATED_TOKEN_FILE`, `AZURE_CLIENT_ID`, `AZURE_TENANT_ID`), and
/// finally the logged-in az cli.
pub async fn token() -> Result<String, Error> {
    if let Ok(token) = std::env::var("AZURE_ACCESS_TOKEN") {
        debug!("Using access token from AZURE_ACCESS_TOKEN");
        return Ok(token);
    }

    let federated_token_file = std::env::var("AZURE_FEDERATED_TOKEN_FILE").ok();
    let client_id = std::env::var("AZURE_CLIENT_ID").ok();
    let tenant_id = std::env::var("AZURE_TENANT_ID").ok();

    match (federated_token_file, client_id, tenant_id) {
        (Some(federated_token_file), Some(client_id), Some(tenant_id)) => {
            let assertion = std::fs::read_to_string(&federated_token_file).map_err(|err| Error::FederatedToken {
                err,
                path: federated_token_file.clone(),
            })?;
            exchange_federated_token(&tenant_id, &client_id, assertion.trim())
                .await
                .map(|token| token.access_token)
        }
        (_, _, _) => az_cli_token(),
    }
}

#[derive(Deserialize)]
pub struct TokenExchangeResponse {
    pub access_token: String,
}

pub async fn exchange_federated_token(
    tenant_id: &str,
    client_id: &str,
    assertion: &str,
) -> Result<TokenExchangeResponse, Error> {
    debug!("Exchanging federated token for an Azure access token");
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("scope", MANAGEMENT_SCOPE),
        (
            "client_assertion_type",
            "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
        ),
        ("client_assertion", assertion),
    ];

    let resp = client
        .post(format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token"))
        .form(&form)
        .send()
        .await?;

    let status = resp.status().as_u16();
    let bytes = resp.bytes().await?;

    match serde_json::from_slice(&bytes) {
        Ok(token) => Ok(token),
        Err(_) => {
            let body = String::from_utf8_lossy(&bytes);
            Err(Error::Deserialize(status, body.to_string()))
        }
    }
}

fn az_query(args: &[&str], what: &'static str) -> Result<String, Error> {
    let output = std::process::Command::new("az")
        .args(args)
        .arg("--output")
        .arg("tsv")
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()?;
    if !output.status.success() {
        return Err(Error::AzCli(output.status));
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        return Err(Error::AzCliOutput(what));
    }
    Ok(value)
}

pub fn az_cli_token() -> Result<String, Error> {
    debug!("Getting access token from az cli");
    az_query(
        &[
            "account",
            "get-access-token",
            "--resource",
            "https://management.azure.com/",
            "--query",
            "accessToken",
        ],
        "accessToken",
    )
}

/// Subscription the az cli is currently logged in to.
pub fn default_subscription() -> Result<String, Error> {
    az_query(&["account", "show", "--query", "id"], "id")
}

/// Concatenate slug and prefix into `<PREFIX>-<TRUNCATED_SLUG>-<HASH>`, where:
/// * `PREFIX` is left as-is,
/// * `TRUNCATED_SLUG` is the part of the slug that still fits into the string after everything is assembled to the maximum length, and
/// * `HASH` is the first four characters of the hex-encoded SHA256 sum of the slug.
///
/// `max_length` must be at least `prefix_len` + 6, otherwise the length of the truncated slug
/// would end up below zero. In this case, `None` is returned.
pub fn slug_hash_prefix_truncate(slug: &str, prefix: &str, max_length: usize) -> Option<String> {
    const HASH_LENGTH: usize = 4;
    let hashed_slug = sha256::digest(slug);
    let slug_length = max_length.checked_sub(prefix.len() + HASH_LENGTH + 2)?;
    let trimmed = truncate(slug, slug_length);
    let truncated = truncate(&hashed_slug, HASH_LENGTH);
    Some([prefix, trimmed, truncated].join("-"))
}

/// Helper function for truncating a string without panicking.
pub fn truncate(s: &str, length: usize) -> &str {
    if s.len() <= length {
        return s;
    }
    let mut end = length;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_hash_prefix_truncate() {
        const MAX_LENGTH: usize = 30;
        let slug = "crm-arbeidsforhold-admin";
        let expected = "gar-crm-arbeidsforhold-ad-4789";
        let result = slug_hash_prefix_truncate(slug, "gar", MAX_LENGTH).unwrap();
        assert_eq!(result, expected);
        assert_eq!(result.len(), MAX_LENGTH);
    }

    #[test]
    fn test_slug_hash_prefix_truncate_out_of_bounds() {
        let slug = "very-long-slug-that-must-be-truncated";
        assert_eq!(slug_hash_prefix_truncate(slug, "four", 9), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("blåbær", 3), "bl");
    }
}
