pub mod artifact;
pub mod auth;
pub mod azure;
pub mod bicep;
pub mod build;
pub mod config;
pub mod definition;
pub mod deploy;
pub mod handler;
pub mod input;
pub mod processor;
pub mod publish;
pub mod sns;
pub mod upload;

/// API version of the `Microsoft.HybridNetwork` resource provider.
pub const HYBRID_NETWORK_API_VERSION: &str = "2023-09-01";
