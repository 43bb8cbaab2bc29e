/// Azure Operator Service Manager onboarding
use aosm::azure::{self, AzureClient, ManagementClient};
use aosm::config::NfType;
use aosm::handler::{self, ConfigKind};
use clap::{Parser, Subcommand};
use log::{debug, error, info};
use std::path::PathBuf;

/// Build network function definitions and network service designs, and publish them to Azure.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Azure subscription to publish into. Defaults to the az cli's current subscription.
    #[arg(long, global = true, env = "AZURE_SUBSCRIPTION_ID")]
    subscription: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Network function definitions.
    Nfd {
        #[command(subcommand)]
        command: NfdCommands,
    },
    /// Network service designs.
    Nsd {
        #[command(subcommand)]
        command: NsdCommands,
    },
    /// Site network services.
    Sns {
        #[command(subcommand)]
        command: SnsCommands,
    },
}

#[derive(Debug, Subcommand)]
enum NfdCommands {
    /// Write an example configuration file.
    GenerateConfig {
        #[arg(long, value_enum)]
        definition_type: NfType,
        #[arg(long)]
        output_file: Option<PathBuf>,
    },
    /// Build a definition folder from a configuration file.
    Build {
        #[arg(long, value_enum)]
        definition_type: NfType,
        #[arg(long)]
        config_file: PathBuf,
        /// Defaults to `<definition-type>-cli-output`.
        #[arg(long)]
        build_output_folder: Option<PathBuf>,
        /// Overwrite an existing output folder.
        #[arg(long)]
        force: bool,
    },
    /// Deploy a built definition folder.
    Publish {
        #[arg(long, value_enum)]
        definition_type: NfType,
        #[arg(long)]
        build_output_folder: Option<PathBuf>,
    },
    /// Delete what a definition folder published.
    Delete {
        #[arg(long, value_enum)]
        definition_type: NfType,
        #[arg(long)]
        build_output_folder: Option<PathBuf>,
        /// Also delete the publisher and artifact stores.
        #[arg(long)]
        clean: bool,
    },
}

#[derive(Debug, Subcommand)]
enum NsdCommands {
    /// Write an example configuration file.
    GenerateConfig {
        #[arg(long)]
        output_file: Option<PathBuf>,
    },
    /// Build a design folder from a configuration file.
    Build {
        #[arg(long)]
        config_file: PathBuf,
        /// Defaults to `nsd-cli-output`.
        #[arg(long)]
        build_output_folder: Option<PathBuf>,
        /// Overwrite an existing output folder.
        #[arg(long)]
        force: bool,
    },
    /// Deploy a built design folder.
    Publish {
        #[arg(long)]
        build_output_folder: Option<PathBuf>,
    },
    /// Delete what a design folder published.
    Delete {
        #[arg(long)]
        build_output_folder: Option<PathBuf>,
        /// Also delete the publisher and artifact stores.
        #[arg(long)]
        clean: bool,
    },
}

#[derive(Debug, Subcommand)]
enum SnsCommands {
    /// Write an example configuration file.
    GenerateConfig {
        #[arg(long)]
        output_file: Option<PathBuf>,
    },
    /// Deploy a site network service.
    Deploy {
        #[arg(long)]
        config_file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

async fn client(subscription: Option<String>) -> Result<AzureClient, azure::Error> {
    AzureClient::from_environment(subscription).await
}

fn output_folder(kind: ConfigKind, folder: Option<PathBuf>) -> PathBuf {
    folder.unwrap_or_else(|| kind.default_output_folder())
}

async fn run() -> Result<(), handler::Error> {
    env_logger::init();

    let args = Cli::parse();
    let subscription = args.subscription;

    match args.command {
        Commands::Nfd { command } => match command {
            NfdCommands::GenerateConfig {
                definition_type,
                output_file,
            } => {
                handler::generate_config(ConfigKind::Nfd(definition_type), output_file.as_deref())?;
            }
            NfdCommands::Build {
                definition_type,
                config_file,
                build_output_folder,
                force,
            } => {
                let folder = handler::build_nfd(definition_type, &config_file, build_output_folder.as_deref(), force)?;
                info!("Build complete, publish it with `aosm nfd publish --definition-type {} --build-output-folder {}`",
                    definition_type.as_str(), folder.display());
            }
            NfdCommands::Publish {
                definition_type,
                build_output_folder,
            } => {
                let client = client(subscription).await?;
                let folder = output_folder(ConfigKind::Nfd(definition_type), build_output_folder);
                handler::publish(&client, &folder).await?;
            }
            NfdCommands::Delete {
                definition_type,
                build_output_folder,
                clean,
            } => {
                let client = client(subscription).await?;
                let folder = output_folder(ConfigKind::Nfd(definition_type), build_output_folder);
                handler::delete(&client, &folder, clean).await?;
            }
        },
        Commands::Nsd { command } => match command {
            NsdCommands::GenerateConfig { output_file } => {
                handler::generate_config(ConfigKind::Nsd, output_file.as_deref())?;
            }
            NsdCommands::Build {
                config_file,
                build_output_folder,
                force,
            } => {
                // Only needed when deploy parameters must be fetched from Azure.
                let client = match client(subscription).await {
                    Ok(client) => Some(client),
                    Err(err) => {
                        debug!("No Azure client available: {err}");
                        None
                    }
                };
                let folder = handler::build_nsd(
                    &config_file,
                    build_output_folder.as_deref(),
                    force,
                    client.as_ref().map(|client| client as &dyn ManagementClient),
                )
                .await?;
                info!("Build complete, publish it with `aosm nsd publish --build-output-folder {}`",
                    folder.display());
            }
            NsdCommands::Publish { build_output_folder } => {
                let client = client(subscription).await?;
                handler::publish(&client, &output_folder(ConfigKind::Nsd, build_output_folder)).await?;
            }
            NsdCommands::Delete {
                build_output_folder,
                clean,
            } => {
                let client = client(subscription).await?;
                handler::delete(&client, &output_folder(ConfigKind::Nsd, build_output_folder), clean).await?;
            }
        },
        Commands::Sns { command } => match command {
            SnsCommands::GenerateConfig { output_file } => {
                handler::generate_config(ConfigKind::Sns, output_file.as_deref())?;
            }
            SnsCommands::Deploy { config_file } => {
                let client = client(subscription).await?;
                let deployment = handler::deploy_sns(&client, &config_file).await?;
                info!("Deployment {deployment} finished");
            }
        },
    }
    Ok(())
}
