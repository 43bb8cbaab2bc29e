use log::debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} login failed with exit code {1}")]
    Login(&'static str, ExitStatus),

    #[error("{0} logout failed with exit code {1}")]
    Logout(&'static str, ExitStatus),

    #[error("oras push of {0} failed with exit code {1}")]
    Push(String, ExitStatus),

    #[error("oras copy of {0} failed with exit code {1}")]
    Copy(String, ExitStatus),

    #[error("helm package of {0} failed with exit code {1}")]
    Package(PathBuf, ExitStatus),

    #[error("helm push of {0} failed with exit code {1}")]
    HelmPush(PathBuf, ExitStatus),

    #[error("azcopy of {0} failed with exit code {1}")]
    AzCopy(String, ExitStatus),

    #[error("helm package produced no archive in {0}")]
    NoPackage(PathBuf),

    #[error("invalid file path {0}")]
    InvalidPath(PathBuf),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Registry clients that can log in with a scoped token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryClient {
    Oras,
    Helm,
}

impl RegistryClient {
    fn name(&self) -> &'static str {
        match self {
            RegistryClient::Oras => "oras",
            RegistryClient::Helm => "helm",
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.name());
        if *self == RegistryClient::Helm {
            command.arg("registry");
        }
        command
    }
}

fn run(command: &mut Command, error: impl FnOnce(ExitStatus) -> Error) -> Result<(), Error> {
    command
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map(|exit_status| {
            if exit_status.success() {
                Ok(())
            } else {
                Err(error(exit_status))
            }
        })?
}

/// Host name of a registry login server URL.
pub fn registry_host(server_url: &str) -> &str {
    server_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

pub fn login(client: RegistryClient, registry: &str, username: &str, token: &str) -> Result<(), Error> {
    debug!("Logging in to registry {registry} with {}", client.name());
    let mut child = client
        .command()
        .arg("login")
        .arg(registry)
        .arg("--username")
        .arg(username)
        .arg("--password-stdin")
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()?;

    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(token.as_bytes())?;
    }
    let status = child.wait_with_output()?.status;
    if status.success() {
        Ok(())
    } else {
        Err(Error::Login(client.name(), status))
    }
}

pub fn logout(client: RegistryClient, registry: &str) -> Result<(), Error> {
    run(client.command().arg("logout").arg(registry), |status| {
        Error::Logout(client.name(), status)
    })
}

/// Push a single file as an OCI artifact.
pub fn oras_push(registry: &str, name: &str, version: &str, file: &Path) -> Result<(), Error> {
    let reference = format!("{registry}/{name}:{version}");
    debug!("Pushing {} to {reference}", file.display());
    let directory = file.parent().filter(|parent| !parent.as_os_str().is_empty());
    let file_name = file.file_name().ok_or_else(|| Error::InvalidPath(file.to_path_buf()))?;

    let mut command = Command::new("oras");
    command.arg("push").arg(&reference).arg(file_name);
    if let Some(directory) = directory {
        command.current_dir(directory);
    }
    run(&mut command, |status| Error::Push(reference.clone(), status))
}

/// Copy an image between registries without pulling it locally.
pub fn oras_copy(source: &str, target: &str) -> Result<(), Error> {
    debug!("Copying {source} to {target}");
    run(Command::new("oras").arg("copy").arg(source).arg(target), |status| {
        Error::Copy(source.to_string(), status)
    })
}

/// Push a chart to `oci://<registry>`, packaging it first when it is a directory.
pub fn helm_push(chart: &Path, registry: &str) -> Result<(), Error> {
    let scratch = tempfile::tempdir()?;
    let archive = if chart.is_dir() {
        run(
            Command::new("helm")
                .arg("package")
                .arg(chart)
                .arg("--destination")
                .arg(scratch.path()),
            |status| Error::Package(chart.to_path_buf(), status),
        )?;
        packaged_chart(scratch.path())?
    } else {
        chart.to_path_buf()
    };

    debug!("Pushing chart {} to {registry}", archive.display());
    run(
        Command::new("helm")
            .arg("push")
            .arg(&archive)
            .arg(format!("oci://{registry}")),
        |status| Error::HelmPush(archive.clone(), status),
    )
}

fn packaged_chart(directory: &Path) -> Result<PathBuf, Error> {
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if path.extension().is_some_and(|extension| extension == "tgz") {
            return Ok(path);
        }
    }
    Err(Error::NoPackage(directory.to_path_buf()))
}

/// Blob URL inside a container SAS URI, keeping the SAS query string.
pub fn blob_url(container_sas_uri: &str, blob_name: &str) -> String {
    match container_sas_uri.split_once('?') {
        Some((container, query)) => format!("{}/{blob_name}?{query}", container.trim_end_matches('/')),
        None => format!("{}/{blob_name}", container_sas_uri.trim_end_matches('/')),
    }
}

/// Upload a local file or copy a remote blob with `azcopy`.
pub fn azcopy(source: &str, destination: &str) -> Result<(), Error> {
    debug!("Copying {source} into storage account");
    run(
        Command::new("azcopy").arg("copy").arg(source).arg(destination),
        |status| Error::AzCopy(source.to_string(), status),
    )
}
