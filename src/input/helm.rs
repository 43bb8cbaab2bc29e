use super::{infer_schema, read_json, read_yaml, Error, InputArtifact, JSON_SCHEMA_DRAFT};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use Error::*;

const CHART_FILE: &str = "Chart.yaml";
const VALUES_FILE: &str = "values.yaml";
const VALUES_SCHEMA_FILE: &str = "values.schema.json";

/// A container image referenced from chart values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageReference {
    pub name: String,
    pub tag: String,
}

/// A Helm chart, either unpacked on disk or a packaged `.tgz` archive.
#[derive(Debug)]
pub struct HelmChartInput {
    metadata: yaml::Chart,
    chart_dir: PathBuf,
    source_path: PathBuf,
    default_values_path: Option<PathBuf>,
    // Keeps an extracted archive alive for as long as the input is.
    _extracted: Option<TempDir>,
}

fn is_chart_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

fn walk_dir(path: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    Ok(std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect())
}

fn extract(archive: &Path, target: &Path) -> Result<(), Error> {
    debug!("Extracting {} into {}", archive.display(), target.display());
    let status = std::process::Command::new("tar")
        .arg("-xzf")
        .arg(archive)
        .arg("-C")
        .arg(target)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(Extract {
            path: archive.to_path_buf(),
            status,
        })
    }
}

/// A packaged chart holds a single top-level directory named after the chart.
fn find_chart_root(dir: &Path) -> Result<PathBuf, Error> {
    if dir.join(CHART_FILE).is_file() {
        return Ok(dir.to_path_buf());
    }
    walk_dir(dir)?
        .into_iter()
        .find(|path| path.join(CHART_FILE).is_file())
        .ok_or_else(|| InvalidFileType {
            path: dir.to_path_buf(),
        })
}

impl HelmChartInput {
    /// Open a chart directory or archive and check that its dependencies are vendored.
    pub fn from_path(path: &Path, default_values_path: Option<&Path>) -> Result<Self, Error> {
        let (chart_dir, extracted) = if path.is_dir() {
            (path.to_path_buf(), None)
        } else if path.is_file() && is_chart_archive(path) {
            let dir = tempfile::tempdir()?;
            extract(path, dir.path())?;
            (find_chart_root(dir.path())?, Some(dir))
        } else {
            return Err(InvalidFileType {
                path: path.to_path_buf(),
            });
        };

        let chart_file = chart_dir.join(CHART_FILE);
        let metadata: yaml::Chart =
            serde_json::from_value(read_yaml(&chart_file)?).map_err(|err| Json {
                err,
                path: chart_file.clone(),
            })?;

        let input = Self {
            metadata,
            chart_dir,
            source_path: path.to_path_buf(),
            default_values_path: default_values_path.map(Path::to_path_buf),
            _extracted: extracted,
        };
        input.check_dependencies()?;
        Ok(input)
    }

    fn check_dependencies(&self) -> Result<(), Error> {
        let vendored = walk_dir(&self.chart_dir.join("charts")).unwrap_or_default();
        for dependency in &self.metadata.dependencies {
            let present = vendored.iter().any(|path| {
                let file_name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or_default();
                (path.is_dir() && file_name == dependency.name)
                    || (is_chart_archive(path) && file_name.starts_with(&format!("{}-", dependency.name)))
            });
            if !present {
                return Err(MissingChartDependency {
                    chart: self.metadata.name.clone(),
                    dependency: dependency.name.clone(),
                });
            }
            debug!("Chart {} dependency {} found", self.metadata.name, dependency.name);
        }
        Ok(())
    }

    /// Path the chart was given as, which is what gets uploaded.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Values shipped inside the chart, regardless of any override file.
    fn chart_values(&self) -> Result<Option<Value>, Error> {
        let path = self.chart_dir.join(VALUES_FILE);
        if path.is_file() {
            read_yaml(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Container images referenced by the default values.
    ///
    /// Both `image: repo/name:tag` strings and `{repository, tag}` mappings are recognised.
    pub fn images(&self) -> Result<Vec<ImageReference>, Error> {
        let mut images = BTreeSet::new();
        collect_images(&Value::Object(self.get_defaults()?), &mut images);
        Ok(images.into_iter().collect())
    }
}

fn image_name(repository: &str) -> &str {
    repository.rsplit('/').next().unwrap_or(repository)
}

fn collect_images(value: &Value, images: &mut BTreeSet<ImageReference>) {
    match value {
        Value::Object(fields) => {
            if let Some(Value::String(repository)) = fields.get("repository") {
                let tag = match fields.get("tag") {
                    Some(Value::String(tag)) => Some(tag.clone()),
                    Some(Value::Number(tag)) => Some(tag.to_string()),
                    _ => None,
                };
                if let Some(tag) = tag {
                    images.insert(ImageReference {
                        name: image_name(repository).to_string(),
                        tag,
                    });
                }
            }
            if let Some(Value::String(image)) = fields.get("image") {
                // A colon after the last slash separates the tag, anything before is a registry port.
                let last_segment = image_name(image);
                if last_segment.contains('@') {
                    warn!("Image {image} is pinned by digest and cannot be copied as an artifact, skipping");
                } else if let Some((name, tag)) = last_segment.split_once(':') {
                    images.insert(ImageReference {
                        name: name.to_string(),
                        tag: tag.to_string(),
                    });
                }
            }
            fields.values().for_each(|field| collect_images(field, images));
        }
        Value::Array(items) => items.iter().for_each(|item| collect_images(item, images)),
        _ => {}
    }
}

impl InputArtifact for HelmChartInput {
    fn artifact_name(&self) -> &str {
        &self.metadata.name
    }

    fn artifact_version(&self) -> &str {
        &self.metadata.version
    }

    fn get_schema(&self) -> Result<Value, Error> {
        let schema_path = self.chart_dir.join(VALUES_SCHEMA_FILE);
        if schema_path.is_file() {
            debug!("Using {}", schema_path.display());
            return read_json(&schema_path);
        }

        let Some(values) = self.chart_values()? else {
            warn!("Chart {} has neither {VALUES_SCHEMA_FILE} nor {VALUES_FILE}", self.metadata.name);
            return Ok(super::object_schema(Map::new(), vec![]));
        };
        if !values.is_object() && !values.is_null() {
            return Err(SchemaGeneration {
                name: self.metadata.name.clone(),
                reason: format!("{VALUES_FILE} is not a mapping"),
            });
        }

        let mut schema = infer_schema(&values_or_empty(values), true);
        if let Value::Object(fields) = &mut schema {
            fields.insert("$schema".into(), Value::String(JSON_SCHEMA_DRAFT.into()));
        }
        Ok(schema)
    }

    fn get_defaults(&self) -> Result<Map<String, Value>, Error> {
        let values = match &self.default_values_path {
            Some(path) if path.is_file() => read_yaml(path)?,
            Some(_) => return Err(MissingDefaultValues(self.metadata.name.clone())),
            None => self
                .chart_values()?
                .ok_or_else(|| MissingDefaultValues(self.metadata.name.clone()))?,
        };
        match values_or_empty(values) {
            Value::Object(fields) => Ok(fields),
            _ => Ok(Map::new()),
        }
    }
}

/// An empty YAML document parses as null.
fn values_or_empty(values: Value) -> Value {
    match values {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

mod yaml {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct Dependency {
        pub name: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct Chart {
        pub name: String,
        pub version: String,
        #[serde(default)]
        pub dependencies: Vec<Dependency>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write_chart(dir: &Path, chart_yaml: &str, values_yaml: Option<&str>) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(CHART_FILE), chart_yaml).unwrap();
        if let Some(values) = values_yaml {
            fs::write(dir.join(VALUES_FILE), values).unwrap();
        }
    }

    const NGINX_CHART: &str = "apiVersion: v2\nname: nginx\nversion: 1.2.3\n";
    const NGINX_VALUES: &str = r#"
replicaCount: 1
image:
  repository: docker.io/library/nginx
  tag: "1.25"
sidecar:
  image: myregistry.io:5000/tools/busybox:1.36
service:
  port: 80
"#;

    #[test]
    fn chart_directory_identity_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(dir.path(), NGINX_CHART, Some(NGINX_VALUES));

        let chart = HelmChartInput::from_path(dir.path(), None).unwrap();
        assert_eq!(chart.artifact_name(), "nginx");
        assert_eq!(chart.artifact_version(), "1.2.3");
        let defaults = chart.get_defaults().unwrap();
        assert_eq!(defaults["service"]["port"], 80);
    }

    #[test]
    fn schema_is_inferred_with_all_keys_required() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(dir.path(), NGINX_CHART, Some(NGINX_VALUES));

        let schema = HelmChartInput::from_path(dir.path(), None)
            .unwrap()
            .get_schema()
            .unwrap();
        assert_eq!(schema["$schema"], JSON_SCHEMA_DRAFT);
        assert_eq!(schema["required"], json!(["image", "replicaCount", "service", "sidecar"]));
        assert_eq!(schema["properties"]["service"]["properties"]["port"]["type"], "integer");
    }

    #[test]
    fn explicit_values_schema_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(dir.path(), NGINX_CHART, Some(NGINX_VALUES));
        fs::write(
            dir.path().join(VALUES_SCHEMA_FILE),
            r#"{"type": "object", "properties": {"replicaCount": {"type": "integer"}}, "required": []}"#,
        )
        .unwrap();

        let schema = HelmChartInput::from_path(dir.path(), None)
            .unwrap()
            .get_schema()
            .unwrap();
        assert_eq!(schema["properties"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn images_are_detected_from_values() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(dir.path(), NGINX_CHART, Some(NGINX_VALUES));

        let images = HelmChartInput::from_path(dir.path(), None)
            .unwrap()
            .images()
            .unwrap();
        assert_eq!(
            images,
            vec![
                ImageReference { name: "busybox".into(), tag: "1.36".into() },
                ImageReference { name: "nginx".into(), tag: "1.25".into() },
            ]
        );
    }

    #[test]
    fn digest_pinned_images_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(
            dir.path(),
            NGINX_CHART,
            Some("image: docker.io/library/nginx@sha256:abcdef\nsidecar:\n  image: registry.io:5000/busybox:1.36@sha256:0123\nproxy:\n  image: envoy:1.29\n"),
        );

        let images = HelmChartInput::from_path(dir.path(), None)
            .unwrap()
            .images()
            .unwrap();
        assert_eq!(images, vec![ImageReference { name: "envoy".into(), tag: "1.29".into() }]);
    }

    #[test]
    fn packaged_chart_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let chart_dir = dir.path().join("src/nginx");
        write_chart(
            &chart_dir,
            "apiVersion: v2\nname: nginx\nversion: 1.2.3\ndependencies:\n  - name: redis\n",
            Some("a: 1\n"),
        );
        fs::create_dir_all(chart_dir.join("charts")).unwrap();
        fs::write(chart_dir.join("charts/redis-17.0.0.tgz"), b"").unwrap();

        let archive = dir.path().join("nginx-1.2.3.tgz");
        let status = std::process::Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(dir.path().join("src"))
            .arg("nginx")
            .status()
            .unwrap();
        assert!(status.success());

        let chart = HelmChartInput::from_path(&archive, None).unwrap();
        assert_eq!(chart.artifact_name(), "nginx");
        assert_eq!(chart.artifact_version(), "1.2.3");
        assert_eq!(chart.source_path(), archive.as_path());
        assert_eq!(Value::Object(chart.get_defaults().unwrap()), json!({"a": 1}));

        fs::remove_file(chart_dir.join("charts/redis-17.0.0.tgz")).unwrap();
        let without_dependency = dir.path().join("nginx-no-deps.tar.gz");
        let status = std::process::Command::new("tar")
            .arg("-czf")
            .arg(&without_dependency)
            .arg("-C")
            .arg(dir.path().join("src"))
            .arg("nginx")
            .status()
            .unwrap();
        assert!(status.success());
        assert!(matches!(
            HelmChartInput::from_path(&without_dependency, None),
            Err(MissingChartDependency { dependency, .. }) if dependency == "redis"
        ));
    }

    #[test]
    fn override_values_file_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(dir.path(), NGINX_CHART, Some(NGINX_VALUES));
        let overrides = dir.path().join("overrides.yaml");
        fs::write(&overrides, "replicaCount: 3\n").unwrap();

        let chart = HelmChartInput::from_path(dir.path(), Some(&overrides)).unwrap();
        let defaults = chart.get_defaults().unwrap();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults["replicaCount"], 3);
    }

    #[test]
    fn missing_default_values() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(dir.path(), NGINX_CHART, None);

        let chart = HelmChartInput::from_path(dir.path(), None).unwrap();
        assert!(matches!(chart.get_defaults(), Err(MissingDefaultValues(name)) if name == "nginx"));

        let chart = HelmChartInput::from_path(dir.path(), Some(&dir.path().join("nope.yaml"))).unwrap();
        assert!(matches!(chart.get_defaults(), Err(MissingDefaultValues(_))));
    }

    #[test]
    fn missing_dependency_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(
            dir.path(),
            "apiVersion: v2\nname: app\nversion: 0.1.0\ndependencies:\n  - name: redis\n    version: 17.0.0\n  - name: postgresql\n",
            Some("{}"),
        );
        fs::create_dir_all(dir.path().join("charts")).unwrap();
        fs::write(dir.path().join("charts/redis-17.0.0.tgz"), b"").unwrap();

        let err = HelmChartInput::from_path(dir.path(), None).unwrap_err();
        assert!(matches!(
            err,
            MissingChartDependency { ref chart, ref dependency } if chart == "app" && dependency == "postgresql"
        ));

        write_chart(&dir.path().join("charts/postgresql"), "name: postgresql\nversion: 1.0.0\n", None);
        assert!(HelmChartInput::from_path(dir.path(), None).is_ok());
    }

    #[test]
    fn unsupported_file_type() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("chart.zip");
        fs::write(&zip, b"PK").unwrap();
        assert!(matches!(
            HelmChartInput::from_path(&zip, None),
            Err(InvalidFileType { path }) if path == zip
        ));
    }
}
