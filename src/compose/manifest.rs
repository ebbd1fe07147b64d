//! Compose manifest synthesis.
//!
//! [`ComposeBuilder`] turns the required infra set plus detected application
//! build specs into one [`ComposeManifest`]. Every application service
//! depends on every infra service through a `service_healthy` condition.

use super::infra::InfraKind;
use crate::config::{ExecutionMode, RepoTarget};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const MANIFEST_HEADER: &str = "# Generated by stackup. Overwritten on every run.\n";

/// Dockerfile names tried in order.
const DOCKERFILE_CANDIDATES: &[&str] = &["Dockerfile.dev", "Dockerfile"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeManifest {
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, ComposeNetwork>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, ComposeVolume>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub depends_on: BTreeMap<String, DependsOn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub context: PathBuf,
    pub dockerfile: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCondition {
    ServiceStarted,
    ServiceHealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsOn {
    pub condition: DependencyCondition,
}

impl DependsOn {
    pub fn healthy() -> Self {
        Self {
            condition: DependencyCondition::ServiceHealthy,
        }
    }

    pub fn started() -> Self {
        Self {
            condition: DependencyCondition::ServiceStarted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
}

impl HealthCheck {
    fn from_test(test: &[&str]) -> Self {
        Self {
            test: test.iter().map(|s| s.to_string()).collect(),
            interval: "5s".to_string(),
            timeout: "5s".to_string(),
            retries: 10,
            start_period: Some("10s".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeVolume {}

impl ComposeManifest {
    /// Service names in manifest order.
    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn has_healthcheck(&self, service: &str) -> bool {
        self.services
            .get(service)
            .is_some_and(|s| s.healthcheck.is_some())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(format!("{}{}", MANIFEST_HEADER, serde_yaml::to_string(self)?))
    }

    /// Write the manifest to `path`, replacing any previous one.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_yaml()?)?;
        tracing::debug!("Wrote compose manifest to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Build inputs for one containerized repository.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerServiceSpec {
    pub name: String,
    pub context: PathBuf,
    pub dockerfile: String,
    pub ports: Vec<u16>,
    pub environment: BTreeMap<String, String>,
    /// Other application services this one starts after.
    pub depends_on: Vec<String>,
    pub volumes: Vec<String>,
}

impl ContainerServiceSpec {
    /// Spec for a container-mode target with a Dockerfile, `None` otherwise.
    pub fn detect(target: &RepoTarget) -> Option<Self> {
        if target.mode != ExecutionMode::Container {
            return None;
        }
        let dockerfile = DOCKERFILE_CANDIDATES
            .iter()
            .find(|name| target.path.join(name).is_file())?;
        Some(Self {
            name: target.name.clone(),
            context: target.path.clone(),
            dockerfile: dockerfile.to_string(),
            ports: target.ports.clone(),
            environment: target
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            depends_on: target.depends_on.clone(),
            volumes: Vec::new(),
        })
    }

    /// Detect specs for every container-mode target.
    ///
    /// Returns the specs and the names of container-mode targets that have no
    /// Dockerfile.
    pub fn detect_all(targets: &[RepoTarget]) -> (Vec<Self>, Vec<String>) {
        let mut specs = Vec::new();
        let mut missing = Vec::new();
        for target in targets.iter().filter(|t| t.mode == ExecutionMode::Container) {
            match Self::detect(target) {
                Some(spec) => specs.push(spec),
                None => {
                    tracing::warn!(
                        "Repository '{}' is in container mode but has no Dockerfile in {}",
                        target.name,
                        target.path.display()
                    );
                    missing.push(target.name.clone());
                }
            }
        }
        (specs, missing)
    }
}

/// Synthesizes the compose manifest for one run.
#[derive(Debug, Clone)]
pub struct ComposeBuilder {
    network: String,
    infra_env: BTreeMap<InfraKind, BTreeMap<String, String>>,
}

impl ComposeBuilder {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            infra_env: BTreeMap::new(),
        }
    }

    pub fn with_infra_env(mut self, infra_env: BTreeMap<InfraKind, BTreeMap<String, String>>) -> Self {
        self.infra_env = infra_env;
        self
    }

    #[tracing::instrument(skip_all, fields(infra = infra.len(), apps = apps.len()))]
    pub fn build(
        &self,
        infra: &BTreeSet<InfraKind>,
        apps: &[ContainerServiceSpec],
    ) -> Result<ComposeManifest> {
        let mut manifest = ComposeManifest::default();
        manifest.networks.insert(
            self.network.clone(),
            ComposeNetwork {
                driver: Some("bridge".to_string()),
            },
        );

        for kind in infra {
            let spec = kind.spec();
            for (volume, _) in spec.volumes {
                manifest
                    .volumes
                    .insert(volume.to_string(), ComposeVolume::default());
            }
            let service = ComposeService {
                image: Some(spec.image.to_string()),
                ports: spec.ports.iter().map(|p| format!("{}:{}", p, p)).collect(),
                environment: spec.environment(self.infra_env.get(kind)),
                networks: vec![self.network.clone()],
                volumes: spec
                    .volumes
                    .iter()
                    .map(|(volume, mount)| format!("{}:{}", volume, mount))
                    .collect(),
                healthcheck: Some(HealthCheck::from_test(spec.healthcheck)),
                ..ComposeService::default()
            };
            manifest
                .services
                .insert(kind.service_name().to_string(), service);
        }

        let app_names: BTreeSet<&str> = apps.iter().map(|a| a.name.as_str()).collect();
        for app in apps {
            if manifest.services.contains_key(&app.name) {
                return Err(Error::Validation(format!(
                    "repository '{}' collides with the infra service of the same name",
                    app.name
                )));
            }

            let mut depends_on: BTreeMap<String, DependsOn> = infra
                .iter()
                .map(|kind| (kind.service_name().to_string(), DependsOn::healthy()))
                .collect();
            for dep in &app.depends_on {
                if app_names.contains(dep.as_str()) {
                    depends_on.insert(dep.clone(), DependsOn::started());
                } else {
                    tracing::debug!(
                        "Dropping dependency {} -> {}: not part of the container stack",
                        app.name,
                        dep
                    );
                }
            }

            let service = ComposeService {
                build: Some(BuildSpec {
                    context: app.context.clone(),
                    dockerfile: app.dockerfile.clone(),
                }),
                ports: app.ports.iter().map(|p| format!("{}:{}", p, p)).collect(),
                environment: app.environment.clone(),
                depends_on,
                networks: vec![self.network.clone()],
                volumes: app.volumes.clone(),
                ..ComposeService::default()
            };
            manifest.services.insert(app.name.clone(), service);
        }

        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn app(name: &str) -> ContainerServiceSpec {
        ContainerServiceSpec {
            name: name.to_string(),
            context: PathBuf::from(format!("/repos/{}", name)),
            dockerfile: "Dockerfile".to_string(),
            ports: vec![3000],
            environment: BTreeMap::new(),
            depends_on: Vec::new(),
            volumes: Vec::new(),
        }
    }

    #[test]
    fn infra_only_manifest_has_volumes_and_healthchecks() {
        let infra: BTreeSet<_> = [InfraKind::Database].into_iter().collect();
        let manifest = ComposeBuilder::new("stackup").build(&infra, &[]).unwrap();
        let db = &manifest.services["database"];
        assert_eq!(db.image.as_deref(), Some("postgres:16-alpine"));
        assert_eq!(db.ports, vec!["5432:5432"]);
        assert!(db.healthcheck.is_some());
        assert!(manifest.volumes.contains_key("database-data"));
        assert_eq!(manifest.networks["stackup"].driver.as_deref(), Some("bridge"));
    }

    #[test]
    fn app_dependencies_between_apps_are_start_ordered() {
        let mut worker = app("worker");
        worker.depends_on = vec!["api".to_string(), "web".to_string()];
        let manifest = ComposeBuilder::new("net")
            .build(&BTreeSet::new(), &[app("api"), worker])
            .unwrap();
        let deps = &manifest.services["worker"].depends_on;
        assert_eq!(deps.len(), 1);
        assert_eq!(deps["api"], DependsOn::started());
    }

    #[test]
    fn name_collision_with_infra_is_rejected() {
        let infra: BTreeSet<_> = [InfraKind::Cache].into_iter().collect();
        let err = ComposeBuilder::new("net")
            .build(&infra, &[app("cache")])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn detect_requires_container_mode_and_dockerfile() {
        let dir = TempDir::new().unwrap();
        let target = RepoTarget::new("api", dir.path(), ExecutionMode::Container);
        assert!(ContainerServiceSpec::detect(&target).is_none());

        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let spec = ContainerServiceSpec::detect(&target).unwrap();
        assert_eq!(spec.dockerfile, "Dockerfile");

        let local = RepoTarget::new("api", dir.path(), ExecutionMode::Local);
        assert!(ContainerServiceSpec::detect(&local).is_none());
    }

    #[test]
    fn manifest_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docker-compose.stackup.yml");
        let infra: BTreeSet<_> = [InfraKind::Queue].into_iter().collect();
        let manifest = ComposeBuilder::new("stackup").build(&infra, &[app("api")]).unwrap();
        manifest.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Generated by stackup"));
        assert!(text.contains("condition: service_healthy"));

        let loaded = ComposeManifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.service_names(), vec!["api", "queue"]);
    }
}
