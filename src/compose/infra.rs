use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A family of shared infrastructure service, provisioned in the container stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfraKind {
    Database,
    #[serde(alias = "time-series", alias = "time_series")]
    TimeSeries,
    Cache,
    Queue,
}

impl InfraKind {
    pub const ALL: [InfraKind; 4] = [
        InfraKind::Database,
        InfraKind::TimeSeries,
        InfraKind::Cache,
        InfraKind::Queue,
    ];

    /// Service name used in the manifest.
    pub fn service_name(&self) -> &'static str {
        match self {
            InfraKind::Database => "database",
            InfraKind::TimeSeries => "timeseries",
            InfraKind::Cache => "cache",
            InfraKind::Queue => "queue",
        }
    }

    /// The canonical container spec for this family.
    pub fn spec(&self) -> InfraSpec {
        match self {
            InfraKind::Database => InfraSpec {
                kind: *self,
                image: "postgres:16-alpine",
                ports: &[5432],
                env: &[
                    ("POSTGRES_USER", "postgres"),
                    ("POSTGRES_PASSWORD", "postgres"),
                    ("POSTGRES_DB", "app"),
                ],
                volumes: &[("database-data", "/var/lib/postgresql/data")],
                healthcheck: &["CMD-SHELL", "pg_isready -U $${POSTGRES_USER}"],
            },
            InfraKind::TimeSeries => InfraSpec {
                kind: *self,
                image: "influxdb:2.7",
                ports: &[8086],
                env: &[
                    ("DOCKER_INFLUXDB_INIT_MODE", "setup"),
                    ("DOCKER_INFLUXDB_INIT_USERNAME", "admin"),
                    ("DOCKER_INFLUXDB_INIT_PASSWORD", "adminpassword"),
                    ("DOCKER_INFLUXDB_INIT_ORG", "local"),
                    ("DOCKER_INFLUXDB_INIT_BUCKET", "default"),
                ],
                volumes: &[("timeseries-data", "/var/lib/influxdb2")],
                healthcheck: &["CMD", "influx", "ping"],
            },
            InfraKind::Cache => InfraSpec {
                kind: *self,
                image: "redis:7-alpine",
                ports: &[6379],
                env: &[],
                volumes: &[("cache-data", "/data")],
                healthcheck: &["CMD", "redis-cli", "ping"],
            },
            InfraKind::Queue => InfraSpec {
                kind: *self,
                image: "rabbitmq:3-management-alpine",
                ports: &[5672, 15672],
                env: &[
                    ("RABBITMQ_DEFAULT_USER", "guest"),
                    ("RABBITMQ_DEFAULT_PASS", "guest"),
                ],
                volumes: &[("queue-data", "/var/lib/rabbitmq")],
                healthcheck: &["CMD", "rabbitmq-diagnostics", "-q", "ping"],
            },
        }
    }
}

impl fmt::Display for InfraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

/// Fixed container definition for an infra family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraSpec {
    pub kind: InfraKind,
    pub image: &'static str,
    pub ports: &'static [u16],
    /// Default environment, overridable per workspace.
    pub env: &'static [(&'static str, &'static str)],
    /// Named volume → container mount path.
    pub volumes: &'static [(&'static str, &'static str)],
    /// Compose `healthcheck.test` form.
    pub healthcheck: &'static [&'static str],
}

impl InfraSpec {
    /// Default environment merged with `overrides` (overrides win).
    pub fn environment(&self, overrides: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = self
            .env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if let Some(overrides) = overrides {
            env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env
    }
}
