//! Manifest synthesis from a workspace on disk.

use stackup::compose::{ComposeBuilder, ContainerServiceSpec, DependencyCondition};
use stackup::{ComposeManifest, Parser};
use std::fs;
use tempfile::TempDir;

const CONFIG: &str = r#"
infra: [cache, queue]
infra_env:
  cache:
    REDIS_ARGS: "--appendonly yes"
repos:
  api:
    mode: container
    ports: [3000]
    env:
      RUST_LOG: debug
    depends_on: [billing, web]
  billing:
    mode: container
  docs:
    mode: container
  web:
    start: npm run dev
"#;

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    for repo in ["api", "billing", "docs", "web"] {
        fs::create_dir_all(dir.path().join(repo)).unwrap();
    }
    fs::write(dir.path().join("api/Dockerfile"), "FROM node:20-alpine\n").unwrap();
    fs::write(dir.path().join("api/Dockerfile.dev"), "FROM node:20\n").unwrap();
    fs::write(dir.path().join("billing/Dockerfile"), "FROM rust:1.80\n").unwrap();
    fs::write(dir.path().join("stackup.yaml"), CONFIG).unwrap();
    dir
}

#[test]
fn test_workspace_synthesizes_infra_and_apps() {
    let dir = workspace();
    let config = Parser::new()
        .load_config(dir.path().join("stackup.yaml"))
        .unwrap();
    let targets = config.targets(dir.path());

    let (apps, missing) = ContainerServiceSpec::detect_all(&targets);
    assert_eq!(missing, vec!["docs".to_string()]);
    let names: Vec<&str> = apps.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["api", "billing"]);
    assert_eq!(apps[0].dockerfile, "Dockerfile.dev");
    assert_eq!(apps[1].dockerfile, "Dockerfile");

    let manifest = ComposeBuilder::new("stackup")
        .with_infra_env(config.infra_env.clone())
        .build(&config.infra, &apps)
        .unwrap();

    assert_eq!(
        manifest.service_names(),
        vec!["api", "billing", "cache", "queue"]
    );

    let api = &manifest.services["api"];
    assert_eq!(api.ports, vec!["3000:3000".to_string()]);
    assert_eq!(api.environment.get("RUST_LOG").map(String::as_str), Some("debug"));
    assert_eq!(
        api.build.as_ref().map(|b| b.context.clone()),
        Some(dir.path().join("api"))
    );
    assert_eq!(api.depends_on["cache"].condition, DependencyCondition::ServiceHealthy);
    assert_eq!(api.depends_on["queue"].condition, DependencyCondition::ServiceHealthy);
    assert_eq!(api.depends_on["billing"].condition, DependencyCondition::ServiceStarted);
    // web runs locally, so it is not something compose can wait on.
    assert!(!api.depends_on.contains_key("web"));

    let cache = &manifest.services["cache"];
    assert!(cache.image.is_some());
    assert!(cache.healthcheck.is_some());
    assert_eq!(
        cache.environment.get("REDIS_ARGS").map(String::as_str),
        Some("--appendonly yes")
    );
}

#[test]
fn test_manifest_file_round_trips() {
    let dir = workspace();
    let config = Parser::new()
        .load_config(dir.path().join("stackup.yaml"))
        .unwrap();
    let (apps, _) = ContainerServiceSpec::detect_all(&config.targets(dir.path()));
    let manifest = ComposeBuilder::new("devnet")
        .build(&config.infra, &apps)
        .unwrap();

    let path = dir.path().join("docker-compose.stackup.yml");
    manifest.write(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("service_healthy"));
    assert!(text.contains("devnet"));

    let loaded = ComposeManifest::load(&path).unwrap();
    assert_eq!(loaded, manifest);
    assert!(loaded.has_healthcheck("queue"));
    assert!(!loaded.has_healthcheck("api"));
}

#[test]
fn test_app_named_like_infra_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("cache")).unwrap();
    fs::write(dir.path().join("cache/Dockerfile"), "FROM redis\n").unwrap();

    let config = Parser::new()
        .parse_config("infra: [cache]\nrepos:\n  cache:\n    mode: container\n")
        .unwrap();
    let (apps, _) = ContainerServiceSpec::detect_all(&config.targets(dir.path()));

    assert!(ComposeBuilder::new("stackup").build(&config.infra, &apps).is_err());
}
