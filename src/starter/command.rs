//! Startup command resolution and package-script validation.

use crate::config::{ExecutionMode, RepoTarget};
use crate::error::{Error, Result};
use crate::framework::{node_package_manager, FrameworkDetector, FrameworkInfo};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::OnceLock;

/// Startup command recorded for container-mode repositories.
///
/// Those are brought up by the compose stack, never by the local starter.
pub const CONTAINER_START_COMMAND: &str = "docker compose up";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartSource {
    Configured,
    Container,
    Framework,
    Fallback,
}

/// The command a repository will be started with, and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCommand {
    pub command: String,
    pub source: StartSource,
    /// Detected framework, informational.
    pub framework: Option<FrameworkInfo>,
}

impl StartCommand {
    /// Whether this command launches in a detached terminal.
    pub fn is_frontend(&self, target: &RepoTarget) -> bool {
        target.terminal
            || self
                .framework
                .as_ref()
                .is_some_and(|info| info.kind.is_frontend())
    }
}

/// Resolve a repository's startup command.
///
/// Order: explicit command, container sentinel, framework default, generic
/// fallback. Framework detection always runs so the result can be reported.
pub fn resolve_start_command(target: &RepoTarget, detector: &dyn FrameworkDetector) -> StartCommand {
    let framework = detector.detect(&target.path);

    let (command, source) = if let Some(command) = &target.startup_command {
        (command.clone(), StartSource::Configured)
    } else if target.mode == ExecutionMode::Container {
        (CONTAINER_START_COMMAND.to_string(), StartSource::Container)
    } else if let Some(command) = framework.as_ref().and_then(|f| f.startup_command.clone()) {
        (command, StartSource::Framework)
    } else {
        (fallback_command(&target.path), StartSource::Fallback)
    };

    StartCommand {
        command,
        source,
        framework,
    }
}

fn fallback_command(repo: &Path) -> String {
    format!("{} start", node_package_manager(repo))
}

/// A `npm run dev` style invocation of a `package.json` script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageScript {
    pub manager: String,
    pub script: String,
}

static PACKAGE_SCRIPT: OnceLock<Regex> = OnceLock::new();

fn package_script_regex() -> &'static Regex {
    PACKAGE_SCRIPT.get_or_init(|| {
        Regex::new(r"^(npm|pnpm|yarn|bun)\s+(run\s+)?([A-Za-z0-9:_.@/-]+)")
            .expect("static regex pattern is valid")
    })
}

/// Package manager subcommands that are not scripts.
const BUILTIN_SUBCOMMANDS: &[&str] = &[
    "install", "i", "ci", "add", "remove", "rm", "uninstall", "exec", "dlx", "x", "create",
    "init", "link", "publish", "update", "upgrade", "why", "info", "config", "--version", "-v",
];

/// npm shorthands that run the script of the same name without `run`.
const NPM_SCRIPT_SHORTHANDS: &[&str] = &["start", "test", "stop", "restart"];

/// Parse `command` as a package-script invocation.
pub fn package_script(command: &str) -> Option<PackageScript> {
    let caps = package_script_regex().captures(command.trim())?;
    let manager = &caps[1];
    let explicit_run = caps.get(2).is_some();
    let script = &caps[3];

    if !explicit_run {
        if BUILTIN_SUBCOMMANDS.contains(&script) {
            return None;
        }
        if manager == "npm" && !NPM_SCRIPT_SHORTHANDS.contains(&script) {
            return None;
        }
    }

    Some(PackageScript {
        manager: manager.to_string(),
        script: script.to_string(),
    })
}

/// Fail fast when `command` names a `package.json` script that does not exist.
pub fn validate_package_script(target: &RepoTarget, command: &str) -> Result<()> {
    let Some(invocation) = package_script(command) else {
        return Ok(());
    };

    let manifest_path = target.path.join("package.json");
    let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
        Error::Config(format!(
            "'{}' runs `{}` but {} could not be read: {}",
            target.name,
            command,
            manifest_path.display(),
            e
        ))
    })?;
    let manifest: serde_json::Value = serde_json::from_str(&raw)?;

    let defined = manifest
        .get("scripts")
        .and_then(|scripts| scripts.get(&invocation.script))
        .is_some();
    if defined {
        Ok(())
    } else {
        Err(Error::ScriptNotFound {
            repo: target.name.clone(),
            script: invocation.script,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::FrameworkType;
    use tempfile::TempDir;

    struct Fixed(Option<FrameworkInfo>);

    impl FrameworkDetector for Fixed {
        fn detect(&self, _repo: &Path) -> Option<FrameworkInfo> {
            self.0.clone()
        }
    }

    fn next_info() -> FrameworkInfo {
        FrameworkInfo {
            kind: FrameworkType::Frontend,
            name: "Next.js".into(),
            version: Some("14.1.0".into()),
            startup_command: Some("npm run dev".into()),
            install_command: Some("npm install".into()),
            build_command: Some("npm run build".into()),
            default_port: Some(3000),
            health_check_path: None,
        }
    }

    #[test]
    fn explicit_command_wins() {
        let target = RepoTarget::new("web", "/tmp/web", ExecutionMode::Container).with_startup("make dev");
        let resolved = resolve_start_command(&target, &Fixed(Some(next_info())));
        assert_eq!(resolved.command, "make dev");
        assert_eq!(resolved.source, StartSource::Configured);
        assert!(resolved.framework.is_some());
    }

    #[test]
    fn container_sentinel_before_framework() {
        let target = RepoTarget::new("web", "/tmp/web", ExecutionMode::Container);
        let resolved = resolve_start_command(&target, &Fixed(Some(next_info())));
        assert_eq!(resolved.command, CONTAINER_START_COMMAND);
        assert_eq!(resolved.source, StartSource::Container);
    }

    #[test]
    fn framework_then_fallback() {
        let target = RepoTarget::new("web", "/nonexistent/web", ExecutionMode::Local);
        let resolved = resolve_start_command(&target, &Fixed(Some(next_info())));
        assert_eq!(resolved.source, StartSource::Framework);
        assert!(resolved.is_frontend(&target));

        let resolved = resolve_start_command(&target, &Fixed(None));
        assert_eq!(resolved.command, "npm start");
        assert_eq!(resolved.source, StartSource::Fallback);
        assert!(!resolved.is_frontend(&target));
    }

    #[test]
    fn terminal_flag_forces_frontend() {
        let mut target = RepoTarget::new("docs", "/tmp/docs", ExecutionMode::Local);
        target.terminal = true;
        let resolved = resolve_start_command(&target, &Fixed(None));
        assert!(resolved.is_frontend(&target));
    }

    #[test]
    fn script_detection() {
        let cases = [
            ("npm run dev", Some(("npm", "dev"))),
            ("npm start", Some(("npm", "start"))),
            ("npm ci", None),
            ("npm exec vite", None),
            ("npm audit", None),
            ("yarn dev", Some(("yarn", "dev"))),
            ("pnpm run start:dev --port 3000", Some(("pnpm", "start:dev"))),
            ("pnpm install", None),
            ("bun run serve", Some(("bun", "serve"))),
            ("cargo run", None),
            ("./run.sh", None),
        ];
        for (command, expected) in cases {
            let parsed = package_script(command);
            let parsed = parsed
                .as_ref()
                .map(|p| (p.manager.as_str(), p.script.as_str()));
            assert_eq!(parsed, expected, "command: {}", command);
        }
    }

    #[test]
    fn validates_scripts_against_package_json() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name":"web","scripts":{"dev":"vite"}}"#,
        )
        .unwrap();
        let target = RepoTarget::new("web", dir.path(), ExecutionMode::Local);

        assert!(validate_package_script(&target, "npm run dev").is_ok());
        assert!(validate_package_script(&target, "node server.js").is_ok());
        match validate_package_script(&target, "yarn serve") {
            Err(Error::ScriptNotFound { repo, script }) => {
                assert_eq!(repo, "web");
                assert_eq!(script, "serve");
            }
            other => panic!("expected ScriptNotFound, got {:?}", other),
        }
    }

    #[test]
    fn missing_package_json_is_config_error() {
        let dir = TempDir::new().unwrap();
        let target = RepoTarget::new("api", dir.path(), ExecutionMode::Local);
        assert!(matches!(
            validate_package_script(&target, "npm run dev"),
            Err(Error::Config(_))
        ));
    }
}
