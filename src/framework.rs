//! Runtime framework detection.
//!
//! Detection is a pure function of the files in a repository. It only
//! suggests commands; explicit configuration always wins.

use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkType {
    Frontend,
    Backend,
    Fullstack,
}

impl FrameworkType {
    /// Frontend-class services are launched in their own terminal window.
    pub fn is_frontend(&self) -> bool {
        matches!(self, FrameworkType::Frontend)
    }
}

impl std::fmt::Display for FrameworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FrameworkType::Frontend => "frontend",
            FrameworkType::Backend => "backend",
            FrameworkType::Fullstack => "fullstack",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameworkInfo {
    pub kind: FrameworkType,
    pub name: String,
    pub version: Option<String>,
    pub startup_command: Option<String>,
    pub install_command: Option<String>,
    pub build_command: Option<String>,
    pub default_port: Option<u16>,
    pub health_check_path: Option<String>,
}

impl FrameworkInfo {
    fn new(kind: FrameworkType, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            version: None,
            startup_command: None,
            install_command: None,
            build_command: None,
            default_port: None,
            health_check_path: None,
        }
    }

    /// One-line summary for logs, e.g. `Next.js 14.1.0 (fullstack)`.
    pub fn describe(&self) -> String {
        match &self.version {
            Some(v) => format!("{} {} ({})", self.name, v, self.kind),
            None => format!("{} ({})", self.name, self.kind),
        }
    }
}

/// Suggests commands for a repository.
pub trait FrameworkDetector: Send + Sync {
    fn detect(&self, repo: &Path) -> Option<FrameworkInfo>;
}

/// Detects frameworks from well-known manifest files.
#[derive(Debug, Clone, Default)]
pub struct ManifestDetector;

/// Node dependencies checked in order; the first match wins.
/// (dependency, display name, type, default port, dev script)
const NODE_FRAMEWORKS: &[(&str, &str, FrameworkType, u16, &str)] = &[
    ("next", "Next.js", FrameworkType::Fullstack, 3000, "dev"),
    ("nuxt", "Nuxt", FrameworkType::Fullstack, 3000, "dev"),
    ("@angular/core", "Angular", FrameworkType::Frontend, 4200, "start"),
    ("react-scripts", "Create React App", FrameworkType::Frontend, 3000, "start"),
    ("@sveltejs/kit", "SvelteKit", FrameworkType::Frontend, 5173, "dev"),
    ("vite", "Vite", FrameworkType::Frontend, 5173, "dev"),
    ("vue", "Vue", FrameworkType::Frontend, 8080, "serve"),
    ("svelte", "Svelte", FrameworkType::Frontend, 5173, "dev"),
    ("@nestjs/core", "NestJS", FrameworkType::Backend, 3000, "start:dev"),
    ("fastify", "Fastify", FrameworkType::Backend, 3000, "dev"),
    ("express", "Express", FrameworkType::Backend, 3000, "dev"),
    ("koa", "Koa", FrameworkType::Backend, 3000, "dev"),
];

impl FrameworkDetector for ManifestDetector {
    fn detect(&self, repo: &Path) -> Option<FrameworkInfo> {
        detect_node(repo)
            .or_else(|| detect_rust(repo))
            .or_else(|| detect_go(repo))
            .or_else(|| detect_python(repo))
    }
}

/// Package manager for a Node repository, chosen by lockfile.
pub fn node_package_manager(repo: &Path) -> &'static str {
    if repo.join("pnpm-lock.yaml").exists() {
        "pnpm"
    } else if repo.join("yarn.lock").exists() {
        "yarn"
    } else if repo.join("bun.lockb").exists() {
        "bun"
    } else {
        "npm"
    }
}

fn run_script(manager: &str, script: &str) -> String {
    match (manager, script) {
        ("npm", "start") => "npm start".to_string(),
        ("npm", _) => format!("npm run {}", script),
        _ => format!("{} {}", manager, script),
    }
}

fn detect_node(repo: &Path) -> Option<FrameworkInfo> {
    let raw = std::fs::read_to_string(repo.join("package.json")).ok()?;
    let manifest: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("Ignoring unparsable package.json in {}: {}", repo.display(), e);
            return None;
        }
    };

    let dependency = |name: &str| -> Option<String> {
        ["dependencies", "devDependencies"].iter().find_map(|section| {
            manifest
                .get(section)
                .and_then(|deps| deps.get(name))
                .and_then(|v| v.as_str())
                .map(|v| v.trim_start_matches(['^', '~', '=', '>', '<', ' ']).to_string())
        })
    };
    let has_script = |name: &str| {
        manifest
            .get("scripts")
            .and_then(|s| s.get(name))
            .is_some()
    };

    let manager = node_package_manager(repo);
    let install = match manager {
        "npm" if repo.join("package-lock.json").exists() => "npm ci".to_string(),
        other => format!("{} install", other),
    };

    let mut info = match NODE_FRAMEWORKS
        .iter()
        .find(|(dep, ..)| dependency(dep).is_some())
    {
        Some((dep, name, kind, port, script)) => {
            let mut info = FrameworkInfo::new(*kind, name);
            info.version = dependency(dep);
            info.default_port = Some(*port);
            let script = if has_script(script) {
                *script
            } else if has_script("dev") {
                "dev"
            } else {
                "start"
            };
            info.startup_command = Some(run_script(manager, script));
            info
        }
        None => {
            let mut info = FrameworkInfo::new(FrameworkType::Backend, "Node.js");
            let script = if has_script("dev") { "dev" } else { "start" };
            info.startup_command = Some(run_script(manager, script));
            info
        }
    };

    info.install_command = Some(install);
    if has_script("build") {
        info.build_command = Some(run_script(manager, "build"));
    }
    if info.kind != FrameworkType::Frontend {
        info.health_check_path = Some("/health".to_string());
    }
    Some(info)
}

fn detect_rust(repo: &Path) -> Option<FrameworkInfo> {
    if !repo.join("Cargo.toml").exists() {
        return None;
    }
    let mut info = FrameworkInfo::new(FrameworkType::Backend, "Rust");
    info.install_command = Some("cargo fetch".to_string());
    info.startup_command = Some("cargo run".to_string());
    info.build_command = Some("cargo build --release".to_string());
    info.default_port = Some(8080);
    Some(info)
}

fn detect_go(repo: &Path) -> Option<FrameworkInfo> {
    let go_mod = std::fs::read_to_string(repo.join("go.mod")).ok()?;
    let mut info = FrameworkInfo::new(FrameworkType::Backend, "Go");
    info.version = go_mod
        .lines()
        .find_map(|l| l.trim().strip_prefix("go "))
        .map(|v| v.trim().to_string());
    info.install_command = Some("go mod download".to_string());
    info.startup_command = Some("go run .".to_string());
    info.build_command = Some("go build ./...".to_string());
    info.default_port = Some(8080);
    info.health_check_path = Some("/health".to_string());
    Some(info)
}

fn detect_python(repo: &Path) -> Option<FrameworkInfo> {
    let requirements = std::fs::read_to_string(repo.join("requirements.txt")).ok();
    let pyproject = std::fs::read_to_string(repo.join("pyproject.toml")).ok();
    if requirements.is_none() && pyproject.is_none() {
        return None;
    }
    let deps = format!(
        "{}\n{}",
        requirements.as_deref().unwrap_or_default(),
        pyproject.as_deref().unwrap_or_default()
    )
    .to_lowercase();

    let (name, start, port) = if deps.contains("django") {
        ("Django", "python manage.py runserver", 8000)
    } else if deps.contains("fastapi") {
        ("FastAPI", "uvicorn main:app --reload", 8000)
    } else if deps.contains("flask") {
        ("Flask", "flask run", 5000)
    } else {
        ("Python", "python main.py", 8000)
    };

    let mut info = FrameworkInfo::new(FrameworkType::Backend, name);
    info.startup_command = Some(start.to_string());
    info.default_port = Some(port);
    info.install_command = Some(if requirements.is_some() {
        "pip install -r requirements.txt".to_string()
    } else if repo.join("poetry.lock").exists() {
        "poetry install".to_string()
    } else {
        "pip install -e .".to_string()
    });
    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, file: &str, content: &str) {
        std::fs::write(dir.path().join(file), content).unwrap();
    }

    #[test]
    fn detects_next_as_fullstack() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "package.json",
            r#"{"scripts":{"dev":"next dev","build":"next build"},"dependencies":{"next":"^14.1.0"}}"#,
        );
        let info = ManifestDetector.detect(dir.path()).unwrap();
        assert_eq!(info.kind, FrameworkType::Fullstack);
        assert_eq!(info.name, "Next.js");
        assert_eq!(info.version.as_deref(), Some("14.1.0"));
        assert_eq!(info.startup_command.as_deref(), Some("npm run dev"));
        assert_eq!(info.install_command.as_deref(), Some("npm install"));
        assert_eq!(info.build_command.as_deref(), Some("npm run build"));
    }

    #[test]
    fn detects_vite_with_yarn() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "package.json",
            r#"{"scripts":{"dev":"vite"},"devDependencies":{"vite":"~5.0.0"}}"#,
        );
        write(&dir, "yarn.lock", "");
        let info = ManifestDetector.detect(dir.path()).unwrap();
        assert!(info.kind.is_frontend());
        assert_eq!(info.startup_command.as_deref(), Some("yarn dev"));
        assert_eq!(info.install_command.as_deref(), Some("yarn install"));
        assert_eq!(info.default_port, Some(5173));
    }

    #[test]
    fn lockfile_selects_npm_ci() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "package.json",
            r#"{"scripts":{"start":"node index.js"},"dependencies":{"express":"4.18.2"}}"#,
        );
        write(&dir, "package-lock.json", "{}");
        let info = ManifestDetector.detect(dir.path()).unwrap();
        assert_eq!(info.kind, FrameworkType::Backend);
        assert_eq!(info.install_command.as_deref(), Some("npm ci"));
        assert_eq!(info.startup_command.as_deref(), Some("npm start"));
    }

    #[test]
    fn detects_go_version() {
        let dir = TempDir::new().unwrap();
        write(&dir, "go.mod", "module example.com/api\n\ngo 1.22\n");
        let info = ManifestDetector.detect(dir.path()).unwrap();
        assert_eq!(info.name, "Go");
        assert_eq!(info.version.as_deref(), Some("1.22"));
    }

    #[test]
    fn detects_django() {
        let dir = TempDir::new().unwrap();
        write(&dir, "requirements.txt", "Django==5.0\npsycopg2\n");
        let info = ManifestDetector.detect(dir.path()).unwrap();
        assert_eq!(info.name, "Django");
        assert_eq!(
            info.install_command.as_deref(),
            Some("pip install -r requirements.txt")
        );
    }

    #[test]
    fn empty_directory_is_unknown() {
        let dir = TempDir::new().unwrap();
        assert!(ManifestDetector.detect(dir.path()).is_none());
    }
}
