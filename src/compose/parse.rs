//! Line scanners for compose build/up output.
//!
//! Purely observational: nothing in the stack state machine depends on these
//! parsing successfully.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// A build step started, e.g. `#5 [api 2/6] RUN npm ci` or `Step 2/6 : RUN npm ci`.
    Step {
        service: Option<String>,
        current: u32,
        total: u32,
        instruction: String,
    },
    /// A service image finished building (`api Built`).
    ServiceBuilt { service: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpPhase {
    Creating,
    Created,
    Starting,
    Started,
    Running,
    Healthy,
    UpToDate,
}

impl std::fmt::Display for UpPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UpPhase::Creating => "creating",
            UpPhase::Created => "created",
            UpPhase::Starting => "starting",
            UpPhase::Started => "started",
            UpPhase::Running => "running",
            UpPhase::Healthy => "healthy",
            UpPhase::UpToDate => "up-to-date",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpEvent {
    pub container: String,
    pub phase: UpPhase,
}

static BUILDKIT_STEP: OnceLock<Regex> = OnceLock::new();
static CLASSIC_STEP: OnceLock<Regex> = OnceLock::new();
static SERVICE_BUILT: OnceLock<Regex> = OnceLock::new();
static UP_V2: OnceLock<Regex> = OnceLock::new();
static UP_V1: OnceLock<Regex> = OnceLock::new();
static UP_TO_DATE: OnceLock<Regex> = OnceLock::new();

fn buildkit_step() -> &'static Regex {
    BUILDKIT_STEP.get_or_init(|| {
        Regex::new(r"^#\d+ \[(?:(\S+) )?(\d+)/(\d+)\] (.+)$").expect("static regex pattern is valid")
    })
}

fn classic_step() -> &'static Regex {
    CLASSIC_STEP.get_or_init(|| {
        Regex::new(r"^Step (\d+)/(\d+) : (.+)$").expect("static regex pattern is valid")
    })
}

fn service_built() -> &'static Regex {
    SERVICE_BUILT.get_or_init(|| {
        Regex::new(r"^\s*(?:Service |Image )?(\S+)\s+Built\s*$").expect("static regex pattern is valid")
    })
}

fn up_v2() -> &'static Regex {
    UP_V2.get_or_init(|| {
        Regex::new(r"^\s*Container (\S+)\s+(Creating|Created|Starting|Started|Running|Healthy)\s*$")
            .expect("static regex pattern is valid")
    })
}

fn up_v1() -> &'static Regex {
    UP_V1.get_or_init(|| {
        Regex::new(r"^(Creating|Starting) (\S+)\s+\.\.\.\s*(done)?").expect("static regex pattern is valid")
    })
}

fn up_to_date() -> &'static Regex {
    UP_TO_DATE.get_or_init(|| {
        Regex::new(r"^\s*(\S+) is up-to-date\s*$").expect("static regex pattern is valid")
    })
}

pub fn parse_build_line(line: &str) -> Option<BuildEvent> {
    let line = line.trim_end();
    if let Some(caps) = buildkit_step().captures(line) {
        return Some(BuildEvent::Step {
            service: caps.get(1).map(|m| m.as_str().to_string()),
            current: caps[2].parse().ok()?,
            total: caps[3].parse().ok()?,
            instruction: caps[4].to_string(),
        });
    }
    if let Some(caps) = classic_step().captures(line) {
        return Some(BuildEvent::Step {
            service: None,
            current: caps[1].parse().ok()?,
            total: caps[2].parse().ok()?,
            instruction: caps[3].to_string(),
        });
    }
    service_built().captures(line).map(|caps| BuildEvent::ServiceBuilt {
        service: caps[1].to_string(),
    })
}

pub fn parse_up_line(line: &str) -> Option<UpEvent> {
    let line = line.trim_end();
    if let Some(caps) = up_v2().captures(line) {
        let phase = match &caps[2] {
            "Creating" => UpPhase::Creating,
            "Created" => UpPhase::Created,
            "Starting" => UpPhase::Starting,
            "Started" => UpPhase::Started,
            "Running" => UpPhase::Running,
            _ => UpPhase::Healthy,
        };
        return Some(UpEvent {
            container: caps[1].to_string(),
            phase,
        });
    }
    if let Some(caps) = up_v1().captures(line) {
        let done = caps.get(3).is_some();
        let phase = match (&caps[1], done) {
            ("Creating", false) => UpPhase::Creating,
            ("Creating", true) => UpPhase::Created,
            (_, false) => UpPhase::Starting,
            (_, true) => UpPhase::Started,
        };
        return Some(UpEvent {
            container: caps[2].to_string(),
            phase,
        });
    }
    up_to_date().captures(line).map(|caps| UpEvent {
        container: caps[1].to_string(),
        phase: UpPhase::UpToDate,
    })
}

/// Map a compose container name (`proj-api-1`, `proj_api_1`) back to its service.
pub fn service_from_container(project: &str, container: &str) -> String {
    let rest = container
        .strip_prefix(project)
        .and_then(|r| r.strip_prefix(['-', '_']))
        .unwrap_or(container);
    match rest.rsplit_once(['-', '_']) {
        Some((service, index)) if !service.is_empty() && index.chars().all(|c| c.is_ascii_digit()) => {
            service.to_string()
        }
        _ => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buildkit_steps() {
        assert_eq!(
            parse_build_line("#7 [api 3/6] RUN npm ci"),
            Some(BuildEvent::Step {
                service: Some("api".into()),
                current: 3,
                total: 6,
                instruction: "RUN npm ci".into()
            })
        );
        assert_eq!(parse_build_line("#3 [internal] load metadata"), None);
    }

    #[test]
    fn classic_steps_and_built_markers() {
        assert_eq!(
            parse_build_line("Step 2/5 : COPY . ."),
            Some(BuildEvent::Step {
                service: None,
                current: 2,
                total: 5,
                instruction: "COPY . .".into()
            })
        );
        assert_eq!(
            parse_build_line(" api  Built"),
            Some(BuildEvent::ServiceBuilt {
                service: "api".into()
            })
        );
        assert_eq!(parse_build_line("npm WARN deprecated"), None);
    }

    #[test]
    fn up_events_v2() {
        assert_eq!(
            parse_up_line(" Container stackup-cache-1  Started"),
            Some(UpEvent {
                container: "stackup-cache-1".into(),
                phase: UpPhase::Started
            })
        );
        assert_eq!(
            parse_up_line(" Container stackup-api-1  Healthy").map(|e| e.phase),
            Some(UpPhase::Healthy)
        );
    }

    #[test]
    fn up_events_v1() {
        assert_eq!(
            parse_up_line("Creating stackup_queue_1 ... done").map(|e| e.phase),
            Some(UpPhase::Created)
        );
        assert_eq!(
            parse_up_line("Starting stackup_queue_1 ...").map(|e| e.phase),
            Some(UpPhase::Starting)
        );
        assert_eq!(
            parse_up_line("stackup_cache_1 is up-to-date"),
            Some(UpEvent {
                container: "stackup_cache_1".into(),
                phase: UpPhase::UpToDate
            })
        );
    }

    #[test]
    fn container_names_map_to_services() {
        assert_eq!(service_from_container("stackup", "stackup-cache-1"), "cache");
        assert_eq!(service_from_container("stackup", "stackup_api_server_1"), "api_server");
        assert_eq!(service_from_container("stackup", "web-app-2"), "web-app");
        assert_eq!(service_from_container("stackup", "custom"), "custom");
    }
}
