//! Detached terminal launch for frontend-class services.
//!
//! The launched terminal is not supervised: we only see the launcher process
//! (osascript, the emulator binary, `cmd /C start`) spawn and exit.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

/// Builds the platform command that opens a new terminal window.
pub trait TerminalLauncher: Send + Sync {
    fn name(&self) -> &str;

    /// Command that runs `command` inside a new terminal titled `title`, in `cwd`.
    fn command(&self, title: &str, cwd: &Path, command: &str) -> Result<Command>;
}

/// The launcher for the current platform.
pub fn platform_launcher() -> Arc<dyn TerminalLauncher> {
    if cfg!(target_os = "macos") {
        Arc::new(MacTerminal)
    } else if cfg!(windows) {
        Arc::new(WindowsTerminal)
    } else {
        Arc::new(LinuxTerminal::detect())
    }
}

/// Single-quote `s` for a POSIX shell unless it is plainly safe.
pub(crate) fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '/')
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Terminal.app via AppleScript.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacTerminal;

impl MacTerminal {
    fn script(cwd: &Path, command: &str) -> String {
        let shell = format!("cd {} && {}", shell_escape(&cwd.to_string_lossy()), command);
        let quoted = shell.replace('\\', "\\\\").replace('"', "\\\"");
        format!("tell application \"Terminal\" to do script \"{}\"", quoted)
    }
}

impl TerminalLauncher for MacTerminal {
    fn name(&self) -> &str {
        "Terminal.app"
    }

    fn command(&self, _title: &str, cwd: &Path, command: &str) -> Result<Command> {
        let mut cmd = Command::new("osascript");
        cmd.arg("-e").arg(Self::script(cwd, command));
        Ok(cmd)
    }
}

const LINUX_EMULATORS: &[&str] = &[
    "x-terminal-emulator",
    "gnome-terminal",
    "konsole",
    "xfce4-terminal",
    "xterm",
];

/// The first terminal emulator found on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct LinuxTerminal {
    emulator: Option<PathBuf>,
}

impl LinuxTerminal {
    pub fn detect() -> Self {
        let emulator = LINUX_EMULATORS
            .iter()
            .find_map(|name| which::which(name).ok());
        Self { emulator }
    }

    pub fn with_emulator(path: impl Into<PathBuf>) -> Self {
        Self {
            emulator: Some(path.into()),
        }
    }
}

impl TerminalLauncher for LinuxTerminal {
    fn name(&self) -> &str {
        self.emulator
            .as_deref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("terminal")
    }

    fn command(&self, title: &str, cwd: &Path, command: &str) -> Result<Command> {
        let emulator = self.emulator.as_ref().ok_or_else(|| {
            Error::CommandNotFound(format!(
                "no terminal emulator found (tried {})",
                LINUX_EMULATORS.join(", ")
            ))
        })?;
        // Keep the window open after the service exits so its output stays readable.
        let script = format!("{}; exec \"${{SHELL:-sh}}\"", command);

        let mut cmd = Command::new(emulator);
        cmd.current_dir(cwd);
        match self.name() {
            "gnome-terminal" => {
                cmd.arg("--title").arg(title).arg("--").arg("sh").arg("-c").arg(script);
            }
            "konsole" => {
                cmd.arg("-p")
                    .arg(format!("tabtitle={}", title))
                    .arg("-e")
                    .arg("sh")
                    .arg("-c")
                    .arg(script);
            }
            _ => {
                cmd.arg("-T").arg(title).arg("-e").arg("sh").arg("-c").arg(script);
            }
        }
        Ok(cmd)
    }
}

/// `cmd /C start` on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsTerminal;

impl TerminalLauncher for WindowsTerminal {
    fn name(&self) -> &str {
        "cmd"
    }

    fn command(&self, title: &str, cwd: &Path, command: &str) -> Result<Command> {
        let mut cmd = Command::new("cmd");
        cmd.current_dir(cwd)
            .arg("/C")
            .arg("start")
            .arg(format!("\"{}\"", title))
            .arg("cmd")
            .arg("/K")
            .arg(command);
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn escapes_only_when_needed() {
        assert_eq!(shell_escape("/home/dev/web"), "/home/dev/web");
        assert_eq!(shell_escape("/tmp/my app"), "'/tmp/my app'");
        assert_eq!(shell_escape("it's"), r"'it'\''s'");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn mac_script_quotes_command() {
        let script = MacTerminal::script(Path::new("/src/web app"), "npm run \"dev\"");
        assert_eq!(
            script,
            r#"tell application "Terminal" to do script "cd '/src/web app' && npm run \"dev\"""#
        );
    }

    #[test]
    fn linux_argument_shapes() {
        let gnome = LinuxTerminal::with_emulator("/usr/bin/gnome-terminal");
        let cmd = gnome.command("web", Path::new("/src/web"), "npm run dev").unwrap();
        let a = args(&cmd);
        assert_eq!(&a[..5], &["--title", "web", "--", "sh", "-c"]);
        assert!(a[5].starts_with("npm run dev;"));

        let xterm = LinuxTerminal::with_emulator("/usr/bin/xterm");
        let cmd = xterm.command("web", Path::new("/src/web"), "npm run dev").unwrap();
        assert_eq!(&args(&cmd)[..4], &["-T", "web", "-e", "sh"]);
    }

    #[test]
    fn linux_without_emulator_fails() {
        let none = LinuxTerminal::default();
        assert!(matches!(
            none.command("web", Path::new("/"), "true"),
            Err(Error::CommandNotFound(_))
        ));
    }

    #[test]
    fn windows_uses_start() {
        let cmd = WindowsTerminal.command("web", Path::new("."), "npm run dev").unwrap();
        assert_eq!(args(&cmd)[..2], ["/C", "start"]);
    }
}
