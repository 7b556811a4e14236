//! Operating system services.
//!
//! Every subprocess the engine starts goes through [`CommandRunner`], so the
//! rest of the crate never touches `std::process` directly and tests can
//! substitute a recording runner.

use nix::unistd::{chown, Group, User};
use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{debug, error};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a command that exited with status 0.
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    /// Output of a command that exited with the given status.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short description of a failed run for error messages.
    pub fn describe(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        };

        let stderr = self.stderr.trim();

        if stderr.is_empty() {
            status
        } else {
            format!("{status}: {stderr}")
        }
    }
}

/// Narrow interface to process invocation.
///
/// `Err` means the program could not be started at all; a non-zero exit
/// status is reported through [`CommandOutput`].
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

/// Runs commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        debug!("Running command: {} {:?}", program, args);

        let output = Command::new(program).args(args).output()?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if result.success() {
            debug!("Command output: {}", result.stdout.trim_end());
        } else {
            error!("Command failed: {} {}", program, result.describe());
        }

        Ok(result)
    }
}

pub const SYSTEMCTL: &str = "/usr/bin/systemctl";
pub const HOSTNAMECTL: &str = "/usr/bin/hostnamectl";
pub const TAR: &str = "/usr/bin/tar";

/// Invoke systemctl and fail on a non-zero exit status.
///
/// The error string carries the spawn error or the exit description; callers
/// wrap it into the error variant of their layer.
pub fn systemctl(runner: &dyn CommandRunner, args: &[&str]) -> Result<(), String> {
    let output = runner
        .run(SYSTEMCTL, args)
        .map_err(|e| format!("failed to execute systemctl: {e}"))?;

    if output.success() {
        Ok(())
    } else {
        Err(format!("systemctl {} failed with {}", args.join(" "), output.describe()))
    }
}

/// Reboot the host.
pub fn reboot(runner: &dyn CommandRunner) -> Result<(), String> {
    systemctl(runner, &["reboot"])
}

/// Owner and group applied to installed files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOwnership {
    pub user: String,
    pub group: String,
}

impl FileOwnership {
    /// `None` if either name is empty.
    pub fn from_names(user: &str, group: &str) -> Option<Self> {
        if user.is_empty() || group.is_empty() {
            None
        } else {
            Some(Self {
                user: user.to_string(),
                group: group.to_string(),
            })
        }
    }
}

/// Change owner and group of `path` by name.
pub fn set_owner(path: &Path, ownership: &FileOwnership) -> io::Result<()> {
    let user = User::from_name(&ownership.user)
        .map_err(io::Error::from)?
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such user: {}", ownership.user))
        })?;
    let group = Group::from_name(&ownership.group)
        .map_err(io::Error::from)?
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such group: {}", ownership.group))
        })?;

    chown(path, Some(user.uid), Some(group.gid)).map_err(io::Error::from)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording runner shared by the unit tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records every invocation and answers from a table of canned results.
    #[derive(Default)]
    pub struct FakeRunner {
        calls: Mutex<Vec<String>>,
        failures: Mutex<HashMap<String, CommandOutput>>,
        missing: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every command line starting with `prefix` exit with `code`.
        pub fn fail(&self, prefix: &str, code: i32) {
            self.failures
                .lock()
                .unwrap()
                .insert(prefix.to_string(), CommandOutput::failed(code, "simulated"));
        }

        /// Make `program` impossible to start.
        pub fn missing(&self, program: &str) {
            self.missing.lock().unwrap().push(program.to_string());
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            if self.missing.lock().unwrap().iter().any(|p| p == program) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
            }

            let failures = self.failures.lock().unwrap();
            for (prefix, output) in failures.iter() {
                if line.starts_with(prefix.as_str()) {
                    return Ok(output.clone());
                }
            }

            Ok(CommandOutput::ok())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeRunner;
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(CommandOutput::ok().describe(), "exit status 0");
        assert_eq!(
            CommandOutput::failed(1, "Unit not found.\n").describe(),
            "exit status 1: Unit not found."
        );
        let killed = CommandOutput {
            code: None,
            ..Default::default()
        };
        assert_eq!(killed.describe(), "terminated by signal");
    }

    #[test]
    fn test_systemctl_reports_status() {
        let runner = FakeRunner::new();
        assert!(systemctl(&runner, &["restart", "foo.service"]).is_ok());

        runner.fail("/usr/bin/systemctl restart bar", 5);
        let err = systemctl(&runner, &["restart", "bar.service"]).unwrap_err();
        assert!(err.contains("exit status 5"));

        assert_eq!(
            runner.calls(),
            vec![
                "/usr/bin/systemctl restart foo.service".to_string(),
                "/usr/bin/systemctl restart bar.service".to_string(),
            ]
        );
    }

    #[test]
    fn test_reboot() {
        let runner = FakeRunner::new();
        reboot(&runner).unwrap();
        assert_eq!(runner.calls(), vec!["/usr/bin/systemctl reboot".to_string()]);
    }

    #[test]
    fn test_ownership_from_names() {
        assert_eq!(
            FileOwnership::from_names("openvpn", "network"),
            Some(FileOwnership {
                user: "openvpn".to_string(),
                group: "network".to_string(),
            })
        );
        assert_eq!(FileOwnership::from_names("", "network"), None);
        assert_eq!(FileOwnership::from_names("root", ""), None);
    }

    #[test]
    fn test_system_runner_spawn_failure() {
        let err = SystemCommandRunner
            .run("/nonexistent/termvpn-test-binary", &[])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
