//! Compose collaborator: how many services are running, stop, start.

use std::path::Path;
use std::time::Duration;

use crate::command::{self, CommandOutput, CommandSpec};
use crate::error::{Result, StackbackError};

#[allow(async_fn_in_trait)]
pub trait ComposeClient {
    /// Program that must be on PATH for this client to work.
    fn required_binary(&self) -> Option<&str> {
        None
    }

    /// Number of running services of the stack in `dir`.
    async fn running_count(&self, dir: &Path, timeout: Duration) -> Result<usize>;

    async fn stop(&self, dir: &Path, timeout: Duration) -> Result<CommandOutput>;

    async fn start(&self, dir: &Path, timeout: Duration) -> Result<CommandOutput>;
}

/// `docker compose` (or whatever `command` names) run inside the stack
/// directory.
#[derive(Debug, Clone)]
pub struct DockerCompose {
    command: Vec<String>,
}

impl DockerCompose {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("docker")
    }

    fn spec(&self, dir: &Path) -> CommandSpec {
        let program = self.program().to_string();
        CommandSpec::new(program)
            .args(self.command.iter().skip(1).cloned())
            .cwd(dir)
    }
}

impl Default for DockerCompose {
    fn default() -> Self {
        Self::new(vec!["docker".into(), "compose".into()])
    }
}

impl ComposeClient for DockerCompose {
    fn required_binary(&self) -> Option<&str> {
        Some(self.program())
    }

    async fn running_count(&self, dir: &Path, timeout: Duration) -> Result<usize> {
        let spec = self.spec(dir).args(["ps", "--status", "running", "-q"]);
        let out = command::run_captured(&spec, timeout).await?;
        if !out.success() {
            return Err(StackbackError::Docker(format!(
                "status query in {} {}",
                dir.display(),
                out.describe()
            )));
        }
        Ok(count_ids(&out.stdout))
    }

    async fn stop(&self, dir: &Path, timeout: Duration) -> Result<CommandOutput> {
        command::run_captured(&self.spec(dir).arg("stop"), timeout).await
    }

    async fn start(&self, dir: &Path, timeout: Duration) -> Result<CommandOutput> {
        command::run_captured(&self.spec(dir).args(["up", "-d"]), timeout).await
    }
}

fn count_ids(stdout: &str) -> usize {
    stdout.lines().filter(|l| !l.trim().is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_non_empty_lines() {
        assert_eq!(count_ids(""), 0);
        assert_eq!(count_ids("\n\n"), 0);
        assert_eq!(count_ids("3f2a\n9bc1\n"), 2);
    }

    #[test]
    fn spec_runs_inside_stack_dir() {
        let compose = DockerCompose::new(vec!["docker-compose".into()]);
        let spec = compose.spec(Path::new("/srv/stacks/web")).arg("stop");
        assert_eq!(spec.to_string(), "docker-compose stop");
        assert_eq!(
            spec.cwd.as_deref(),
            Some(Path::new("/srv/stacks/web"))
        );
        assert_eq!(DockerCompose::default().program(), "docker");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn status_counts_fake_binary_output() {
        // A stand-in "compose" binary that prints two container ids.
        let dir = tempfile::TempDir::new().unwrap();
        let compose = DockerCompose::new(vec![
            "sh".into(),
            "-c".into(),
            "printf 'a1\\nb2\\n'".into(),
        ]);
        let n = compose
            .running_count(dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(n, 2);
    }
}
