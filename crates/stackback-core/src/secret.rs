//! Repository password resolution.
//!
//! Sources in strict precedence: `password_file` > `password_command` >
//! `password`. The highest-precedence source that is configured is the only
//! one consulted; if it yields nothing the run aborts with a config error
//! instead of silently falling back to a lower source.

use std::time::Duration;

use crate::command::{self, CommandSpec};
use crate::config::SecretSources;
use crate::error::{Result, StackbackError};

/// A resolved secret. Never printed.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    File,
    Command,
    Value,
}

pub async fn resolve(sources: &SecretSources, timeout: Duration) -> Result<(Secret, SecretSource)> {
    if let Some(path) = &sources.file {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StackbackError::Config(format!("cannot read password_file {}: {e}", path.display()))
        })?;
        let value = first_line(&raw);
        if value.is_empty() {
            return Err(StackbackError::Config(format!(
                "password_file {} is empty",
                path.display()
            )));
        }
        return Ok((Secret::new(value), SecretSource::File));
    }

    if let Some(script) = sources.command.as_deref().filter(|c| !c.trim().is_empty()) {
        let spec = CommandSpec::new("sh").arg("-c").arg(script);
        let out = command::run_captured(&spec, timeout).await.map_err(|e| {
            StackbackError::Config(format!("password_command could not run: {e}"))
        })?;
        if !out.success() {
            return Err(StackbackError::Config(format!(
                "password_command {}",
                out.describe()
            )));
        }
        let value = first_line(&out.stdout);
        if value.is_empty() {
            return Err(StackbackError::Config(
                "password_command produced no output".to_string(),
            ));
        }
        return Ok((Secret::new(value), SecretSource::Command));
    }

    match sources.value.as_deref() {
        Some(v) if !v.is_empty() => Ok((Secret::new(v), SecretSource::Value)),
        _ => Err(StackbackError::Config(
            "no repository password configured".to_string(),
        )),
    }
}

fn first_line(raw: &str) -> String {
    raw.lines().next().unwrap_or("").trim_end_matches('\r').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use tempfile::TempDir;

    fn sources(
        file: Option<std::path::PathBuf>,
        command: Option<&str>,
        value: Option<&str>,
    ) -> SecretSources {
        SecretSources {
            file,
            command: command.map(str::to_string),
            value: value.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn file_wins_over_everything() {
        let dir = TempDir::new().unwrap();
        let pw = dir.path().join("pw");
        std::fs::write(&pw, "from-file\nignored\n").unwrap();
        let (secret, source) = resolve(
            &sources(Some(pw), Some("echo from-command"), Some("direct")),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(secret.expose(), "from-file");
        assert_eq!(source, SecretSource::File);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_wins_over_value() {
        let (secret, source) = resolve(
            &sources(None, Some("echo from-command"), Some("direct")),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(secret.expose(), "from-command");
        assert_eq!(source, SecretSource::Command);
    }

    #[tokio::test]
    async fn direct_value_is_last_resort() {
        let (secret, source) = resolve(&sources(None, None, Some("direct")), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(secret.expose(), "direct");
        assert_eq!(source, SecretSource::Value);
    }

    #[tokio::test]
    async fn empty_file_does_not_fall_through() {
        let dir = TempDir::new().unwrap();
        let pw = dir.path().join("pw");
        std::fs::write(&pw, "\n").unwrap();
        let err = resolve(&sources(Some(pw), None, Some("direct")), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Config);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_config_error() {
        let err = resolve(&sources(None, Some("exit 1"), None), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Config);
    }

    #[tokio::test]
    async fn nothing_configured_is_config_error() {
        let err = resolve(&sources(None, None, Some("")), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Config);
    }

    #[test]
    fn debug_is_redacted() {
        assert_eq!(format!("{:?}", Secret::new("hunter2")), "Secret(***)");
    }
}
