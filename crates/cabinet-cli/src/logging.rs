// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use std::env;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CABINET_LOG";

/// Keeps the background log writer alive. Dropping it flushes pending lines.
pub struct LogSink {
    path: PathBuf,
    _guard: WorkerGuard,
}

impl LogSink {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `CABINET_LOG` wins over `[log].level` when set and non-blank.
fn filter_directive(from_env: Option<String>, configured: &str) -> String {
    from_env
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| configured.to_owned())
}

fn build_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive).with_context(|| {
        format!("invalid log filter {directive:?}; fix [log].level or {LOG_ENV}")
    })
}

/// Single file, never rotated, named exactly like `[log].file`.
fn file_appender(path: &Path) -> Result<RollingFileAppender> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("log file {} has no file name -- set [log].file", path.display()))?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .with_context(|| format!("open log file {} -- set [log].file", path.display()))
}

/// Installs the global subscriber. The terminal belongs to the UI, so
/// everything goes to the log file through a background writer.
pub fn init(config: &Config) -> Result<LogSink> {
    let path = config.log_file()?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender(&path)?);

    let filter = build_filter(&filter_directive(env::var(LOG_ENV).ok(), config.log_level()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|error| anyhow!("install log subscriber: {error}"))?;
    Ok(LogSink {
        path,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::{build_filter, file_appender, filter_directive};
    use anyhow::Result;
    use std::path::Path;

    #[test]
    fn env_directive_overrides_config_level() {
        assert_eq!(
            filter_directive(Some("cabinet_client=debug".to_owned()), "info"),
            "cabinet_client=debug"
        );
    }

    #[test]
    fn blank_env_directive_falls_back_to_config_level() {
        assert_eq!(filter_directive(Some("  ".to_owned()), "warn"), "warn");
        assert_eq!(filter_directive(None, "info"), "info");
    }

    #[test]
    fn malformed_directive_is_reported() {
        let error = build_filter("cabinet=loud").expect_err("bad directive should fail");
        assert!(error.to_string().contains("[log].level"));
    }

    #[test]
    fn appender_creates_the_configured_file_and_its_directory() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("cabinet.log");
        let _appender = file_appender(&path)?;
        assert!(path.is_file());
        Ok(())
    }

    #[test]
    fn log_path_without_file_name_is_rejected() {
        let error = file_appender(Path::new("/")).expect_err("root has no file name");
        assert!(error.to_string().contains("[log].file"));
    }
}
