// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Loader, Unit, UnitContext, path_to_name};
use crate::{
    classifier::{NameGlob, matches_any},
    errors::LoadError,
    host::{Host, OutputStream},
    results::ExecutionOutcome,
};
use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::RecvTimeoutError;
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// The environment variable holding the worker ordinal, set for every script.
pub const WORKER_ENV: &str = "UNITRUN_WORKER";

/// The environment variable holding the JSON-encoded worker context, set for every script.
pub const CONTEXT_ENV: &str = "UNITRUN_CONTEXT";

/// The exit code a script uses to report that it skipped itself.
pub const SKIP_EXIT_CODE: i32 = 77;

/// A [`Loader`] where every unit is an executable file.
///
/// A unit's name is its path relative to the top-level directory, without the extension, with
/// separators replaced by `.`. Groups are directories.
#[derive(Debug)]
pub struct ScriptLoader {
    host: Arc<dyn Host>,
    top_level_dir: Utf8PathBuf,
    suffixes: Vec<NameGlob>,
}

impl ScriptLoader {
    /// Creates a new loader rooted at `top_level_dir`.
    ///
    /// `suffixes` determines which files belong to a group.
    pub fn new(host: Arc<dyn Host>, top_level_dir: Utf8PathBuf, suffixes: Vec<NameGlob>) -> Self {
        Self {
            host,
            top_level_dir,
            suffixes,
        }
    }

    fn unit_for(
        &self,
        path: Utf8PathBuf,
        top_level_dir: &Utf8Path,
    ) -> Result<Arc<dyn Unit>, LoadError> {
        let Ok(relative) = path.strip_prefix(top_level_dir) else {
            return Err(LoadError::custom(format!(
                "{path} is not under the top-level directory {top_level_dir}"
            )));
        };
        let name = path_to_name(relative);
        Ok(Arc::new(ScriptUnit {
            name,
            path,
            cwd: self.top_level_dir.clone(),
        }))
    }

    fn files_under(&self, dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, LoadError> {
        self.host.files_under(dir).map_err(|err| LoadError::Io {
            path: dir.to_owned(),
            err,
        })
    }
}

impl Loader for ScriptLoader {
    fn resolve(&self, name: &str) -> Result<Vec<Arc<dyn Unit>>, LoadError> {
        let mut segments: Vec<_> = name.split('.').collect();
        let stem = segments.pop().unwrap_or_default();
        let dir = segments
            .iter()
            .fold(self.top_level_dir.clone(), |dir, segment| dir.join(segment));
        if !self.host.is_dir(&dir) {
            return Err(LoadError::NotFound {
                name: name.to_owned(),
            });
        }

        let units = self
            .files_under(&dir)?
            .into_iter()
            .filter(|path| path.parent() == Some(dir.as_path()))
            .filter(|path| path.file_stem() == Some(stem) && is_executable(path))
            .map(|path| self.unit_for(path, &self.top_level_dir))
            .collect::<Result<Vec<_>, _>>()?;
        if units.is_empty() {
            return Err(LoadError::NotFound {
                name: name.to_owned(),
            });
        }
        Ok(units)
    }

    fn load_group(&self, name: &str) -> Result<Option<Vec<Arc<dyn Unit>>>, LoadError> {
        let dir = name
            .split('.')
            .fold(self.top_level_dir.clone(), |dir, segment| dir.join(segment));
        if !self.host.is_dir(&dir) {
            return Ok(None);
        }
        let members = self
            .files_under(&dir)?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .is_some_and(|file_name| matches_any(&self.suffixes, file_name))
                    && is_executable(path)
            })
            .map(|path| self.unit_for(path, &self.top_level_dir))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(members))
    }

    fn discover(
        &self,
        dir: &Utf8Path,
        pattern: &str,
        top_level_dir: &Utf8Path,
    ) -> Result<Vec<Arc<dyn Unit>>, LoadError> {
        let glob = NameGlob::new(pattern).map_err(|err| LoadError::InvalidPattern {
            pattern: pattern.to_owned(),
            err,
        })?;
        if !dir.starts_with(top_level_dir) {
            return Err(LoadError::custom(format!(
                "{dir} is not under the top-level directory {top_level_dir}"
            )));
        }
        self.files_under(dir)?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .is_some_and(|file_name| glob.is_match(file_name))
                    && is_executable(path)
            })
            .map(|path| self.unit_for(path, top_level_dir))
            .collect()
    }
}

/// A unit backed by an executable file.
#[derive(Debug)]
struct ScriptUnit {
    name: String,
    path: Utf8PathBuf,
    cwd: Utf8PathBuf,
}

impl Unit for ScriptUnit {
    fn id(&self) -> &str {
        &self.name
    }

    fn run(&self, cx: &mut UnitContext<'_>) -> ExecutionOutcome {
        let mut expr = duct::cmd(self.path.as_std_path(), Vec::<String>::new())
            .dir(&self.cwd)
            .env(WORKER_ENV, cx.worker.worker_id.to_string())
            .env(CONTEXT_ENV, cx.context.to_string())
            .unchecked();
        if cx.output.is_diverted() {
            expr = expr.stdout_capture().stderr_capture();
        }

        let handle = match expr.start() {
            Ok(handle) => handle,
            Err(err) => {
                return ExecutionOutcome::error(format!("failed to start {}: {err}", self.path));
            }
        };

        let timed_out = std::thread::scope(|s| {
            let (sender, receiver) = crossbeam_channel::bounded::<()>(1);
            let wait_handle = &handle;

            s.spawn(move || {
                // The result is collected below, this thread only waits.
                let _ = wait_handle.wait();
                let _ = sender.send(());
            });

            match cx.timeout {
                Some(timeout) => match receiver.recv_timeout(timeout) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => None,
                    Err(RecvTimeoutError::Timeout) => {
                        debug!(unit = %self.name, ?timeout, "killing unit after timeout");
                        let _ = handle.kill();
                        Some(timeout)
                    }
                },
                None => {
                    let _ = receiver.recv();
                    None
                }
            }
        });

        if let Some(timeout) = timed_out {
            return ExecutionOutcome::error(format!(
                "{} timed out after {}",
                self.name,
                humantime::format_duration(timeout)
            ));
        }

        let output = match handle.into_output() {
            Ok(output) => output,
            Err(err) => {
                return ExecutionOutcome::error(format!("failed to wait for {}: {err}", self.path));
            }
        };
        cx.output
            .write(OutputStream::Stdout, &String::from_utf8_lossy(&output.stdout));
        cx.output
            .write(OutputStream::Stderr, &String::from_utf8_lossy(&output.stderr));

        match output.status.code() {
            Some(0) => ExecutionOutcome::pass(),
            Some(SKIP_EXIT_CODE) => ExecutionOutcome::skip(format!(
                "{} exited with code {SKIP_EXIT_CODE}",
                self.name
            )),
            _ => ExecutionOutcome::failure(format!("{} failed: {}\n", self.name, output.status)),
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Utf8Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .is_ok_and(|metadata| metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Utf8Path) -> bool {
    path.is_file()
}
