// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run configuration.
//!
//! Configuration is resolved in two steps. The command line produces a [`RunOptions`], which
//! holds exactly what the user asked for. [`RunConfig::resolve`] then layers those options on top
//! of the repository configuration file and the built-in defaults, and validates the result.
//! Every check happens here, before anything runs.

use crate::{
    artifacts::UploadTarget,
    classifier::NameGlob,
    errors::ConfigurationError,
    host::Host,
    reporter::DisplayOptions,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigError, File, FileFormat};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::{collections::BTreeSet, time::Duration};
use tracing::{debug, warn};

/// The file that marks a directory as part of an enclosing package.
///
/// The top-level directory is found by walking upward from the starting directory while this
/// file exists.
pub const PACKAGE_MARKER: &str = ".unitrun-package";

/// The environment variable that supplies the default status format.
pub const STATUS_FORMAT_ENV: &str = "UNITRUN_STATUS";

/// The path of the repository configuration file, relative to the top-level directory.
pub const CONFIG_PATH: &str = ".config/unitrun.toml";

/// Options as they were provided, before validation.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Print the version and exit.
    pub version: bool,

    /// Unit names, files or directories to run.
    pub tests: Vec<String>,

    /// Read unit names from this file, or standard input if `-`.
    pub file_list: Option<String>,

    /// Globs of unit names to run one at a time.
    pub isolate: Vec<String>,

    /// Globs of unit names to skip.
    pub skip: Vec<String>,

    /// Globs of file names to discover units in.
    pub suffixes: Vec<String>,

    /// The number of parallel workers.
    pub jobs: Option<usize>,

    /// Only list units.
    pub list_only: bool,

    /// Discover and report units without running them.
    pub dry_run: bool,

    /// Only print failures.
    pub quiet: bool,

    /// The status prefix template.
    pub status_format: Option<String>,

    /// Print timing information.
    pub timing: bool,

    /// The verbosity level.
    pub verbose: u8,

    /// Don't capture unit output.
    pub passthrough: bool,

    /// The number of times to retry failures.
    pub retry_limit: Option<usize>,

    /// The terminal width to elide progress to.
    pub terminal_width: Option<usize>,

    /// Whether to overwrite the progress line.
    pub overwrite: Option<bool>,

    /// `key=value` metadata entries.
    pub metadata: Vec<String>,

    /// Where to write the full-results document.
    pub write_full_results_to: Option<Utf8PathBuf>,

    /// Where to write the trace document.
    pub write_trace_to: Option<Utf8PathBuf>,

    /// The results server to upload to.
    pub upload_to: Option<String>,

    /// The builder name, for uploads.
    pub upload_builder: Option<String>,

    /// The source (master) name, for uploads.
    pub upload_source: Option<String>,

    /// The kind of run (test type), for uploads.
    pub upload_kind: Option<String>,

    /// The top-level directory of the project.
    pub top_level_dir: Option<Utf8PathBuf>,

    /// An explicit configuration file.
    pub config_file: Option<Utf8PathBuf>,

    /// The run context, as JSON.
    pub context: Option<String>,

    /// The per-unit timeout.
    pub timeout: Option<Duration>,

    /// Use ANSI colors in progress output.
    pub colorize: bool,
}

/// A fully resolved and validated run configuration.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Print the version and exit.
    pub version: bool,

    /// Unit names, files or directories to run.
    pub tests: Vec<String>,

    /// Read unit names from this file, or standard input if `-`.
    pub file_list: Option<String>,

    /// The absolute top-level directory.
    pub top_level_dir: Utf8PathBuf,

    /// Globs of unit names to run one at a time.
    pub isolate: Vec<NameGlob>,

    /// Globs of unit names to skip.
    pub skip: Vec<NameGlob>,

    /// Globs of file names to discover units in.
    pub suffixes: Vec<String>,

    /// `suffixes`, compiled.
    pub suffix_globs: Vec<NameGlob>,

    /// The number of parallel workers. Always at least 1.
    pub jobs: usize,

    /// The number of times to retry failures.
    pub retry_limit: usize,

    /// Only list units.
    pub list_only: bool,

    /// Discover and report units without running them.
    pub dry_run: bool,

    /// Don't capture unit output.
    pub passthrough: bool,

    /// The status prefix template.
    pub status_format: String,

    /// What to print, and how.
    pub display: DisplayOptions,

    /// Parsed metadata.
    pub metadata: IndexMap<String, String>,

    /// Where to write the full-results document.
    pub write_full_results_to: Option<Utf8PathBuf>,

    /// Where to write the trace document.
    pub write_trace_to: Option<Utf8PathBuf>,

    /// Where to upload results.
    pub upload: Option<UploadTarget>,

    /// The run context.
    pub context: Value,

    /// The per-unit timeout.
    pub timeout: Option<Duration>,
}

impl RunConfig {
    /// The built-in default configuration.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Resolves and validates options against the configuration file and defaults.
    pub fn resolve(opts: RunOptions, host: &dyn Host) -> Result<Self, ConfigurationError> {
        let metadata_args = parse_metadata(&opts.metadata)?;
        let upload = upload_target(&opts)?;
        let context = match &opts.context {
            Some(context) => serde_json::from_str(context)
                .map_err(|err| ConfigurationError::InvalidContext { err })?,
            None => Value::Null,
        };

        let cwd = host
            .cwd()
            .map_err(|err| ConfigurationError::CurrentDir { err })?;
        // A version query doesn't look at the project: no directory walk and no config file.
        let top_level_dir = match &opts.top_level_dir {
            Some(dir) => cwd.join(dir),
            None if opts.version => cwd.clone(),
            None => find_top_level_dir(host, &cwd, opts.tests.first().map(String::as_str)),
        };
        debug!(%top_level_dir, "resolved top-level directory");

        let file = read_config_file(
            host,
            &top_level_dir,
            opts.config_file.as_deref(),
            !opts.version,
        )?;

        let mut jobs = opts.jobs.or(file.jobs).unwrap_or_else(|| host.cpu_count());
        if jobs == 0 {
            return Err(ConfigurationError::InvalidJobs);
        }
        if opts.passthrough {
            // Captured output can't be attributed to a unit if several write at once.
            jobs = 1;
        }

        let isolate = compile_globs(file.isolate.iter().chain(&opts.isolate))?;
        let skip = compile_globs(file.skip.iter().chain(&opts.skip))?;
        let suffixes = if opts.suffixes.is_empty() {
            file.suffixes
        } else {
            opts.suffixes
        };
        let suffix_globs = compile_globs(&suffixes)?;

        let status_format = opts
            .status_format
            .or_else(|| host.getenv(STATUS_FORMAT_ENV))
            .unwrap_or(file.status_format);

        let mut metadata = file.metadata;
        metadata.extend(metadata_args);

        let display = DisplayOptions {
            quiet: opts.quiet,
            verbose: opts.verbose,
            timing: opts.timing,
            overwrite: opts
                .overwrite
                .unwrap_or_else(|| host.stdout_is_terminal() && opts.verbose == 0),
            terminal_width: opts
                .terminal_width
                .unwrap_or_else(|| host.terminal_width()),
            colorize: opts.colorize,
        };

        Ok(Self {
            version: opts.version,
            tests: opts.tests,
            file_list: opts.file_list,
            top_level_dir,
            isolate,
            skip,
            suffixes,
            suffix_globs,
            jobs,
            retry_limit: opts.retry_limit.unwrap_or(file.retry_limit),
            list_only: opts.list_only,
            dry_run: opts.dry_run,
            passthrough: opts.passthrough,
            status_format,
            display,
            metadata,
            write_full_results_to: opts.write_full_results_to.map(|path| cwd.join(path)),
            write_trace_to: opts.write_trace_to.map(|path| cwd.join(path)),
            upload,
            context,
            timeout: opts.timeout.or(file.timeout),
        })
    }
}

/// Parses `key=value` entries, splitting at the first `=`.
pub fn parse_metadata(entries: &[String]) -> Result<IndexMap<String, String>, ConfigurationError> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => Ok((key.to_owned(), value.to_owned())),
            None => Err(ConfigurationError::MalformedMetadata {
                entry: entry.clone(),
            }),
        })
        .collect()
}

fn upload_target(opts: &RunOptions) -> Result<Option<UploadTarget>, ConfigurationError> {
    let Some(server) = &opts.upload_to else {
        return Ok(None);
    };
    let require = |value: &Option<String>, field: &'static str| {
        value
            .clone()
            .ok_or(ConfigurationError::MissingUploadField { field })
    };
    Ok(Some(UploadTarget {
        server: server.clone(),
        builder: require(&opts.upload_builder, "--upload-builder")?,
        source: require(&opts.upload_source, "--upload-source")?,
        kind: require(&opts.upload_kind, "--upload-kind")?,
    }))
}

fn compile_globs<'a>(
    globs: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<NameGlob>, ConfigurationError> {
    globs
        .into_iter()
        .map(|glob| {
            NameGlob::new(glob.as_str()).map_err(|err| ConfigurationError::InvalidGlob {
                glob: glob.clone(),
                err,
            })
        })
        .collect()
}

/// Finds the top-level directory: the directory containing the first named path (or the working
/// directory), then upward for as long as the directory is marked as part of a package.
fn find_top_level_dir(host: &dyn Host, cwd: &Utf8Path, first_test: Option<&str>) -> Utf8PathBuf {
    let mut dir = match first_test {
        Some(first) if host.exists(Utf8Path::new(first)) => {
            let path = cwd.join(first);
            path.parent().map_or_else(|| cwd.to_owned(), Utf8Path::to_owned)
        }
        _ => cwd.to_owned(),
    };
    while host.is_file(&dir.join(PACKAGE_MARKER)) {
        match dir.parent() {
            Some(parent) => dir = parent.to_owned(),
            None => break,
        }
    }
    dir
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ConfigFileDeserialize {
    #[serde(default)]
    jobs: Option<usize>,
    retry_limit: usize,
    #[serde(default)]
    isolate: Vec<String>,
    #[serde(default)]
    skip: Vec<String>,
    suffixes: Vec<String>,
    status_format: String,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    #[serde(default)]
    metadata: IndexMap<String, String>,
}

/// Reads the embedded defaults, layered under the project's config file if `read_project` is
/// true.
fn read_config_file(
    host: &dyn Host,
    top_level_dir: &Utf8Path,
    explicit: Option<&Utf8Path>,
    read_project: bool,
) -> Result<ConfigFileDeserialize, ConfigurationError> {
    let mut builder =
        Config::builder().add_source(File::from_str(RunConfig::DEFAULT_CONFIG, FileFormat::Toml));

    let (path, required) = match explicit {
        Some(path) => (host.cwd().map_or_else(|_| path.to_owned(), |cwd| cwd.join(path)), true),
        None => (top_level_dir.join(CONFIG_PATH), false),
    };
    if read_project && (required || host.is_file(&path)) {
        let contents = host
            .read_text_file(&path)
            .map_err(|err| ConfigurationError::ConfigFileRead {
                path: path.clone(),
                err,
            })?;
        debug!(%path, "reading config file");
        builder = builder.add_source(File::from_str(&contents, FileFormat::Toml));
    }

    let config = builder
        .build()
        .map_err(|err| ConfigurationError::ConfigBuild { err: Box::new(err) })?;

    let mut ignored = BTreeSet::new();
    let mut cb = |path: serde_ignored::Path| {
        ignored.insert(path.to_string());
    };
    let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
    let deserialized: ConfigFileDeserialize = serde_path_to_error::deserialize(ignored_de)
        .map_err(|error| {
            // The config crate also reports the key; drop it so the path is only shown once.
            let key_path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigurationError::ConfigFileParse {
                path: path.clone(),
                err: Box::new(serde_path_to_error::Error::new(key_path, error)),
            }
        })?;

    for key in ignored {
        warn!("ignoring unknown configuration key `{key}` in {path}");
    }
    Ok(deserialized)
}
