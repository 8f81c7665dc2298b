// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory implementations of [`Host`] and [`Loader`], for driving runs in tests.

use crate::{
    classifier::NameGlob,
    errors::{FetchError, LoadError},
    host::{FetchRequest, FetchResponse, Host, OutputStream},
    loader::{Loader, Unit, UnitContext, path_to_name},
    results::ExecutionOutcome,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt, io,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

/// The process ID reported by [`FakeHost`].
pub const FAKE_PID: u32 = 4242;

/// The time at which a [`FakeHost`] clock starts.
pub fn fake_epoch() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_400_000_000)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`Host`] with an in-memory filesystem, environment and output streams.
///
/// The clock starts at [`fake_epoch`] and advances by one millisecond every time it is read, so
/// every reading is distinct and strictly increasing.
#[derive(Debug)]
pub struct FakeHost {
    now: Mutex<SystemTime>,
    tick: Duration,
    cwd: Utf8PathBuf,
    files: Mutex<BTreeMap<Utf8PathBuf, String>>,
    dirs: Mutex<BTreeSet<Utf8PathBuf>>,
    env: Mutex<HashMap<String, String>>,
    stdin: Mutex<String>,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
    cpu_count: usize,
    is_terminal: bool,
    terminal_width: usize,
    fetch_response: Mutex<Result<FetchResponse, String>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    /// Creates a new host with the working directory `/fake/cwd`.
    pub fn new() -> Self {
        let cwd = Utf8PathBuf::from("/fake/cwd");
        let mut dirs = BTreeSet::new();
        dirs.insert(cwd.clone());
        Self {
            now: Mutex::new(fake_epoch()),
            tick: Duration::from_millis(1),
            cwd,
            files: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(dirs),
            env: Mutex::new(HashMap::new()),
            stdin: Mutex::new(String::new()),
            stdout: Mutex::new(String::new()),
            stderr: Mutex::new(String::new()),
            cpu_count: 2,
            is_terminal: false,
            terminal_width: 80,
            fetch_response: Mutex::new(Ok(FetchResponse {
                status: 200,
                body: String::new(),
            })),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sets the number of CPUs reported.
    pub fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    /// Sets whether standard output claims to be a terminal.
    pub fn with_terminal(mut self, is_terminal: bool) -> Self {
        self.is_terminal = is_terminal;
        self
    }

    /// Adds a file, relative to the working directory unless absolute.
    pub fn add_file(&self, path: impl AsRef<Utf8Path>, contents: impl Into<String>) {
        let path = self.cwd.join(path);
        let mut dirs = lock(&self.dirs);
        for ancestor in path.ancestors().skip(1) {
            dirs.insert(ancestor.to_owned());
        }
        lock(&self.files).insert(path, contents.into());
    }

    /// Adds an empty directory, relative to the working directory unless absolute.
    pub fn add_dir(&self, path: impl AsRef<Utf8Path>) {
        let path = self.cwd.join(path);
        let mut dirs = lock(&self.dirs);
        for ancestor in path.ancestors() {
            dirs.insert(ancestor.to_owned());
        }
    }

    /// Sets an environment variable.
    pub fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
        lock(&self.env).insert(key.into(), value.into());
    }

    /// Sets what standard input contains.
    pub fn set_stdin(&self, contents: impl Into<String>) {
        *lock(&self.stdin) = contents.into();
    }

    /// Sets the response returned by [`Host::fetch`].
    pub fn set_fetch_response(&self, status: u16, body: impl Into<String>) {
        *lock(&self.fetch_response) = Ok(FetchResponse {
            status,
            body: body.into(),
        });
    }

    /// Makes [`Host::fetch`] fail with the given message.
    pub fn set_fetch_error(&self, message: impl Into<String>) {
        *lock(&self.fetch_response) = Err(message.into());
    }

    /// Returns everything printed to standard output.
    pub fn stdout(&self) -> String {
        lock(&self.stdout).clone()
    }

    /// Returns everything printed to standard error.
    pub fn stderr(&self) -> String {
        lock(&self.stderr).clone()
    }

    /// Returns the contents of a file, relative to the working directory unless absolute.
    pub fn file(&self, path: impl AsRef<Utf8Path>) -> Option<String> {
        lock(&self.files).get(&self.cwd.join(path)).cloned()
    }

    /// Returns every request sent through [`Host::fetch`].
    pub fn requests(&self) -> Vec<FetchRequest> {
        lock(&self.requests).clone()
    }
}

impl Host for FakeHost {
    fn time(&self) -> SystemTime {
        let mut now = lock(&self.now);
        let current = *now;
        *now += self.tick;
        current
    }

    fn pid(&self) -> u32 {
        FAKE_PID
    }

    fn cwd(&self) -> io::Result<Utf8PathBuf> {
        Ok(self.cwd.clone())
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    fn is_file(&self, path: &Utf8Path) -> bool {
        lock(&self.files).contains_key(&self.cwd.join(path))
    }

    fn is_dir(&self, path: &Utf8Path) -> bool {
        lock(&self.dirs).contains(&self.cwd.join(path))
    }

    fn files_under(&self, dir: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
        let dir = self.cwd.join(dir);
        if !lock(&self.dirs).contains(&dir) {
            return Err(io::Error::new(io::ErrorKind::NotFound, dir.to_string()));
        }
        Ok(lock(&self.files)
            .keys()
            .filter(|path| path.starts_with(&dir))
            .cloned()
            .collect())
    }

    fn read_text_file(&self, path: &Utf8Path) -> io::Result<String> {
        self.file(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn write_text_file(&self, path: &Utf8Path, contents: &str) -> io::Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn read_stdin(&self) -> io::Result<String> {
        Ok(std::mem::take(&mut *lock(&self.stdin)))
    }

    fn getenv(&self, key: &str) -> Option<String> {
        lock(&self.env).get(key).cloned()
    }

    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    fn terminal_width(&self) -> usize {
        self.terminal_width
    }

    fn stdout_is_terminal(&self) -> bool {
        self.is_terminal
    }

    fn print(&self, stream: OutputStream, text: &str) {
        match stream {
            OutputStream::Stdout => lock(&self.stdout).push_str(text),
            OutputStream::Stderr => lock(&self.stderr).push_str(text),
        }
    }

    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        lock(&self.requests).push(request.clone());
        lock(&self.fetch_response).clone().map_err(FetchError::new)
    }
}

type Behavior = dyn Fn(&mut UnitContext<'_>) -> ExecutionOutcome + Send + Sync;

/// A unit registered with a [`FakeLoader`].
#[derive(Clone)]
pub struct FakeUnit {
    name: String,
    behavior: Arc<Behavior>,
    runs: Arc<AtomicUsize>,
}

impl fmt::Debug for FakeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeUnit")
            .field("name", &self.name)
            .field("runs", &self.runs.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Unit for FakeUnit {
    fn id(&self) -> &str {
        &self.name
    }

    fn run(&self, cx: &mut UnitContext<'_>) -> ExecutionOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        (self.behavior)(cx)
    }
}

#[derive(Clone, Debug)]
struct Registered {
    unit: FakeUnit,
    // Units that are only reachable by loading an enclosing group.
    group_only: bool,
}

/// A [`Loader`] over an in-memory registry of units.
///
/// * [`resolve`](Loader::resolve) finds the units registered under exactly that name, or failing
///   that every unit below it.
/// * [`load_group`](Loader::load_group) returns every unit below a name, including units
///   registered with [`add_group_member`](Self::add_group_member).
/// * [`discover`](Loader::discover) treats every name segment as a file with a `.unit`
///   extension: a unit is discovered by a pattern if one of its segments matches it.
#[derive(Debug, Default)]
pub struct FakeLoader {
    units: Mutex<IndexMap<String, Vec<Registered>>>,
}

impl FakeLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unit with custom behavior.
    pub fn add_unit<F>(&self, name: impl Into<String>, behavior: F)
    where
        F: Fn(&mut UnitContext<'_>) -> ExecutionOutcome + Send + Sync + 'static,
    {
        self.register(name.into(), Arc::new(behavior), false);
    }

    /// Registers a unit that always passes.
    pub fn add_passing(&self, name: impl Into<String>) {
        self.add_unit(name, |_| ExecutionOutcome::pass());
    }

    /// Registers a unit that always fails with the given details.
    pub fn add_failing(&self, name: impl Into<String>, details: impl Into<String>) {
        let details = details.into();
        self.add_unit(name, move |_| ExecutionOutcome::failure(details.clone()));
    }

    /// Registers a unit that cannot be resolved by name, only found by loading an enclosing
    /// group.
    pub fn add_group_member<F>(&self, name: impl Into<String>, behavior: F)
    where
        F: Fn(&mut UnitContext<'_>) -> ExecutionOutcome + Send + Sync + 'static,
    {
        self.register(name.into(), Arc::new(behavior), true);
    }

    /// Returns how many times units with this name have run.
    pub fn runs(&self, name: &str) -> usize {
        lock(&self.units).get(name).map_or(0, |registered| {
            registered
                .iter()
                .map(|r| r.unit.runs.load(Ordering::SeqCst))
                .sum()
        })
    }

    fn register(&self, name: String, behavior: Arc<Behavior>, group_only: bool) {
        let unit = FakeUnit {
            name: name.clone(),
            behavior,
            runs: Arc::new(AtomicUsize::new(0)),
        };
        lock(&self.units)
            .entry(name)
            .or_default()
            .push(Registered { unit, group_only });
    }

    fn below(&self, prefix: &str, include_group_only: bool) -> Vec<Arc<dyn Unit>> {
        lock(&self.units)
            .iter()
            .filter(|(name, _)| {
                prefix.is_empty()
                    || name
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .flat_map(|(_, registered)| registered.iter())
            .filter(|r| include_group_only || !r.group_only)
            .map(|r| Arc::new(r.unit.clone()) as Arc<dyn Unit>)
            .collect()
    }
}

impl Loader for FakeLoader {
    fn resolve(&self, name: &str) -> Result<Vec<Arc<dyn Unit>>, LoadError> {
        let exact: Vec<Arc<dyn Unit>> = lock(&self.units)
            .get(name)
            .into_iter()
            .flatten()
            .filter(|r| !r.group_only)
            .map(|r| Arc::new(r.unit.clone()) as Arc<dyn Unit>)
            .collect();
        if !exact.is_empty() {
            return Ok(exact);
        }
        let below = self.below(name, true);
        if below.is_empty() {
            return Err(LoadError::NotFound {
                name: name.to_owned(),
            });
        }
        Ok(below)
    }

    fn load_group(&self, name: &str) -> Result<Option<Vec<Arc<dyn Unit>>>, LoadError> {
        let members = self.below(name, true);
        Ok((!members.is_empty()).then_some(members))
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
        let prefix = match dir.strip_prefix(top_level_dir) {
            Ok(relative) => path_to_name(relative),
            Err(_) => {
                return Err(LoadError::custom(format!(
                    "{dir} is not under {top_level_dir}"
                )));
            }
        };
        Ok(self
            .below(&prefix, true)
            .into_iter()
            .filter(|unit| {
                unit.id()
                    .split('.')
                    .any(|segment| glob.is_match(&format!("{segment}.unit")))
            })
            .collect())
    }
}
