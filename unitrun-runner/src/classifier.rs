// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assigning discovered units to the skip, isolated and parallel buckets.

use crate::{
    errors::GlobConstructError,
    test_set::{TestInput, TestSet},
};

/// The message attached to units skipped through a skip glob.
pub const SKIPPED_BY_REQUEST: &str = "skipped by request";

/// A shell-style glob matched against a full unit name.
///
/// We do not use `globset::GlobMatcher` directly because it has path-like semantics, so we use
/// regexes directly.
#[derive(Clone, Debug)]
pub struct NameGlob {
    glob_str: String,
    regex: regex::bytes::Regex,
}

impl NameGlob {
    /// Creates a new glob.
    pub fn new(glob_str: impl Into<String>) -> Result<Self, GlobConstructError> {
        let glob_str = glob_str.into();
        let glob = globset::GlobBuilder::new(&glob_str)
            // Only allow escapes via [].
            .backslash_escape(false)
            .empty_alternates(true)
            .build()
            .map_err(GlobConstructError::InvalidGlob)?;

        let regex = regex::bytes::Regex::new(glob.regex())
            .map_err(|error| GlobConstructError::RegexError(error.to_string()))?;

        Ok(Self { glob_str, regex })
    }

    /// Returns the glob string.
    pub fn as_str(&self) -> &str {
        &self.glob_str
    }

    /// Returns true if this glob matches the given name.
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name.as_bytes())
    }
}

/// Returns true if any of the globs match the name.
pub fn matches_any(globs: &[NameGlob], name: &str) -> bool {
    globs.iter().any(|glob| glob.is_match(name))
}

/// A classification policy: decides which bucket a discovered unit belongs in.
///
/// Implementations append the unit to exactly one bucket of the set. Any
/// `Fn(&mut TestSet, TestInput)` closure is a classifier.
pub trait Classifier: Send + Sync {
    /// Adds `input` to one of the buckets of `test_set`.
    fn classify(&self, test_set: &mut TestSet, input: TestInput);
}

impl<F> Classifier for F
where
    F: Fn(&mut TestSet, TestInput) + Send + Sync,
{
    fn classify(&self, test_set: &mut TestSet, input: TestInput) {
        self(test_set, input)
    }
}

/// The default classification policy.
///
/// A unit matching a skip glob is skipped, otherwise a unit matching an isolate glob is isolated,
/// and everything else runs in parallel.
#[derive(Clone, Debug, Default)]
pub struct DefaultClassifier {
    skip: Vec<NameGlob>,
    isolate: Vec<NameGlob>,
}

impl DefaultClassifier {
    /// Creates a new classifier with the given skip and isolate globs.
    pub fn new(skip: Vec<NameGlob>, isolate: Vec<NameGlob>) -> Self {
        Self { skip, isolate }
    }
}

impl Classifier for DefaultClassifier {
    fn classify(&self, test_set: &mut TestSet, input: TestInput) {
        if matches_any(&self.skip, &input.name) {
            test_set.add_skip(input, SKIPPED_BY_REQUEST);
        } else if matches_any(&self.isolate, &input.name) {
            test_set.add_isolated(input);
        } else {
            test_set.add_parallel(input);
        }
    }
}
