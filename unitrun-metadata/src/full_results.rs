// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{NameConflictError, UnitrunExitCode};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The version of the full-results format written by this crate.
pub const FULL_RESULTS_VERSION: u32 = 3;

/// The delimiter between segments of a unit name.
pub const PATH_DELIMITER: &str = ".";

/// The serialized summary of an entire run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FullResults {
    /// The format version. Always [`FULL_RESULTS_VERSION`] for documents written by unitrun.
    pub version: u32,

    /// Whether the run was interrupted before completing.
    pub interrupted: bool,

    /// The delimiter used to split unit names into the nested [`tests`](Self::tests) tree.
    pub path_delimiter: String,

    /// The wall-clock time at which the document was assembled.
    pub seconds_since_epoch: u64,

    /// The number of units whose final status is each [`FullResultsStatus`].
    pub num_failures_by_type: IndexMap<FullResultsStatus, usize>,

    /// User-supplied `key=value` metadata.
    #[serde(default)]
    pub metadata: IndexMap<String, String>,

    /// Per-unit results, nested by path-delimited name segments.
    pub tests: IndexMap<String, TestTrieNode>,
}

impl FullResults {
    /// Creates an empty document with no units.
    pub fn new(seconds_since_epoch: u64, metadata: IndexMap<String, String>) -> Self {
        let mut num_failures_by_type = IndexMap::new();
        for status in FullResultsStatus::ALL {
            num_failures_by_type.insert(*status, 0);
        }
        Self {
            version: FULL_RESULTS_VERSION,
            interrupted: false,
            path_delimiter: PATH_DELIMITER.to_owned(),
            seconds_since_epoch,
            num_failures_by_type,
            metadata,
            tests: IndexMap::new(),
        }
    }

    /// Returns the number of units recorded with the given final status.
    pub fn count(&self, status: FullResultsStatus) -> usize {
        self.num_failures_by_type
            .get(&status)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of units that failed after all retries.
    pub fn num_failures(&self) -> usize {
        self.count(FullResultsStatus::Fail)
    }

    /// Returns the process exit code implied by this document.
    ///
    /// This is [`UnitrunExitCode::OK`] if and only if no unit failed.
    pub fn exit_code(&self) -> i32 {
        if self.num_failures() == 0 {
            UnitrunExitCode::OK
        } else {
            UnitrunExitCode::FAILURE
        }
    }

    /// Inserts a leaf for the given unit name, creating intermediate nodes as required.
    ///
    /// Inserting the same name twice replaces the earlier leaf. Returns an error, leaving the
    /// tree unchanged, if the name is a prefix of an existing name or the other way around.
    pub fn insert_leaf(&mut self, name: &str, leaf: TestLeaf) -> Result<(), NameConflictError> {
        let delimiter = self.path_delimiter.as_str();
        let mut segments = name.split(delimiter).peekable();
        let mut trie = &mut self.tests;
        let mut end = 0;
        while let Some(segment) = segments.next() {
            end += segment.len();
            if segments.peek().is_none() {
                if let Some(TestTrieNode::Dir(children)) = trie.get(segment) {
                    let below = first_leaf_name(name, delimiter, children);
                    return Err(NameConflictError::new(name, below));
                }
                trie.insert(segment.to_owned(), TestTrieNode::Leaf(leaf));
                return Ok(());
            }
            let node = trie
                .entry(segment.to_owned())
                .or_insert_with(|| TestTrieNode::Dir(IndexMap::new()));
            trie = match node {
                TestTrieNode::Dir(children) => children,
                TestTrieNode::Leaf(_) => {
                    return Err(NameConflictError::new(name, &name[..end]));
                }
            };
            end += delimiter.len();
        }
        Ok(())
    }

    /// Looks up the leaf for the given unit name.
    pub fn leaf(&self, name: &str) -> Option<&TestLeaf> {
        let mut segments = name.split(self.path_delimiter.as_str()).peekable();
        let mut trie = &self.tests;
        while let Some(segment) = segments.next() {
            match (trie.get(segment)?, segments.peek()) {
                (TestTrieNode::Leaf(leaf), None) => return Some(leaf),
                (TestTrieNode::Dir(children), Some(_)) => trie = children,
                _ => return None,
            }
        }
        None
    }
}

fn first_leaf_name(
    prefix: &str,
    delimiter: &str,
    mut children: &IndexMap<String, TestTrieNode>,
) -> String {
    let mut name = prefix.to_owned();
    while let Some((segment, node)) = children.first() {
        name.push_str(delimiter);
        name.push_str(segment);
        match node {
            TestTrieNode::Leaf(_) => break,
            TestTrieNode::Dir(next) => children = next,
        }
    }
    name
}

/// A node in the nested `tests` tree of a [`FullResults`] document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestTrieNode {
    /// The result for a single unit.
    Leaf(TestLeaf),

    /// A name segment with further children.
    Dir(IndexMap<String, TestTrieNode>),
}

/// The recorded result for a single unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestLeaf {
    /// The expected status.
    pub expected: String,

    /// The actual statuses, space-separated, one per attempt.
    pub actual: String,

    /// True if the final actual status was not expected.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_unexpected: bool,

    /// The time taken by the last attempt, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,

    /// The time taken by each attempt, in seconds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub times: Vec<f64>,
}

/// A status recorded in the full-results document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum FullResultsStatus {
    /// The unit failed.
    #[serde(rename = "FAIL")]
    Fail,

    /// The unit passed.
    #[serde(rename = "PASS")]
    Pass,

    /// The unit was skipped.
    #[serde(rename = "SKIP")]
    Skip,
}

impl FullResultsStatus {
    /// All statuses, in the order they are written to `num_failures_by_type`.
    pub const ALL: &'static [Self] = &[Self::Fail, Self::Pass, Self::Skip];

    /// Returns the string form of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "FAIL",
            Self::Pass => "PASS",
            Self::Skip => "SKIP",
        }
    }
}

impl fmt::Display for FullResultsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
