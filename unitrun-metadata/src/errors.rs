// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// Two unit names can't both be placed in the `tests` tree of a
/// [`FullResults`](crate::FullResults) document because one is a prefix of the other.
///
/// For example, `pkg.a` and `pkg.a.b` would need `pkg.a` to be both a result and a directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameConflictError {
    name: String,
    conflicts_with: String,
}

impl NameConflictError {
    /// Creates a new error for `name`, which collides with `conflicts_with`.
    pub fn new(name: impl Into<String>, conflicts_with: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conflicts_with: conflicts_with.into(),
        }
    }

    /// Returns the name that could not be placed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name it collides with.
    pub fn conflicts_with(&self) -> &str {
        &self.conflicts_with
    }
}

impl fmt::Display for NameConflictError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unit names `{}` and `{}` conflict: one is a prefix of the other",
            self.name, self.conflicts_with
        )
    }
}

impl error::Error for NameConflictError {}
