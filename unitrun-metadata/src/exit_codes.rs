// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `unitrun` runs.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum UnitrunExitCode {}

impl UnitrunExitCode {
    /// No errors occurred and every unit ran as expected.
    pub const OK: i32 = 0;

    /// One or more units failed unexpectedly, no units were found, discovery failed, or uploading
    /// results failed.
    pub const FAILURE: i32 = 1;

    /// The command line or configuration was invalid. The run never started.
    pub const CONFIGURATION_ERROR: i32 = 2;

    /// The run was interrupted by the user (Ctrl-C).
    pub const INTERRUPTED: i32 = 130;
}
