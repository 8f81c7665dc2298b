// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod artifacts;
mod basic;
mod fixtures;
