// Copyright 2025 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types
//!
//! Most invalid operations in this crate are not errors at all: operations
//! against stale entity handles are skipped and counted (see
//! [`Diagnostics`](crate::diagnostics::Diagnostics)), and misconfiguration
//! of the type space is fatal. `EcsError` covers the remaining fallible
//! surface: system lookup, system bodies, and the snapshot protocol.

use std::fmt;

/// ECS error type
#[derive(Debug, Clone)]
pub enum EcsError {
    /// No registered system with the given id
    SystemNotFound,

    /// A system body reported a failure
    SystemError(String),

    /// Snapshotting refused because a component type owns heap data
    SnapshotUnsupportedType(&'static str),

    /// Snapshot does not match this world's registered types
    SnapshotMismatch(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::SystemNotFound => write!(f, "System not found"),
            EcsError::SystemError(msg) => write!(f, "System error: {msg}"),
            EcsError::SnapshotUnsupportedType(name) => {
                write!(f, "Snapshot unsupported for component type {name} (non-trivial drop)")
            }
            EcsError::SnapshotMismatch(msg) => write!(f, "Snapshot mismatch: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
