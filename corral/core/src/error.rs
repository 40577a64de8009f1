// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Corral error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result,
};

/// Result type alias for Corral operations.
pub type Result<T> = result::Result<T, CorralError>;

/// Corral error types for cluster task scheduling.
#[derive(Debug)]
pub enum CorralError {
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// Configuration error with invalid settings.
    Configuration(String),
    /// A non-zombie attempt already exists for the stage: (stage_id, existing_attempt, rejected_attempt).
    DuplicateTaskSetAttempt(usize, usize, usize),
    /// A task payload could not be serialized: (task_index, message).
    TaskSerialization(usize, String),
    /// The referenced task set is not registered with the scheduler: (stage_id, stage_attempt_id).
    UnknownTaskSet(usize, usize),
    /// I/O error, e.g. while building a runtime.
    IoError(io::Error),
}

impl From<String> for CorralError {
    fn from(e: String) -> Self {
        CorralError::General(e)
    }
}

impl From<io::Error> for CorralError {
    fn from(e: io::Error) -> Self {
        CorralError::IoError(e)
    }
}

impl Display for CorralError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CorralError::General(desc) => write!(f, "General error: {desc}"),
            CorralError::Internal(desc) => {
                write!(f, "Internal Corral error: {desc}")
            }
            CorralError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            CorralError::DuplicateTaskSetAttempt(stage_id, existing, rejected) => {
                write!(
                    f,
                    "More than one active task set for stage {stage_id}: \
                attempt {existing} is still active while submitting attempt {rejected}"
                )
            }
            CorralError::TaskSerialization(index, desc) => {
                write!(f, "Failed to serialize task {index}: {desc}")
            }
            CorralError::UnknownTaskSet(stage_id, attempt) => {
                write!(f, "Task set {stage_id}.{attempt} is not registered")
            }
            CorralError::IoError(desc) => write!(f, "IO error: {desc}"),
        }
    }
}

impl Error for CorralError {}
