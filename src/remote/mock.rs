// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Scripted [`RemoteExecutor`] for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{RemoteExecutor, RemoteTarget, RemoteTask};
use crate::errors::Result;

/// One call seen by [`MockExecutor`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub target: RemoteTarget,
    pub task: RemoteTask,
    pub elevate: bool,
}

impl RecordedCall {
    /// Shell command text, or an empty string for playbooks.
    pub fn command(&self) -> &str {
        match &self.task {
            RemoteTask::Shell(command) => command,
            RemoteTask::Playbook { .. } => "",
        }
    }
}

/// Replays queued responses in order and records every call.
///
/// Once the queue is empty every further call succeeds with empty output.
#[derive(Default)]
pub struct MockExecutor {
    responses: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next unanswered call.
    pub fn respond(self, response: Result<String>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn run(&self, target: &RemoteTarget, task: &RemoteTask, elevate: bool) -> Result<String> {
        self.calls.lock().unwrap().push(RecordedCall {
            target: target.clone(),
            task: task.clone(),
            elevate,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}
