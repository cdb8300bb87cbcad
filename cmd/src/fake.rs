//! A scripted [`Executor`] for tests: records every command and replays
//! canned outputs per program name.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Command, CommandError, CommandOutput, Executor};

#[derive(Debug, Default)]
pub struct FakeExecutor {
    calls: Mutex<Vec<Command>>,
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for the next call of `program`. The last queued output
    /// keeps being returned once the queue drains to it; programs with
    /// nothing queued succeed with empty output.
    pub fn respond(&self, program: &str, output: CommandOutput) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .entry(program.to_owned())
            .or_default()
            .push_back(output);
        self
    }

    pub fn respond_stdout(&self, program: &str, stdout: &str) -> &Self {
        self.respond(program, CommandOutput::with_stdout(stdout))
    }

    pub fn calls(&self) -> Vec<Command> {
        self.calls.lock().unwrap().clone()
    }

    /// Every recorded command, rendered as a command line.
    pub fn call_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.get_program().to_string_lossy().into_owned())
            .collect()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn output(&self, command: &Command) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(command.clone());

        let program = command.get_program().to_string_lossy().into_owned();
        let mut responses = self.responses.lock().unwrap();
        let output = match responses.get_mut(&program) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(output.unwrap_or_else(|| CommandOutput::with_stdout("")))
    }
}
