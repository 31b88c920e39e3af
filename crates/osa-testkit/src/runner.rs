//! Scripted container runner: replays queued outputs, records invocations.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use osa_pipeline::runner::{ContainerRunner, ContainerSpec, RunnerInputs, RunnerOutput};

enum Scripted {
    Output(RunnerOutput),
    Failure(String),
}

#[derive(Default)]
pub struct ScriptedSourceRunner {
    script: Mutex<VecDeque<Scripted>>,
    invocations: Mutex<Vec<RunnerInputs>>,
}

impl ScriptedSourceRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next invocation's output.
    pub fn push_output(&self, output: RunnerOutput) {
        self.script
            .lock()
            .expect("lock")
            .push_back(Scripted::Output(output));
    }

    /// Queue a failure for the next invocation.
    pub fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .expect("lock")
            .push_back(Scripted::Failure(message.to_string()));
    }

    pub fn invocations(&self) -> Vec<RunnerInputs> {
        self.invocations.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ContainerRunner for ScriptedSourceRunner {
    async fn run(
        &self,
        _spec: &ContainerSpec,
        inputs: &RunnerInputs,
        _files_dir: &Path,
        _work_dir: &Path,
    ) -> Result<RunnerOutput> {
        self.invocations.lock().expect("lock").push(inputs.clone());
        match self.script.lock().expect("lock").pop_front() {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Failure(message)) => Err(anyhow!("{message}")),
            // Script exhausted: behave like a source with nothing new.
            None => Ok(RunnerOutput::default()),
        }
    }
}
