//! Orchestrates a run: wrap the task, ask the model, park the generated
//! script in the artifact slot, and execute it once the handoff completes.

use std::io;
use std::path::Path;
use std::process::Command;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{error, info};

use crate::artifact::ArtifactSlot;
use crate::openai::{CompletionError, GptModel};
use crate::prompts;
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("API Key hasn't been set. Set it with `aicmd config set api_key <key>`.")]
    MissingApiKey,
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("the model returned an empty script")]
    EmptyScript,
    #[error("failed to store the generated script: {0}")]
    Store(#[source] io::Error),
}

pub struct InvokeOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Seam between the orchestrator and whatever executes the stored script.
pub trait CommandInvoker {
    fn invoke(&self, script: &Path) -> io::Result<InvokeOutput>;
}

/// Runs the stored script with `sh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellInvoker;

impl CommandInvoker for ShellInvoker {
    fn invoke(&self, script: &Path) -> io::Result<InvokeOutput> {
        let output = Command::new("sh").arg(script).output()?;
        Ok(InvokeOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExecOutcome {
    Success { stdout: String },
    Failed { detail: String },
}

#[derive(Clone)]
pub struct Runner<I: CommandInvoker> {
    model: GptModel,
    slot: ArtifactSlot,
    invoker: I,
}

impl<I: CommandInvoker> Runner<I> {
    pub fn new(model: GptModel, slot: ArtifactSlot, invoker: I) -> Self {
        Self {
            model,
            slot,
            invoker,
        }
    }

    pub fn slot(&self) -> &ArtifactSlot {
        &self.slot
    }

    /// Generates a script for `task` and parks it in the slot. Returns the
    /// stored script text. The run is rejected up front when no API key is
    /// configured, before any request goes out.
    pub async fn run(&self, task: &str, settings: &Settings) -> Result<String, RunError> {
        if !settings.api_key_set() {
            return Err(RunError::MissingApiKey);
        }
        let code = self
            .model
            .complete(&prompts::wrap_task(task), settings)
            .await?;
        self.stage(&code)
    }

    /// Slot side of a run: strip markdown fences if the model added any,
    /// then store the script.
    fn stage(&self, code: &str) -> Result<String, RunError> {
        if code.trim().is_empty() {
            return Err(RunError::EmptyScript);
        }
        let code_blocks = extract_code_blocks(code);
        let script = if code_blocks.is_empty() {
            // the model probably obeyed the instructions
            code.to_string()
        } else {
            code_blocks.join("\n")
        };
        self.slot.store(&script).map_err(RunError::Store)?;
        info!(path = %self.slot.path().display(), "generated script stored");
        Ok(script)
    }

    /// Handshake with the host: the pending script is ready to execute.
    /// The slot is cleared whether or not the invocation succeeds, so a later
    /// unrelated handshake cannot re-trigger it. With nothing pending this is
    /// a no-op.
    pub fn reload_complete(&self) -> Option<ExecOutcome> {
        if !self.slot.pending() {
            return None;
        }
        let result = self.invoker.invoke(self.slot.path());
        self.slot.clear();
        Some(match result {
            Ok(output) if output.success => ExecOutcome::Success {
                stdout: output.stdout,
            },
            Ok(output) => {
                error!("generated script failed: {}", output.stderr);
                ExecOutcome::Failed {
                    detail: output.stderr,
                }
            }
            Err(err) => {
                error!("failed to execute the generated script: {err}");
                ExecOutcome::Failed {
                    detail: err.to_string(),
                }
            }
        })
    }
}

pub(crate) fn extract_code_blocks(text: &str) -> Vec<String> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"(?s)```(?:\w+)?\n(.*?)\n```")
            .expect("The regex expression should be valid");
    }

    let mut code_blocks = Vec::new();
    for capture in RE.captures_iter(text) {
        if let Some(code_block) = capture.get(1) {
            code_blocks.push(code_block.as_str().to_string());
        }
    }
    code_blocks
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::path::Path;

    use super::{extract_code_blocks, CommandInvoker, ExecOutcome, InvokeOutput, RunError, Runner};
    use crate::artifact::ArtifactSlot;
    use crate::openai::GptModel;
    use crate::settings::Settings;

    /// Records the script content at invocation time and returns a canned
    /// result.
    struct RecordingInvoker {
        succeed: bool,
        invoked_scripts: RefCell<Vec<String>>,
    }

    impl RecordingInvoker {
        fn succeeding() -> Self {
            Self {
                succeed: true,
                invoked_scripts: RefCell::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                succeed: false,
                invoked_scripts: RefCell::new(Vec::new()),
            }
        }
    }

    impl CommandInvoker for RecordingInvoker {
        fn invoke(&self, script: &Path) -> io::Result<InvokeOutput> {
            let content = std::fs::read_to_string(script)?;
            self.invoked_scripts.borrow_mut().push(content);
            Ok(InvokeOutput {
                success: self.succeed,
                stdout: "ok".to_string(),
                stderr: if self.succeed {
                    String::new()
                } else {
                    "boom".to_string()
                },
            })
        }
    }

    fn runner_in_tempdir(
        invoker: RecordingInvoker,
    ) -> (tempfile::TempDir, Runner<RecordingInvoker>) {
        let dir = tempfile::tempdir().unwrap();
        let slot = ArtifactSlot::at(dir.path().join("aicmd_pending.sh"));
        (dir, Runner::new(GptModel::Gpt35Turbo, slot, invoker))
    }

    #[test]
    fn staged_script_is_invoked_and_the_slot_cleared() {
        let (_dir, runner) = runner_in_tempdir(RecordingInvoker::succeeding());
        runner.stage("for i in $(seq 100); do touch \"cube_$i\"; done").unwrap();
        assert!(runner.slot().pending());

        let outcome = runner.reload_complete().unwrap();
        assert_eq!(
            outcome,
            ExecOutcome::Success {
                stdout: "ok".to_string()
            }
        );
        assert!(!runner.slot().pending());
    }

    #[test]
    fn slot_is_cleared_even_when_invocation_fails() {
        let (_dir, runner) = runner_in_tempdir(RecordingInvoker::failing());
        runner.stage("exit 1").unwrap();

        let outcome = runner.reload_complete().unwrap();
        assert_eq!(
            outcome,
            ExecOutcome::Failed {
                detail: "boom".to_string()
            }
        );
        assert!(!runner.slot().pending());
    }

    #[test]
    fn handshake_with_an_empty_slot_is_a_noop() {
        let (_dir, runner) = runner_in_tempdir(RecordingInvoker::succeeding());
        assert!(runner.reload_complete().is_none());
        assert!(runner.invoker.invoked_scripts.borrow().is_empty());
    }

    #[test]
    fn second_stage_overwrites_and_only_the_second_script_runs() {
        let (_dir, runner) = runner_in_tempdir(RecordingInvoker::succeeding());
        runner.stage("echo first").unwrap();
        runner.stage("echo second").unwrap();

        runner.reload_complete().unwrap();
        assert_eq!(
            *runner.invoker.invoked_scripts.borrow(),
            vec!["echo second".to_string()]
        );
        assert!(!runner.slot().pending());
    }

    #[test]
    fn whitespace_only_completion_is_rejected_before_the_slot() {
        let (_dir, runner) = runner_in_tempdir(RecordingInvoker::succeeding());
        assert!(matches!(
            runner.stage("  \n\t"),
            Err(RunError::EmptyScript)
        ));
        assert!(!runner.slot().pending());
    }

    #[test]
    fn fenced_completion_is_stripped_before_storing() {
        let (_dir, runner) = runner_in_tempdir(RecordingInvoker::succeeding());
        let stored = runner
            .stage("Here you go:\n```sh\necho hello\n```\n")
            .unwrap();
        assert_eq!(stored, "echo hello");
        assert_eq!(runner.slot().read().unwrap(), "echo hello");
    }

    #[tokio::test]
    async fn run_without_an_api_key_is_rejected_before_any_request() {
        let (_dir, runner) = runner_in_tempdir(RecordingInvoker::succeeding());
        let settings = Settings::default();
        assert!(matches!(
            runner.run("Create 100 cubes at random points.", &settings).await,
            Err(RunError::MissingApiKey)
        ));
        assert!(!runner.slot().pending());
    }

    #[test]
    fn code_blocks_regex() {
        let code_rust = "fn main() {
    println!(\"Hello, World!\");
}";
        let code_no_tag = "
Hello my friend";

        let code_python = "
print('Hello, World!')



        ";
        let text = format!(
            "
Some text before the code block
```rust
{code_rust}
```



```
{code_no_tag}
```
Some text after the code block
```python
{code_python}
```
    "
        );
        let blocks = extract_code_blocks(&text);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], code_rust);
        assert_eq!(blocks[1], code_no_tag);
        assert_eq!(blocks[2], code_python);
    }
}
