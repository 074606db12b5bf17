//! Shared code buffer with run, export and last-writer-wins sync.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skillroom_core::code::{CodeUpdate, Language};
use skillroom_core::ParticipantId;

use crate::error::RunError;
use crate::runner::CodeRunner;

/// Characters of the buffer quoted in a help prompt.
const HELP_EXCERPT_CHARS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Compiling,
    Succeeded,
    Failed,
}

/// Outcome of the latest run. Replaced on every run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileResult {
    pub output: String,
    pub error: String,
    pub elapsed: Duration,
}

impl CompileResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_empty()
    }
}

/// A buffer export ready to be written out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeExport {
    pub file_name: String,
    pub contents: String,
}

pub struct CodeTool {
    author: ParticipantId,
    text: String,
    language: Language,
    revision: u64,
    last_author: ParticipantId,
    state: RunState,
    result: Option<CompileResult>,
    runner: Arc<dyn CodeRunner>,
    run_timeout: Duration,
}

impl CodeTool {
    /// `run_timeout` bounds each run, including the runner's own delay.
    pub fn new(author: ParticipantId, runner: Arc<dyn CodeRunner>, run_timeout: Duration) -> Self {
        Self {
            last_author: author.clone(),
            author,
            text: String::new(),
            language: Language::default(),
            revision: 0,
            state: RunState::Idle,
            result: None,
            runner,
            run_timeout,
        }
    }

    pub fn set_author(&mut self, author: ParticipantId) {
        self.author = author;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn result(&self) -> Option<&CompileResult> {
        self.result.as_ref()
    }

    fn settle(&mut self) {
        if matches!(self.state, RunState::Succeeded | RunState::Failed) {
            self.state = RunState::Idle;
        }
    }

    fn stamp(&mut self) -> CodeUpdate {
        self.revision += 1;
        self.last_author = self.author.clone();
        CodeUpdate {
            text: self.text.clone(),
            language: self.language.clone(),
            revision: self.revision,
            author: self.author.clone(),
        }
    }

    /// Replace the buffer. Returns the update to replicate.
    pub fn edit(&mut self, text: impl Into<String>) -> CodeUpdate {
        self.settle();
        self.text = text.into();
        self.stamp()
    }

    pub fn set_language(&mut self, tag: &str) -> CodeUpdate {
        self.settle();
        self.language = Language::from_tag(tag);
        self.stamp()
    }

    /// Accept a remote buffer if it is newer than ours.
    pub fn apply_remote(&mut self, update: CodeUpdate) -> bool {
        if !update.supersedes(self.revision, &self.last_author) {
            debug!(revision = update.revision, local = self.revision, "stale code update ignored");
            return false;
        }
        self.settle();
        self.text = update.text;
        self.language = update.language;
        self.revision = update.revision;
        self.last_author = update.author;
        true
    }

    /// Execute the buffer. Always ends in `Succeeded` or `Failed`.
    pub async fn run(&mut self, cancel: &CancellationToken) -> &CompileResult {
        self.settle();
        self.state = RunState::Compiling;
        let started = Instant::now();

        let runner = Arc::clone(&self.runner);
        let code = self.text.clone();
        let language = self.language.clone();
        let mut task = tokio::spawn(async move { runner.run(&code, &language).await });

        let outcome = tokio::select! {
            joined = tokio::time::timeout(self.run_timeout, &mut task) => match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => Err(RunError::Crashed(e.to_string())),
                Err(_) => Err(RunError::Timeout(self.run_timeout)),
            },
            () = cancel.cancelled() => Err(RunError::Cancelled),
        };
        task.abort();

        let elapsed = started.elapsed();
        let result = match outcome {
            Ok(output) => {
                self.state = RunState::Succeeded;
                info!(language = %self.language, elapsed_ms = elapsed.as_millis() as u64, "run succeeded");
                CompileResult {
                    output,
                    error: String::new(),
                    elapsed,
                }
            }
            Err(e) => {
                self.state = RunState::Failed;
                warn!(language = %self.language, error = %e, "run failed");
                CompileResult {
                    output: String::new(),
                    error: e.to_string(),
                    elapsed,
                }
            }
        };
        self.result.insert(result)
    }

    /// Export as `code.<ext>`.
    pub fn save(&self) -> CodeExport {
        CodeExport {
            file_name: format!("code.{}", self.language.extension()),
            contents: self.text.clone(),
        }
    }

    pub fn save_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let export = self.save();
        let path = dir.join(&export.file_name);
        std::fs::write(&path, export.contents)?;
        Ok(path)
    }

    /// Question asking the assistant about the current buffer.
    pub fn help_prompt(&self) -> String {
        if self.text.trim().is_empty() {
            return format!("I need help with {} programming.", self.language);
        }
        let excerpt: String = self.text.chars().take(HELP_EXCERPT_CHARS).collect();
        let ellipsis = if self.text.chars().count() > HELP_EXCERPT_CHARS {
            "..."
        } else {
            ""
        };
        format!(
            "I need help understanding this {} code:\n\n{excerpt}{ellipsis}",
            self.language
        )
    }
}
