use core::fmt;
use std::{fmt::Debug, time::Duration};

use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use stacked_errors::{bail_locationless, Result, StackableErr};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tracing::{debug, info, warn};

use crate::{
    CommandResult, CommandScript, Completion, ProgressIndicator, RemoteShell, Target, DEFAULT_TICK,
};

/// Operator facing behavior of an [ExecutionPipeline]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Echo every command with its output, and show one transient indicator
    /// per command instead of a single one for the whole run
    pub verbose: bool,
    /// Draw progress indicators at all. Should be off when stdout is not a
    /// terminal.
    pub show_progress: bool,
    /// Colorize the error and echo prompts
    pub color: bool,
    /// Redraw interval of the progress indicators
    pub tick: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            show_progress: true,
            color: false,
            tick: DEFAULT_TICK,
        }
    }
}

impl PipelineOptions {
    /// Sets `verbose`
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets `show_progress`
    pub fn show_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Sets `color`
    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Sets `tick`
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Every command ran without writing to its error stream
    Completed,
    /// The command at this index of the sent script wrote to its error stream,
    /// nothing after it was sent
    FailedAt(usize),
}

/// The results of every command that was actually sent, in order
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub results: Vec<CommandResult>,
    pub status: RunStatus,
}

impl RunOutcome {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// The result of the command that stopped the run
    pub fn failed_command(&self) -> Option<&CommandResult> {
        match self.status {
            RunStatus::Completed => None,
            RunStatus::FailedAt(index) => self.results.get(index),
        }
    }

    /// Returns a formatted error with the failing command if the run did not
    /// complete
    pub fn assert_completed(&self) -> Result<()> {
        if let Some(failed) = self.failed_command() {
            bail_locationless!(
                "RunOutcome::assert_completed -> while executing '{}': {}",
                failed.command,
                failed.stderr
            )
        }
        Ok(())
    }
}

/// Runs a [CommandScript] over one [RemoteShell] session.
///
/// The script actually sent is `script.with_priming()`: the priming command
/// followed by the non-blank commands, and indices in the [RunOutcome] refer to
/// that script. Commands run strictly one after another, the first one with a
/// non-empty error stream ends the run, and the session is closed on every
/// path once it was opened.
///
/// Indicators, echoed commands, and error lines are written to handles
/// produced by the output function, the process stdout unless
/// [ExecutionPipeline::with_output] was used.
pub struct ExecutionPipeline<S, W = Stdout> {
    shell: S,
    options: PipelineOptions,
    output: Box<dyn Fn() -> W + Send + Sync>,
}

impl<S: Debug, W> Debug for ExecutionPipeline<S, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPipeline")
            .field("shell", &self.shell)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteShell> ExecutionPipeline<S, Stdout> {
    pub fn new(shell: S, options: PipelineOptions) -> Self {
        Self::with_output(shell, options, tokio::io::stdout)
    }
}

impl<S: RemoteShell, W: AsyncWrite + Unpin + Send + 'static> ExecutionPipeline<S, W> {
    /// Like [ExecutionPipeline::new], but operator output goes to the handles
    /// returned by `output`, which should all write to the same place
    pub fn with_output(
        shell: S,
        options: PipelineOptions,
        output: impl Fn() -> W + Send + Sync + 'static,
    ) -> Self {
        Self {
            shell,
            options,
            output: Box::new(output),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    pub fn into_shell(self) -> S {
        self.shell
    }

    /// Connects to `target`, sends the primed `script`, and disconnects.
    ///
    /// Connection failures are returned as errors before anything is sent. A
    /// command writing to its error stream is not an error of this function,
    /// it is reported as [RunStatus::FailedAt]. Failing to write operator
    /// output is an error, but the session is still closed first.
    #[tracing::instrument(skip_all, fields(target = %target, commands = script.len()))]
    pub async fn run(&mut self, target: &Target, script: CommandScript) -> Result<RunOutcome> {
        let script = script.with_priming();

        let indicator = self.indicator("Connecting", Completion::Done);
        let connected = self.shell.connect(target).await;
        let shown = finish(indicator).await;
        connected.stack_err_with_locationless(|| format!("failed to connect to {target}"))?;
        info!("connected");

        let executed = match shown {
            Ok(()) => {
                // only now that nothing redraws the terminal
                if let Some(warning) = self.shell.connection_warning() {
                    warn!("{warning}");
                }
                self.execute(&script).await
            }
            Err(e) => Err(e),
        };

        let indicator = self.indicator("Disconnecting", Completion::Done);
        let closed = self.shell.close().await;
        let hidden = finish(indicator).await;

        // an error while executing is more interesting than one while closing
        let outcome = executed?;
        closed.stack_err_with_locationless(|| format!("failed to disconnect from {target}"))?;
        hidden?;
        debug!(sent = outcome.len(), status = ?outcome.status, "disconnected");
        Ok(outcome)
    }

    async fn execute(&mut self, script: &CommandScript) -> Result<RunOutcome> {
        let verbose = self.options.verbose;
        let mut results = Vec::with_capacity(script.len());
        let mut status = RunStatus::Completed;
        let mut overall = if verbose {
            None
        } else {
            self.indicator("Executing", Completion::Done)
        };
        for (index, command) in script.iter().enumerate() {
            let per_command = if verbose {
                self.indicator(format!("Executing {command}"), Completion::Erase)
            } else {
                None
            };
            let raw = self.shell.run(command).await;
            finish(per_command).await?;
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    finish(overall.take()).await?;
                    return Err(e).stack_err_with_locationless(|| {
                        format!("ExecutionPipeline -> transport failed on command {index}")
                    })
                }
            };
            let result = CommandResult::from_raw(command.as_str(), raw);
            let failed = result.is_failure();
            if failed {
                finish(overall.take()).await?;
            }
            if verbose {
                self.echo(&result).await?;
            }
            if failed {
                self.report_error(&result).await?;
                results.push(result);
                status = RunStatus::FailedAt(index);
                break
            }
            results.push(result);
        }
        finish(overall).await?;
        Ok(RunOutcome { results, status })
    }

    fn indicator(
        &self,
        message: impl Into<String>,
        completion: Completion,
    ) -> Option<ProgressIndicator<W>> {
        self.options.show_progress.then(|| {
            ProgressIndicator::start_on((self.output)(), message, completion, self.options.tick)
        })
    }

    async fn say(&self, text: &str) -> Result<()> {
        let mut out = (self.output)();
        out.write_all(text.as_bytes())
            .await
            .stack_err_locationless("ExecutionPipeline -> failed to write output")?;
        out.flush()
            .await
            .stack_err_locationless("ExecutionPipeline -> failed to flush output")
    }

    async fn echo(&self, result: &CommandResult) -> Result<()> {
        let text = result.to_string();
        let text = if self.options.color {
            let rest = text.strip_prefix("$>").unwrap_or(&text);
            format!("{}{rest}\n", "$>".green())
        } else {
            format!("{text}\n")
        };
        self.say(&text).await
    }

    async fn report_error(&self, result: &CommandResult) -> Result<()> {
        let prefix = "ERROR:";
        let line = if self.options.color {
            format!(
                "{} while executing '{}': {}\n",
                prefix.red(),
                result.command,
                result.stderr
            )
        } else {
            format!(
                "{prefix} while executing '{}': {}\n",
                result.command, result.stderr
            )
        };
        self.say(&line).await
    }
}

/// Stops the indicator, if any, so that the next print cannot interleave with
/// it
async fn finish<W: AsyncWrite + Unpin + Send + 'static>(
    indicator: Option<ProgressIndicator<W>>,
) -> Result<()> {
    if let Some(indicator) = indicator {
        indicator.stop().await?;
    }
    Ok(())
}
