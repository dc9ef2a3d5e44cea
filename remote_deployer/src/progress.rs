use core::fmt;
use std::{fmt::Debug, time::Duration};

use stacked_errors::{Result, StackableErr};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, Stdout},
    sync::oneshot,
    task::{self, JoinHandle},
    time::{self, MissedTickBehavior},
};
use tracing::warn;

/// The animation frames, one per tick
pub const GLYPHS: [char; 4] = ['|', '/', '-', '\\'];

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// What an indicator leaves behind once stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Completion {
    /// Leaves a "<message> - Done" line
    #[default]
    Done,
    /// Blanks the line and returns the cursor to its start, used for transient
    /// per-command indicators
    Erase,
}

/// A status line that keeps redrawing "<message> <glyph>" in place on a
/// separate task while the caller blocks on something else.
///
/// # Note
///
/// It must be stopped with [ProgressIndicator::stop] before anything else is
/// printed, otherwise the redraws interleave with that output. Dropping it
/// also makes the task exit, but without waiting for the final line.
#[must_use]
pub struct ProgressIndicator<W = Stdout> {
    message: String,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<std::io::Result<W>>>,
}

impl<W> Debug for ProgressIndicator<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressIndicator")
            .field("message", &self.message)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl<W> Drop for ProgressIndicator<W> {
    fn drop(&mut self) {
        if self.handle.is_some() && (!std::thread::panicking()) {
            warn!(
                "A `ProgressIndicator` was dropped without being stopped, the message was: {}",
                self.message
            )
        }
    }
}

impl ProgressIndicator<Stdout> {
    /// Starts an indicator on the process stdout with the default tick
    pub fn start(message: impl Into<String>, completion: Completion) -> Self {
        Self::start_on(tokio::io::stdout(), message, completion, DEFAULT_TICK)
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> ProgressIndicator<W> {
    /// Starts an indicator that redraws on `writer` every `tick`
    pub fn start_on(
        writer: W,
        message: impl Into<String>,
        completion: Completion,
        tick: Duration,
    ) -> Self {
        let message = message.into();
        let (stop, stopped) = oneshot::channel();
        let handle = task::spawn(animate(writer, message.clone(), completion, tick, stopped));
        Self {
            message,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Signals the task to finish, waits for it to write its final line, and
    /// gives the writer back
    pub async fn stop(mut self) -> Result<W> {
        if let Some(stop) = self.stop.take() {
            // the task may have already exited on a write error, which the
            // handle reports
            let _ = stop.send(());
        }
        let handle = self
            .handle
            .take()
            .stack_err_locationless("ProgressIndicator::stop -> already stopped")?;
        handle
            .await
            .stack_err_with_locationless(|| {
                format!("ProgressIndicator::stop -> task for \"{}\" panicked", self.message)
            })?
            .stack_err_with_locationless(|| {
                format!("ProgressIndicator::stop -> writing \"{}\" failed", self.message)
            })
    }
}

async fn animate<W: AsyncWrite + Unpin>(
    mut writer: W,
    message: String,
    completion: Completion,
    tick: Duration,
    mut stopped: oneshot::Receiver<()>,
) -> std::io::Result<W> {
    let mut interval = time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut frame = 0usize;
    loop {
        tokio::select! {
            // also completes if the sender was dropped
            _ = &mut stopped => break,
            _ = interval.tick() => {
                let glyph = GLYPHS[frame % GLYPHS.len()];
                writer
                    .write_all(format!("\r{message} {glyph}").as_bytes())
                    .await?;
                writer.flush().await?;
                frame = frame.wrapping_add(1);
            }
        }
    }
    let last = match completion {
        Completion::Done => format!("\r{message} - Done\n"),
        // the glyph and its separating space are cleared too
        Completion::Erase => format!("\r{}\r", " ".repeat(message.chars().count() + 2)),
    };
    writer.write_all(last.as_bytes()).await?;
    writer.flush().await?;
    Ok(writer)
}
