use std::future::Future;

use stacked_errors::Result;

use crate::{RawOutput, Target};

/// One exclusively owned shell session on a single remote host.
///
/// The [ExecutionPipeline](crate::ExecutionPipeline) calls `connect` once, then
/// `run` for each command strictly in order, and `close` once at the end. None
/// of these are ever called concurrently.
pub trait RemoteShell {
    /// Opens and authenticates the session. Failing here means no command has
    /// been sent and `close` will not be called.
    fn connect(&mut self, target: &Target) -> impl Future<Output = Result<()>> + Send;

    /// Runs one command to completion and returns what it printed. A command
    /// that ran but failed is still `Ok`, only transport failures are `Err`.
    fn run(&mut self, command: &str) -> impl Future<Output = Result<RawOutput>> + Send;

    /// Tears the session down
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Something about the open session the operator should be warned of, such
    /// as a host key that was trusted without verification. Asked for once
    /// after a successful `connect`, when no indicator is drawing.
    fn connection_warning(&self) -> Option<String> {
        None
    }
}
