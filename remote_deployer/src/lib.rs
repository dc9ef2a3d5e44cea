//! Provisions a single remote host over ssh and drives a container deployment
//! lifecycle on it.
//!
//! A [Phase] is rendered into a [CommandScript] by a [ScriptBuilder], and an
//! [ExecutionPipeline] sends that script one command at a time over a
//! [RemoteShell] (normally an [SshSession]), stopping at the first command
//! that writes to its error stream.

mod command;
mod paths;
mod phase;
mod pipeline;
mod progress;
mod remote;
mod script;
mod ssh;
mod target;

/// Container listing and description through the docker API provided by
/// [bollard].
#[cfg(feature = "bollard")]
pub mod inspect;
pub use command::*;
pub use paths::*;
pub use phase::*;
pub use pipeline::*;
pub use progress::*;
pub use remote::*;
pub use script::*;
pub use ssh::*;
pub use target::*;
/// This reexport helps with dependency wrangling
pub use stacked_errors;
