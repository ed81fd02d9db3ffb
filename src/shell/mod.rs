//! Background shell execution and the hand-off back to the session thread.
//!
//! - **dispatch**: single-threaded job queue with next-tick and timed jobs
//! - **command**: templated commands, remote transport wrapping, worker pool

pub mod command;
pub mod dispatch;

pub use command::{
    CommandBuilder, CommandError, CommandFailure, CommandHandle, CommandResult, CommandRunner,
    CommandSpec, render_template, wrap_remote,
};
pub use dispatch::{DispatchHandle, Dispatcher, Job, WorkToken};
