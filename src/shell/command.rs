//! Asynchronous shell command execution.
//!
//! Commands are rendered from a template, optionally wrapped in the remote
//! transport (`ssh host '<command>'`), and run through `sh -c` on a bounded
//! worker pool. The outcome is handed back to the dispatcher thread exactly
//! once, as either the success or the error continuation.
//!
//! # Example
//!
//! ```rust,ignore
//! runner
//!     .command("stat -c %Y {0}", ["/home/me/file.rs"])
//!     .remote("me@devbox")
//!     .on_success(|session, result| { /* runs on the dispatcher thread */ })
//!     .execute();
//! ```

use std::collections::BTreeSet;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

use super::dispatch::DispatchHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Template references argument {index} but only {available} were given")]
    MissingArgument { index: usize, available: usize },

    #[error("Unbalanced brace at byte {0} of template")]
    UnbalancedBrace(usize),

    #[error("Invalid placeholder `{{{0}}}`")]
    BadPlaceholder(String),

    #[error("Failed to start worker pool: {0}")]
    Pool(String),
}

/// A command that finished outside the expected exit codes or wrote to stderr.
#[derive(Error, Debug, Clone)]
#[error("Shell command `{command_line}` failed with exit code {exit_code}: {stderr}")]
pub struct CommandFailure {
    pub command_line: String,
    pub exit_code: i32,
    pub stderr: String,
}

/// Everything needed to run one command. Consumed by execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub template: String,
    pub positional_args: Vec<String>,
    pub remote_host: Option<String>,
    pub expected_exit_codes: BTreeSet<i32>,
}

impl CommandSpec {
    pub fn new<I, S>(template: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            template: template.into(),
            positional_args: args.into_iter().map(Into::into).collect(),
            remote_host: None,
            expected_exit_codes: BTreeSet::from([0]),
        }
    }

    /// The literal line handed to `sh -c`.
    pub fn command_line(&self, transport: &str) -> Result<String, CommandError> {
        let rendered = render_template(&self.template, &self.positional_args)?;
        Ok(match self.remote_host.as_deref() {
            Some(host) => wrap_remote(transport, host, &rendered),
            None => rendered,
        })
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Success requires a whitelisted exit code and an empty stderr.
    pub fn succeeded(&self, expected: &BTreeSet<i32>) -> bool {
        expected.contains(&self.exit_code) && self.stderr.is_empty()
    }
}

/// Substitute positional arguments into `{}`/`{N}` placeholders.
///
/// `{{` and `}}` produce literal braces. Arguments are inserted verbatim.
pub fn render_template(template: &str, args: &[String]) -> Result<String, CommandError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    let mut auto_index = 0;

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(CommandError::UnbalancedBrace(pos)),
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(CommandError::UnbalancedBrace(pos));
                }
                let index = if name.is_empty() {
                    auto_index += 1;
                    auto_index - 1
                } else {
                    name.parse::<usize>()
                        .map_err(|_| CommandError::BadPlaceholder(name.clone()))?
                };
                let arg = args.get(index).ok_or(CommandError::MissingArgument {
                    index,
                    available: args.len(),
                })?;
                out.push_str(arg);
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// `<transport> <host> '<command>'`, keeping the inner command single-quoted.
pub fn wrap_remote(transport: &str, host: &str, command: &str) -> String {
    format!("{transport} {host} '{}'", command.replace('\'', r"'\''"))
}

/// Run a finished command line through the shell and capture its output.
fn run_shell(command_line: &str) -> CommandResult {
    match Command::new("sh").arg("-c").arg(command_line).output() {
        Ok(output) => CommandResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        },
        Err(e) => CommandResult {
            stdout: Vec::new(),
            stderr: format!("Failed to execute sh: {e}").into_bytes(),
            exit_code: -1,
        },
    }
}

type Continuation<C> = Box<dyn FnOnce(&mut C, CommandResult) + Send + 'static>;

/// Handle to a submitted command.
#[derive(Debug, Clone)]
pub struct CommandHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl CommandHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Skip the command if it has not started and suppress its continuations.
    /// A process that is already running is left to finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Runs commands on a worker pool and reports back through a dispatcher.
pub struct CommandRunner<C> {
    pool: Arc<ThreadPool>,
    dispatch: DispatchHandle<C>,
    transport: Arc<str>,
    next_id: Arc<AtomicU64>,
}

impl<C> Clone for CommandRunner<C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            dispatch: self.dispatch.clone(),
            transport: Arc::clone(&self.transport),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<C: 'static> CommandRunner<C> {
    pub fn new(
        dispatch: DispatchHandle<C>,
        transport: &str,
        workers: usize,
    ) -> Result<Self, CommandError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("remotion-cmd-{i}"))
            .build()
            .map_err(|e| CommandError::Pool(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
            dispatch,
            transport: Arc::from(transport),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Start building a command from a template and its positional arguments.
    pub fn command<I, S>(&self, template: impl Into<String>, args: I) -> CommandBuilder<C>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandBuilder {
            runner: self.clone(),
            spec: CommandSpec::new(template, args),
            on_success: None,
            on_error: None,
        }
    }

    fn submit(
        &self,
        spec: CommandSpec,
        on_success: Option<Continuation<C>>,
        on_error: Option<Continuation<C>>,
    ) -> CommandHandle {
        let handle = CommandHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        let token = self.dispatch.begin_work();
        let dispatch = self.dispatch.clone();
        let transport = Arc::clone(&self.transport);
        let worker_handle = handle.clone();

        self.pool.spawn(move || {
            let id = worker_handle.id();
            if worker_handle.is_cancelled() {
                tracing::debug!(command_id = id, "command cancelled before start");
                drop(token);
                return;
            }

            let (command_line, result) = match spec.command_line(&transport) {
                Ok(line) => {
                    tracing::debug!(command_id = id, command = %line, "running shell command");
                    let result = run_shell(&line);
                    (line, result)
                }
                Err(e) => (
                    spec.template.clone(),
                    CommandResult {
                        stdout: Vec::new(),
                        stderr: e.to_string().into_bytes(),
                        exit_code: -1,
                    },
                ),
            };

            dispatch.post(move |ctx: &mut C| {
                let _token = token;
                if worker_handle.is_cancelled() {
                    tracing::debug!(command_id = id, "command cancelled, dropping result");
                    return;
                }
                if result.succeeded(&spec.expected_exit_codes) {
                    if let Some(callback) = on_success {
                        callback(ctx, result);
                    }
                } else if let Some(callback) = on_error {
                    callback(ctx, result);
                } else {
                    let failure = CommandFailure {
                        command_line,
                        exit_code: result.exit_code,
                        stderr: result.stderr_text(),
                    };
                    tracing::warn!(
                        command_id = id,
                        command = %failure.command_line,
                        exit_code = failure.exit_code,
                        stderr = %failure.stderr,
                        "shell command failed"
                    );
                }
            });
        });

        handle
    }
}

/// Builder for one command. All configuration happens before [`execute`].
///
/// [`execute`]: CommandBuilder::execute
pub struct CommandBuilder<C> {
    runner: CommandRunner<C>,
    spec: CommandSpec,
    on_success: Option<Continuation<C>>,
    on_error: Option<Continuation<C>>,
}

impl<C: 'static> CommandBuilder<C> {
    pub fn on_success(mut self, f: impl FnOnce(&mut C, CommandResult) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&mut C, CommandResult) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn expected_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.spec.expected_exit_codes = codes.into_iter().collect();
        self
    }

    /// Run on `host` through the transport. `None` or an empty host runs locally.
    pub fn remote<'a>(mut self, host: impl Into<Option<&'a str>>) -> Self {
        self.spec.remote_host = host
            .into()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        self
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Hand the command to the worker pool.
    pub fn execute(self) -> CommandHandle {
        self.runner.submit(self.spec, self.on_success, self.on_error)
    }
}
