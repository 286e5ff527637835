//! Restricted code execution for rag-agent.
//!
//! Executed code runs on an embedded Python interpreter (RustPython). Every
//! run gets a fresh interpreter whose namespace only resolves a curated set
//! of built-ins, whose imports go through a guard that admits allow-listed
//! modules, and whose `print` writes to a buffer private to the run.
//!
//! ```
//! let out = agent_sandbox::execute_safe_code("print(2 + 2)");
//! assert_eq!(out, "4\n");
//! ```

pub mod error;
pub mod guard;
mod runtime;

pub use error::SandboxError;
pub use runtime::{Capabilities, ALLOWED_MODULES, OPTIONAL_MODULES};

use tracing::{debug, warn};

/// Prefix of every string `execute` returns for a failed run.
pub const ERROR_PREFIX: &str = "Error executing code: ";

/// Default cap on printed output per run, in characters.
pub const DEFAULT_MAX_OUTPUT: usize = 64 * 1024 * 1024;

/// Resource limits applied to each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum depth of nested Python calls.
    pub recursion_limit: usize,
    /// Characters `print` may write before the run is stopped.
    pub max_output: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }
}

/// Outcome of one run: everything printed, and the error that ended the run
/// early, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub output: String,
    pub error: Option<SandboxError>,
}

impl Execution {
    fn failed(error: SandboxError) -> Self {
        Self {
            output: String::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A configured sandbox. Holds no state between runs.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: Limits,
    include_partial_output: bool,
}

impl Sandbox {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            include_partial_output: false,
        }
    }

    /// Keep output printed before a failure in front of the error line.
    pub fn with_partial_output(mut self, include: bool) -> Self {
        self.include_partial_output = include;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Run `code` in a fresh interpreter on a dedicated thread.
    pub fn run(&self, code: &str) -> Execution {
        if let Err(error) = guard::check(code) {
            return Execution::failed(error);
        }
        let limits = self.limits;
        let code = code.to_owned();
        match runtime::on_interpreter_thread(move || runtime::run(&code, &limits)) {
            Ok(execution) => execution,
            Err(error) => {
                warn!(%error, "interpreter thread failed");
                Execution::failed(error)
            }
        }
    }

    /// Run `code` and render the outcome as the string handed back to the
    /// agent. Never fails.
    pub fn execute(&self, code: &str) -> String {
        let execution = self.run(code);
        match execution.error {
            None => {
                debug!(bytes = execution.output.len(), "code executed");
                execution.output
            }
            Some(error) => {
                debug!(kind = error.kind().unwrap_or("interpreter"), "code raised: {}", error);
                let line = format!("{}{}", ERROR_PREFIX, error);
                if self.include_partial_output {
                    execution.output + &line
                } else {
                    line
                }
            }
        }
    }
}

/// Run `code` with default limits, returning captured output or an error
/// string starting with [`ERROR_PREFIX`].
pub fn execute_safe_code(code: &str) -> String {
    Sandbox::default().execute(code)
}
