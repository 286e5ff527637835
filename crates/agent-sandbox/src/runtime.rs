//! The embedded interpreter: a fresh RustPython VM per run, driven by
//! `driver.py`.

use std::sync::OnceLock;

use rustpython_vm::builtins::PyBaseExceptionRef;
use rustpython_vm::compiler::Mode;
use rustpython_vm::{AsObject, Interpreter, PyObjectRef, PyResult, VirtualMachine};
use tracing::{debug, warn};

use crate::error::SandboxError;
use crate::{Execution, Limits};

/// Modules executed code may import.
pub const ALLOWED_MODULES: &[&str] = &[
    "datetime",
    "math",
    "random",
    "time",
    "collections",
    "itertools",
    "functools",
    "copy",
    "re",
    "json",
    "csv",
    "uuid",
    "string",
    "statistics",
    "heapq",
    "bisect",
    "array",
    "enum",
    "dataclasses",
    "io",
    "base64",
    "hashlib",
    "tempfile",
];

/// Modules added to the allow-list only when the interpreter can find them.
pub const OPTIONAL_MODULES: &[&str] = &["numpy", "pandas", "scipy"];

/// Stack reserved for interpreter threads. The VM's compiler and evaluator
/// recurse on the native stack.
const INTERPRETER_STACK: usize = 256 * 1024 * 1024;

const DRIVER: &str = include_str!("driver.py");

const DETECT: &str = "import importlib.util\n\
__sandbox_found__ = ','.join(name for name in __sandbox_optional__.split(',') \
if importlib.util.find_spec(name) is not None)\n";

/// Optional scientific modules found at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub numpy: bool,
    pub pandas: bool,
    pub scipy: bool,
}

impl Capabilities {
    /// Detected once per process and shared read-only afterwards.
    pub fn get() -> &'static Capabilities {
        static DETECTED: OnceLock<Capabilities> = OnceLock::new();
        DETECTED.get_or_init(|| match on_interpreter_thread(Capabilities::detect) {
            Ok(capabilities) => capabilities,
            Err(error) => {
                warn!(%error, "module detection failed");
                Capabilities::default()
            }
        })
    }

    fn detect() -> Self {
        let inputs = [("__sandbox_optional__", OPTIONAL_MODULES.join(","))];
        let found = interpreter().enter(|vm| {
            run_module(vm, DETECT, &inputs, &["__sandbox_found__"])
                .map_err(|exc| exception_text(vm, &exc))
        });
        match found {
            Ok(values) => {
                let capabilities = Self::from_names(values.first().map_or("", String::as_str));
                debug!(?capabilities, "optional modules detected");
                capabilities
            }
            Err(message) => {
                warn!(%message, "module detection raised");
                Self::default()
            }
        }
    }

    /// Parse a comma-separated list of found module names.
    pub fn from_names(names: &str) -> Self {
        let mut capabilities = Self::default();
        for name in names.split(',').map(str::trim) {
            match name {
                "numpy" => capabilities.numpy = true,
                "pandas" => capabilities.pandas = true,
                "scipy" => capabilities.scipy = true,
                _ => {}
            }
        }
        capabilities
    }

    pub fn available(&self) -> Vec<&'static str> {
        OPTIONAL_MODULES
            .iter()
            .zip([self.numpy, self.pandas, self.scipy])
            .filter_map(|(name, found)| found.then_some(*name))
            .collect()
    }

    /// Every module the import guard resolves.
    pub fn allow_list(&self) -> Vec<&'static str> {
        let mut modules = ALLOWED_MODULES.to_vec();
        modules.extend(self.available());
        modules
    }
}

/// Run `f` on a thread with a stack large enough for the interpreter.
pub(crate) fn on_interpreter_thread<T, F>(f: F) -> Result<T, SandboxError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name("sandbox".into())
        .stack_size(INTERPRETER_STACK)
        .spawn(f)
        .map_err(|e| SandboxError::Interpreter(e.to_string()))?;
    handle
        .join()
        .map_err(|_| SandboxError::Interpreter("internal interpreter error".into()))
}

/// Execute `code` in a fresh interpreter. Must run on an interpreter thread.
pub(crate) fn run(code: &str, limits: &Limits) -> Execution {
    let inputs = [
        ("__sandbox_source__", code.to_owned()),
        ("__sandbox_allowed__", Capabilities::get().allow_list().join(",")),
        ("__sandbox_recursion_limit__", limits.recursion_limit.to_string()),
        ("__sandbox_max_output__", limits.max_output.to_string()),
    ];
    let outputs = ["__sandbox_output__", "__sandbox_error_kind__", "__sandbox_error__"];
    interpreter().enter(|vm| match run_module(vm, DRIVER, &inputs, &outputs) {
        Ok(values) => {
            let mut values = values.into_iter();
            let output = values.next().unwrap_or_default();
            let kind = values.next().unwrap_or_default();
            let message = values.next().unwrap_or_default();
            Execution {
                output,
                error: (!kind.is_empty()).then(|| SandboxError::Raised { kind, message }),
            }
        }
        Err(exc) => Execution {
            output: String::new(),
            error: Some(SandboxError::Interpreter(exception_text(vm, &exc))),
        },
    })
}

fn interpreter() -> Interpreter {
    rustpython::InterpreterConfig::new().init_stdlib().interpreter()
}

/// Run `source` as a module whose globals start with `inputs`, then read
/// each of `outputs` back as a string.
fn run_module(
    vm: &VirtualMachine,
    source: &str,
    inputs: &[(&str, String)],
    outputs: &[&str],
) -> PyResult<Vec<String>> {
    let scope = vm.new_scope_with_builtins();
    for (key, value) in inputs {
        scope
            .globals
            .set_item(*key, vm.ctx.new_str(value.as_str()).into(), vm)?;
    }
    let code = vm
        .compile(source, Mode::Exec, "<sandbox>".to_owned())
        .map_err(|err| vm.new_runtime_error(err.to_string()))?;
    vm.run_code_obj(code, scope.clone())?;
    outputs
        .iter()
        .map(|key| text(vm, scope.globals.get_item(*key, vm)?))
        .collect()
}

fn text(vm: &VirtualMachine, value: PyObjectRef) -> PyResult<String> {
    Ok(value.str(vm)?.as_str().to_owned())
}

fn exception_text(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
    match exc.as_object().str(vm) {
        Ok(text) => format!("{}: {}", exc.as_object().class().name(), text.as_str()),
        Err(_) => "unprintable interpreter exception".to_owned(),
    }
}
