//! Kernel worker: one kernel on its own thread, driven over channels.
//!
//! A panic inside the kernel ends the thread; the next request observes the
//! closed channel and reports [`KernelDied`] with the panic message.

use crate::error::Result;
use crate::kernel::{Args, CellError, CellRun, EvalResult, Kernel, ModuleRegistry, Value};
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Stack reserved for each kernel thread
const KERNEL_STACK_SIZE: usize = 16 * 1024 * 1024;

enum Request {
    Execute(String),
    Get(String),
    Call(String, Args),
    Artifacts,
}

enum Response {
    Cell(CellRun),
    Value(Option<Value>),
    Called(EvalResult<Value>, String),
    Artifacts(Vec<PathBuf>),
}

/// The kernel thread is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDied(pub String);

impl fmt::Display for KernelDied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel died: {}", self.0)
    }
}

impl From<KernelDied> for CellError {
    fn from(died: KernelDied) -> Self {
        Self::new("KernelDied", died.0)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "kernel panicked".to_string())
}

fn serve(mut kernel: Kernel, requests: &Receiver<Request>, responses: &Sender<Response>) {
    for request in requests {
        let response = match request {
            Request::Execute(source) => Response::Cell(kernel.execute_cell(&source)),
            Request::Get(name) => Response::Value(kernel.get(&name)),
            Request::Call(name, args) => {
                let result = kernel.call(&name, args);
                Response::Called(result, kernel.take_stdout())
            }
            Request::Artifacts => Response::Artifacts(kernel.artifacts().to_vec()),
        };
        if responses.send(response).is_err() {
            break;
        }
    }
}

/// Handle to a kernel thread
pub struct KernelWorker {
    name: String,
    requests: Option<Sender<Request>>,
    responses: Receiver<Response>,
    handle: Option<JoinHandle<()>>,
    died: Option<KernelDied>,
}

impl KernelWorker {
    /// Start a kernel with `globals` pre-bound
    ///
    /// # Errors
    /// Returns `Io` if the thread cannot be spawned
    pub fn spawn(
        name: impl Into<String>,
        registry: ModuleRegistry,
        working_dir: PathBuf,
        globals: Vec<(String, Value)>,
    ) -> Result<Self> {
        let name = name.into();
        let (request_tx, request_rx) = channel::<Request>();
        let (response_tx, response_rx) = channel::<Response>();

        let handle = thread::Builder::new()
            .name(name.clone())
            .stack_size(KERNEL_STACK_SIZE)
            .spawn(move || {
                let mut kernel = Kernel::with_registry(registry).with_working_dir(working_dir);
                for (name, value) in globals {
                    kernel.set(name, value);
                }
                serve(kernel, &request_rx, &response_tx);
            })?;
        debug!(kernel = %name, "kernel started");

        Ok(Self {
            name,
            requests: Some(request_tx),
            responses: response_rx,
            handle: Some(handle),
            died: None,
        })
    }

    fn request(&mut self, request: Request) -> std::result::Result<Response, KernelDied> {
        if let Some(died) = &self.died {
            return Err(died.clone());
        }
        let sent = self
            .requests
            .as_ref()
            .is_some_and(|tx| tx.send(request).is_ok());
        if sent {
            if let Ok(response) = self.responses.recv() {
                return Ok(response);
            }
        }

        let message = match self.handle.take().map(JoinHandle::join) {
            Some(Err(payload)) => panic_message(payload.as_ref()),
            _ => "kernel exited".to_string(),
        };
        warn!(kernel = %self.name, %message, "kernel died");
        let died = KernelDied(message);
        self.died = Some(died.clone());
        Err(died)
    }

    /// Execute one cell
    pub fn execute(&mut self, source: &str) -> std::result::Result<CellRun, KernelDied> {
        match self.request(Request::Execute(source.to_string()))? {
            Response::Cell(run) => Ok(run),
            _ => Err(self.protocol_error()),
        }
    }

    /// Read a global
    pub fn get(&mut self, name: &str) -> std::result::Result<Option<Value>, KernelDied> {
        match self.request(Request::Get(name.to_string()))? {
            Response::Value(value) => Ok(value),
            _ => Err(self.protocol_error()),
        }
    }

    /// Call a function; returns its result and captured stdout
    pub fn call(
        &mut self,
        name: &str,
        args: Args,
    ) -> std::result::Result<(EvalResult<Value>, String), KernelDied> {
        match self.request(Request::Call(name.to_string(), args))? {
            Response::Called(result, stdout) => Ok((result, stdout)),
            _ => Err(self.protocol_error()),
        }
    }

    /// Files the kernel has written
    pub fn artifacts(&mut self) -> std::result::Result<Vec<PathBuf>, KernelDied> {
        match self.request(Request::Artifacts)? {
            Response::Artifacts(paths) => Ok(paths),
            _ => Err(self.protocol_error()),
        }
    }

    fn protocol_error(&mut self) -> KernelDied {
        let died = KernelDied("unexpected kernel response".to_string());
        self.died = Some(died.clone());
        died
    }

    /// True once the kernel thread has been observed dead
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.died.is_some()
    }
}

impl Drop for KernelWorker {
    fn drop(&mut self) {
        // closing the request channel ends the serve loop
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!(kernel = %self.name, "kernel had already panicked");
            }
        }
        debug!(kernel = %self.name, "kernel stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Module, NativeContext};

    fn crash(_: &mut NativeContext<'_>, _: Args) -> EvalResult<Value> {
        panic!("native crash")
    }

    fn crash_module() -> Module {
        Module::new("crash", "0").with_function("now", crash)
    }

    fn worker(registry: ModuleRegistry) -> KernelWorker {
        KernelWorker::spawn("kernel-test", registry, std::env::temp_dir(), Vec::new()).unwrap()
    }

    #[test]
    fn test_state_survives_between_requests() {
        let mut w = worker(ModuleRegistry::default());
        assert!(w.execute("x = 41").unwrap().succeeded());
        w.execute("fn inc(v) { print(\"inc\")\n return v + 1 }").unwrap();
        assert_eq!(w.get("x").unwrap(), Some(Value::Int(41)));
        let (result, stdout) = w
            .call("inc", Args::positional(vec![Value::Int(1)]))
            .unwrap();
        assert_eq!(result.unwrap(), Value::Int(2));
        assert_eq!(stdout, "inc\n");
    }

    #[test]
    fn test_globals_are_prebound() {
        let mut w = KernelWorker::spawn(
            "kernel-test",
            ModuleRegistry::default(),
            std::env::temp_dir(),
            vec![("__notebook__".to_string(), Value::Str("toi_1.ipynb".to_string()))],
        )
        .unwrap();
        assert_eq!(
            w.get("__notebook__").unwrap(),
            Some(Value::Str("toi_1.ipynb".to_string()))
        );
    }

    #[test]
    fn test_panic_is_kernel_died() {
        let mut w = worker(ModuleRegistry::empty().with("crash", crash_module));
        let died = w.execute("import crash\ncrash.now()").unwrap_err();
        assert!(died.0.contains("native crash"), "{died}");
        assert!(w.is_dead());
        assert!(w.get("x").is_err());
        let err: CellError = died.into();
        assert_eq!(err.ename, "KernelDied");
    }
}
