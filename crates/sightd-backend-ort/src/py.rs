//! Embedded Python for models whose graphs carry custom scripted
//! layers. The interpreter is process-wide state: it is initialized at
//! most once, before any model that needs it is loaded.

use std::sync::OnceLock;

use anyhow::{Result, anyhow};
use pyo3::prelude::*;
use pyo3::types::PyList;
use tracing::info;

static INTERPRETER: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the embedded interpreter exactly once per process.
/// Subsequent calls return the recorded outcome of the first.
pub fn ensure_initialized() -> Result<()> {
    let outcome = INTERPRETER.get_or_init(|| {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            info!(version = %py.version(), "initialized embedded Python");
        });
        Ok(())
    });
    outcome.clone().map_err(|err| anyhow!(err))
}

/// Append `path` to the interpreter's module search path unless it is
/// already present.
pub fn extend_module_path(path: &str) -> Result<()> {
    ensure_initialized()?;
    Python::with_gil(|py| -> PyResult<()> {
        let sys_path = py.import("sys")?.getattr("path")?.downcast_into::<PyList>()?;
        let present = sys_path
            .iter()
            .any(|entry| entry.extract::<String>().is_ok_and(|p| p == path));
        if !present {
            sys_path.append(path)?;
        }
        Ok(())
    })
    .map_err(|err| anyhow!("failed to extend Python module path with '{path}': {err}"))
}
