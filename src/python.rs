use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::geometry::RawBox;
use crate::lib_tracing::{RoutingTracer, TracerGuard};
use crate::routing::{
    BoundsSource, ConfigHandle, ConnectorRequest, ConnectorRouter, InMemoryRegistry, RetryTicket, Scheduler,
    SourceError,
};

/// Bounds looked up through a Python callable `(root, id) -> (x, y, w, h) | None`.
struct PyBounds {
    callback: Option<PyObject>,
}

impl BoundsSource for PyBounds {
    fn bounds(&self, root: &str, id: &str) -> Result<Option<RawBox>, SourceError> {
        let Some(callback) = &self.callback else {
            return Ok(None);
        };
        Python::with_gil(|py| {
            let value = callback
                .call1(py, (root, id))
                .map_err(|error| SourceError::new(id, error.to_string()))?;
            let rect: Option<(f64, f64, f64, f64)> =
                value.extract(py).map_err(|error| SourceError::new(id, error.to_string()))?;
            Ok(rect.map(|(x, y, w, h)| RawBox::Xywh { x, y, w, h }))
        })
    }
}

/// Forwards retry tickets to a Python callable `(root, id, attempt, frames, delay_ms)`.
struct PyScheduler {
    callback: Option<PyObject>,
}

impl Scheduler for PyScheduler {
    fn schedule(&mut self, ticket: RetryTicket) {
        let Some(callback) = &self.callback else {
            return;
        };
        Python::with_gil(|py| {
            let args = (
                ticket.root.as_str(),
                ticket.connector_id.as_str(),
                ticket.attempt,
                ticket.frames,
                ticket.delay_ms,
            );
            if let Err(error) = callback.call1(py, args) {
                tracing::warn!(%error, connector = %ticket.connector_id, "retry callback failed");
            }
        });
    }
}

fn value_error(error: serde_json::Error) -> PyErr {
    PyValueError::new_err(error.to_string())
}

#[pyclass(unsendable, name = "ConnectorRouter")]
struct PyConnectorRouter {
    router: ConnectorRouter,
}

#[pymethods]
impl PyConnectorRouter {
    #[new]
    #[pyo3(signature = (bounds=None, scheduler=None))]
    fn new(bounds: Option<PyObject>, scheduler: Option<PyObject>) -> Self {
        PyConnectorRouter {
            router: ConnectorRouter::new(
                ConfigHandle::default(),
                PyBounds { callback: bounds },
                PyScheduler { callback: scheduler },
            )
            .with_registry(InMemoryRegistry::from_env()),
        }
    }

    fn set_global_config(&self, patch: &str) -> PyResult<()> {
        let patch: serde_json::Value = serde_json::from_str(patch).map_err(value_error)?;
        self.router.set_global_config(&patch);
        Ok(())
    }

    fn global_config(&self) -> PyResult<String> {
        serde_json::to_string(&self.router.config().snapshot()).map_err(value_error)
    }

    /// Route a connector given as JSON; returns `{"result": .., "telemetry": ..}` as JSON.
    fn route(&mut self, root: &str, request: &str) -> PyResult<String> {
        let request: ConnectorRequest = serde_json::from_str(request).map_err(value_error)?;
        let outcome = self.router.route(root, &request);
        let payload = serde_json::json!({
            "result": outcome.result,
            "telemetry": outcome.telemetry,
        });
        serde_json::to_string(&payload).map_err(value_error)
    }

    /// Route a JSON list of requests and write the trace once; returns a JSON list of results.
    fn route_batch(&mut self, root: &str, requests: &str) -> PyResult<String> {
        let requests: Vec<ConnectorRequest> = serde_json::from_str(requests).map_err(value_error)?;
        let results: Vec<_> = self
            .router
            .route_batch(root, &requests)
            .into_iter()
            .map(|outcome| outcome.result)
            .collect();
        serde_json::to_string(&results).map_err(value_error)
    }

    fn flush_trace(&mut self) {
        self.router.flush_registry();
    }

    /// Returns `None` for stale retries.
    fn fire_retry(&mut self, root: &str, connector_id: &str, attempt: u32) -> PyResult<Option<String>> {
        let ticket = RetryTicket {
            root: root.to_string(),
            connector_id: connector_id.to_string(),
            attempt,
            frames: 0,
            delay_ms: 0,
        };
        self.router
            .fire_retry(&ticket)
            .map(|outcome| serde_json::to_string(&outcome.result).map_err(value_error))
            .transpose()
    }

    fn drop_root(&mut self, root: &str) {
        self.router.drop_root(root);
    }
}

#[pyclass(unsendable, name = "RoutingTracer")]
struct PyRoutingTracer {
    _guard: TracerGuard,
}

#[pymethods]
impl PyRoutingTracer {
    #[new]
    #[pyo3(signature = (log_path="debug.log", flame_path=None))]
    fn new(log_path: &str, flame_path: Option<&str>) -> PyResult<Self> {
        let mut tracer = RoutingTracer::new(log_path);
        if let Some(path) = flame_path {
            tracer = tracer.with_flame(path);
        }
        let guard = tracer
            .install()
            .map_err(|error| PyValueError::new_err(error.to_string()))?;
        Ok(PyRoutingTracer { _guard: guard })
    }
}

#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyConnectorRouter>()?;
    m.add_class::<PyRoutingTracer>()?;
    Ok(())
}
