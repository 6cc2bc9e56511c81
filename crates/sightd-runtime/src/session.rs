use std::collections::HashMap;

use tracing::info;

use sightd_core::{Blob, Engine, Shape};
use thiserror::Error;

use crate::executor::{ExecutorError, SerialExecutor};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("target names are not supported by this backend")]
    TargetsUnsupported,
    #[error("expected {expected} inputs, but got {got}")]
    MissingInputs { expected: usize, got: usize },
    #[error("input tensor {0} does not exist in the network")]
    UnknownInput(String),
    #[error("network output '{0}' does not exist")]
    UnknownOutput(String),
    #[error("could not determine the batch size; input must have at least 2 dimensions")]
    NoBatchDimension,
    #[error("invalid batch size of {0}")]
    InvalidBatchSize(usize),
    #[error("input tensor {0} has an incorrect batch size")]
    BatchSizeMismatch(String),
    #[error("input tensor {name} has {got} elements, expected {expected}")]
    InputSizeMismatch {
        name: String,
        got: usize,
        expected: usize,
    },
    #[error(transparent)]
    Canceled(#[from] ExecutorError),
    #[error(transparent)]
    Backend(anyhow::Error),
}

impl SessionError {
    /// True for errors caused by the caller's arguments rather than the
    /// backend or the runtime.
    pub fn is_invalid_argument(&self) -> bool {
        !matches!(self, Self::Canceled(_) | Self::Backend(_))
    }
}

/// Object-safe view of a loaded session, so the model manager can hold
/// servables backed by different engine types.
pub trait ServingSession: Send + Sync {
    fn run(
        &self,
        inputs: Vec<(String, Blob)>,
        output_names: &[String],
        target_names: &[String],
    ) -> Result<Vec<Blob>, SessionError>;

    fn batch_capacity(&self) -> Result<usize, ExecutorError>;
}

struct SessionState<E> {
    engine: E,
    /// Largest batch the engine is currently shaped for. Grows
    /// monotonically; only touched on the executor thread.
    capacity: usize,
}

/// Wraps one loaded [`Engine`] behind a [`SerialExecutor`].
///
/// The slot-name maps are built once at load time. `run` is safe to
/// call from any thread; the whole decide-batch-size / maybe-reshape /
/// copy-in / forward / copy-out sequence executes as a single job on
/// the executor, so concurrent calls queue instead of racing over the
/// engine's capacity.
pub struct InferenceSession<E: Engine> {
    executor: SerialExecutor<SessionState<E>>,
    /// input name -> (slot index, elements per batch item)
    inputs: HashMap<String, (usize, usize)>,
    /// output name -> slot index
    outputs: HashMap<String, usize>,
}

impl<E: Engine> InferenceSession<E> {
    /// Spawn the executor and construct the engine on it (engine
    /// construction may not be reentrant either), then capture the
    /// slot maps and initial batch capacity.
    pub fn load<F>(name: &str, init: F) -> anyhow::Result<Self>
    where
        F: FnOnce() -> anyhow::Result<E> + Send + 'static,
    {
        let executor = SerialExecutor::spawn(name, move || {
            let engine = init()?;
            let capacity = engine.spec().initial_batch_capacity();
            Ok(SessionState { engine, capacity })
        })?;

        let (spec, capacity) = executor
            .run(|state| (state.engine.spec().clone(), state.capacity))
            .map_err(anyhow::Error::from)?;

        let inputs = spec
            .inputs
            .iter()
            .enumerate()
            .map(|(idx, slot)| (slot.name.clone(), (idx, slot.item_width())))
            .collect();
        let outputs = spec
            .outputs
            .iter()
            .enumerate()
            .map(|(idx, slot)| (slot.name.clone(), idx))
            .collect();

        info!(
            name,
            inputs = spec.inputs.len(),
            outputs = spec.outputs.len(),
            batch_capacity = capacity,
            "loaded network"
        );

        Ok(Self {
            executor,
            inputs,
            outputs,
        })
    }

    pub fn batch_capacity(&self) -> Result<usize, ExecutorError> {
        self.executor.run(|state| state.capacity)
    }

    pub fn run(
        &self,
        inputs: Vec<(String, Blob)>,
        output_names: &[String],
        target_names: &[String],
    ) -> Result<Vec<Blob>, SessionError> {
        if !target_names.is_empty() {
            return Err(SessionError::TargetsUnsupported);
        }

        // Check inputs are present, assuming there are no duplicates.
        if inputs.is_empty() || inputs.len() < self.inputs.len() {
            return Err(SessionError::MissingInputs {
                expected: self.inputs.len(),
                got: inputs.len(),
            });
        }

        // Determine the batch size from the first input only.
        let first = &inputs[0].1;
        if first.shape().rank() < 2 {
            return Err(SessionError::NoBatchDimension);
        }
        let batch_size = first.shape().leading_dim().unwrap_or(0);
        if batch_size < 1 {
            return Err(SessionError::InvalidBatchSize(batch_size));
        }

        // Resolve every name before touching the engine, so argument
        // errors never mutate any buffer.
        let mut resolved = Vec::with_capacity(inputs.len());
        for (name, blob) in inputs {
            let Some(&(slot, item_width)) = self.inputs.get(&name) else {
                return Err(SessionError::UnknownInput(name));
            };
            if blob.shape().leading_dim() != Some(batch_size) {
                return Err(SessionError::BatchSizeMismatch(name));
            }
            let expected = batch_size * item_width;
            if blob.data().len() != expected {
                return Err(SessionError::InputSizeMismatch {
                    name,
                    got: blob.data().len(),
                    expected,
                });
            }
            resolved.push((slot, blob));
        }

        let mut out_slots = Vec::with_capacity(output_names.len());
        for name in output_names {
            let Some(&slot) = self.outputs.get(name) else {
                return Err(SessionError::UnknownOutput(name.clone()));
            };
            out_slots.push(slot);
        }

        let result = self.executor.run(move |state| -> anyhow::Result<Vec<Blob>> {
            if state.capacity < batch_size {
                state.engine.reshape(batch_size)?;
                state.capacity = batch_size;
                info!(batch_size, "reshaped network");
            }

            for (slot, blob) in &resolved {
                let src = blob.data();
                let dst = state.engine.input_data_mut(*slot);
                anyhow::ensure!(
                    src.len() <= dst.len(),
                    "input slot {slot} buffer holds {} elements, need {}",
                    dst.len(),
                    src.len()
                );
                dst[..src.len()].copy_from_slice(src);
            }

            state.engine.forward()?;

            let mut outs = Vec::with_capacity(out_slots.len());
            for slot in out_slots {
                let out_spec = &state.engine.spec().outputs[slot];
                let lead = out_spec.shape.leading_dim().unwrap_or(1).max(1);
                let width = out_spec.shape.numel() / lead;
                let data = state.engine.output_data(slot);
                anyhow::ensure!(
                    data.len() >= batch_size * width,
                    "output slot {slot} holds {} elements, need {}",
                    data.len(),
                    batch_size * width
                );
                outs.push(Blob::new(
                    Shape::from_slice(&[batch_size, width]),
                    data[..batch_size * width].to_vec(),
                ));
            }
            Ok(outs)
        })?;

        result.map_err(SessionError::Backend)
    }
}

impl<E: Engine> ServingSession for InferenceSession<E> {
    fn run(
        &self,
        inputs: Vec<(String, Blob)>,
        output_names: &[String],
        target_names: &[String],
    ) -> Result<Vec<Blob>, SessionError> {
        InferenceSession::run(self, inputs, output_names, target_names)
    }

    fn batch_capacity(&self) -> Result<usize, ExecutorError> {
        InferenceSession::batch_capacity(self)
    }
}
