use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use ort::{
    session::{Session, SessionInputValue, builder::SessionBuilder},
    tensor::TensorElementType,
    value::ValueType,
};
use tracing::info;

use sightd_core::{Engine, EngineSpec, Shape, SlotSpec};

#[cfg(feature = "python")]
pub mod py;
#[cfg(not(feature = "python"))]
pub mod py {
    use anyhow::{Result, bail};

    pub fn ensure_initialized() -> Result<()> {
        bail!("Python unavailable in this build configuration")
    }

    pub fn extend_module_path(_path: &str) -> Result<()> {
        ensure_initialized()
    }
}

#[derive(Clone, Copy, Debug)]
pub enum OrtDevice {
    Cpu,
    Cuda { device_id: u32 },
}

/// An ONNX Runtime session presented through the slot-buffer [`Engine`]
/// contract: callers write into engine-owned f32 input buffers, one
/// `forward` feeds those buffers through the graph, and outputs stay in
/// engine-owned buffers until the next pass.
///
/// The ORT session holds a single execution context, so all calls must
/// go through the runtime's serial executor.
pub struct OrtEngine {
    session: Session,
    spec: EngineSpec,
    input_names: Vec<String>,
    output_names: Vec<String>,
    inputs: Vec<Vec<f32>>,
    outputs: Vec<Vec<f32>>,
}

impl OrtEngine {
    pub fn load(model_path: &Path, device: OrtDevice) -> Result<Self> {
        let builder = Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .context("failed to configure ORT session builder")?;

        let builder = configure_session_builder(builder, device)?;

        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ONNX model {}", model_path.display()))?;

        let input_names: Vec<String> = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();
        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        let spec = build_engine_spec(&session)?;
        let inputs = spec
            .inputs
            .iter()
            .map(|slot| vec![0.0; slot.shape.numel()])
            .collect();
        let outputs = vec![Vec::new(); spec.outputs.len()];

        info!(
            model = %model_path.display(),
            inputs = input_names.len(),
            outputs = output_names.len(),
            "loaded ONNX model"
        );

        Ok(Self {
            session,
            spec,
            input_names,
            output_names,
            inputs,
            outputs,
        })
    }
}

impl Engine for OrtEngine {
    fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    fn reshape(&mut self, batch_size: usize) -> Result<()> {
        ensure!(batch_size >= 1, "batch_size must be at least 1");
        for (slot, buf) in self.spec.inputs.iter_mut().zip(self.inputs.iter_mut()) {
            if slot.shape.rank() > 1 && slot.shape.0[0] > 0 {
                slot.shape.0[0] = batch_size;
            }
            buf.resize(slot.shape.numel(), 0.0);
        }
        Ok(())
    }

    fn input_data_mut(&mut self, slot: usize) -> &mut [f32] {
        &mut self.inputs[slot]
    }

    fn forward(&mut self) -> Result<()> {
        let mut ort_inputs = Vec::with_capacity(self.inputs.len());
        for ((name, slot), data) in self
            .input_names
            .iter()
            .zip(&self.spec.inputs)
            .zip(&self.inputs)
        {
            let shape: Vec<usize> = slot.shape.0.iter().copied().collect();
            let value = ort::value::Tensor::from_array((shape, data.clone()))?.into_dyn();
            ort_inputs.push((name.clone(), SessionInputValue::from(value)));
        }

        let results = self.session.run(ort_inputs)?;
        for (idx, (_, value)) in results.iter().enumerate() {
            let ValueType::Tensor { ty, shape, .. } = value.dtype() else {
                bail!("non-tensor outputs are not supported");
            };
            match *ty {
                TensorElementType::Float32 => {}
                other => bail!("unsupported output tensor element type: {other}"),
            }
            let dims: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();

            let array = value.try_extract_array::<f32>()?;
            let data = array.as_slice().context("non-contiguous output tensor")?;
            self.outputs[idx].clear();
            self.outputs[idx].extend_from_slice(data);
            self.spec.outputs[idx].shape = Shape::from_slice(&dims);
        }

        Ok(())
    }

    fn output_data(&self, slot: usize) -> &[f32] {
        &self.outputs[slot]
    }
}

fn configure_session_builder(builder: SessionBuilder, device: OrtDevice) -> Result<SessionBuilder> {
    match device {
        OrtDevice::Cpu => Ok(builder),
        OrtDevice::Cuda { device_id } => configure_cuda(builder, device_id),
    }
}

fn configure_cuda(builder: SessionBuilder, device_id: u32) -> Result<SessionBuilder> {
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::cuda::CUDAExecutionProvider;
        let ep = CUDAExecutionProvider::default()
            .with_device_id(device_id as i32)
            .build();
        builder
            .with_execution_providers([ep])
            .context("failed to enable ORT CUDA execution provider")
    }
    #[cfg(not(feature = "cuda"))]
    {
        let _ = (builder, device_id);
        bail!("CUDA requested but sightd-backend-ort was built without the `cuda` feature")
    }
}

fn build_engine_spec(session: &Session) -> Result<EngineSpec> {
    let inputs = session
        .inputs
        .iter()
        .map(|input| input_slot_spec(&input.name, &input.input_type))
        .collect::<Result<Vec<_>>>()?;

    let outputs = session
        .outputs
        .iter()
        .map(|output| output_slot_spec(&output.name, &output.output_type))
        .collect::<Result<Vec<_>>>()?;

    Ok(EngineSpec { inputs, outputs })
}

fn input_slot_spec(name: &str, value_type: &ValueType) -> Result<SlotSpec> {
    let dims = tensor_dims(name, value_type)?;
    // A dynamic leading dimension starts at batch 1 and grows on
    // reshape; any other dynamic dimension leaves the buffer size
    // unknowable.
    let resolved = dims
        .iter()
        .enumerate()
        .map(|(axis, d)| match d {
            Some(d) => Ok(*d),
            None if axis == 0 => Ok(1),
            None => bail!("input '{name}' has a dynamic non-batch dimension (axis {axis})"),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SlotSpec {
        name: name.to_string(),
        shape: Shape::from_slice(&resolved),
    })
}

fn output_slot_spec(name: &str, value_type: &ValueType) -> Result<SlotSpec> {
    // Output dims are placeholders until the first forward pass
    // records the real shapes.
    let resolved: Vec<usize> = tensor_dims(name, value_type)?
        .iter()
        .map(|d| d.unwrap_or(1))
        .collect();

    Ok(SlotSpec {
        name: name.to_string(),
        shape: Shape::from_slice(&resolved),
    })
}

fn tensor_dims(name: &str, value_type: &ValueType) -> Result<Vec<Option<usize>>> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        bail!("unsupported non-tensor IO value type on '{name}'");
    };
    match *ty {
        TensorElementType::Float32 => {}
        other => bail!("slot '{name}' has unsupported element type {other}, expected f32"),
    }
    Ok(shape
        .iter()
        .map(|d| if *d < 0 { None } else { Some(*d as usize) })
        .collect())
}
