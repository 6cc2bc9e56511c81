use anyhow::Result;

use crate::Shape;

/// A named input or output buffer in the engine's compiled graph.
#[derive(Clone, Debug)]
pub struct SlotSpec {
    pub name: String,
    pub shape: Shape,
}

impl SlotSpec {
    /// Elements per batch item: the product of all dimensions after the
    /// leading batch dimension. A slot with fewer than 2 dimensions is
    /// treated as one item wide.
    pub fn item_width(&self) -> usize {
        if self.shape.rank() > 1 {
            self.shape.0[1..].iter().product::<usize>().max(1)
        } else {
            self.shape.numel()
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineSpec {
    pub inputs: Vec<SlotSpec>,
    pub outputs: Vec<SlotSpec>,
}

impl EngineSpec {
    /// Guess the configured batch capacity from the declared input
    /// shapes: the largest leading dimension of any input with at least
    /// 2 dimensions, or 1 if no input has a batch dimension.
    pub fn initial_batch_capacity(&self) -> usize {
        let mut capacity = 1;
        for slot in &self.inputs {
            if slot.shape.rank() > 1 {
                if let Some(lead) = slot.shape.leading_dim() {
                    capacity = capacity.max(lead);
                }
            }
        }
        capacity
    }
}

/// One loaded inference engine.
///
/// Implementations own their input/output buffers ("slots") and are not
/// required to be `Send` or reentrant: the runtime confines every call,
/// including construction, to a single dedicated executor thread.
pub trait Engine: 'static {
    /// Current slot layout. Input shapes reflect the latest reshape;
    /// output shapes reflect the latest forward pass.
    fn spec(&self) -> &EngineSpec;

    /// Replace the leading batch dimension of every input slot that has
    /// one and reconfigure the internal buffers accordingly.
    fn reshape(&mut self, batch_size: usize) -> Result<()>;

    /// Writable view of an input slot's buffer.
    fn input_data_mut(&mut self, slot: usize) -> &mut [f32];

    /// Run one forward pass over the current input buffers.
    fn forward(&mut self) -> Result<()>;

    /// Contents of an output slot's buffer after the last forward pass.
    fn output_data(&self, slot: usize) -> &[f32];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(name: &str, dims: &[usize]) -> SlotSpec {
        SlotSpec {
            name: name.to_string(),
            shape: Shape::from_slice(dims),
        }
    }

    #[test]
    fn item_width_skips_batch_dim() {
        assert_eq!(slot("data", &[1, 3, 600, 800]).item_width(), 3 * 600 * 800);
        assert_eq!(slot("im_info", &[1, 3]).item_width(), 3);
        assert_eq!(slot("flat", &[7]).item_width(), 7);
    }

    #[test]
    fn initial_capacity_is_max_leading_dim() {
        let spec = EngineSpec {
            inputs: vec![slot("data", &[4, 3, 600, 800]), slot("im_info", &[1, 3])],
            outputs: vec![],
        };
        assert_eq!(spec.initial_batch_capacity(), 4);

        let no_batch = EngineSpec {
            inputs: vec![slot("flat", &[7])],
            outputs: vec![],
        };
        assert_eq!(no_batch.initial_batch_capacity(), 1);
    }
}
