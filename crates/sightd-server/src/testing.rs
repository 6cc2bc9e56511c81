//! Test doubles shared by the in-crate test modules.

use anyhow::Result;
use sightd_core::{Engine, EngineSpec, Shape, SlotSpec};

use crate::request::IMAGE_DATA_SIZE;

/// Rois the fake network reports per image.
const ROIS: usize = 2;
/// Classes including background.
const CLASSES: usize = 2;

pub fn labels() -> Vec<String> {
    vec!["__background__".into(), "widget".into()]
}

/// A detector that always reports two regions per image: a confident
/// background hit and a confident "widget" at (100, 100)-(200, 200).
pub struct MockEngine {
    spec: EngineSpec,
    capacity: usize,
    inputs: Vec<Vec<f32>>,
    outputs: Vec<Vec<f32>>,
}

impl MockEngine {
    pub fn new() -> Self {
        let spec = EngineSpec {
            inputs: vec![
                SlotSpec {
                    name: "data".into(),
                    shape: Shape::from_slice(&[1, IMAGE_DATA_SIZE]),
                },
                SlotSpec {
                    name: "im_info".into(),
                    shape: Shape::from_slice(&[1, 3]),
                },
            ],
            outputs: vec![
                SlotSpec {
                    name: "cls_prob".into(),
                    shape: Shape::from_slice(&[1, ROIS * CLASSES]),
                },
                SlotSpec {
                    name: "bbox_pred".into(),
                    shape: Shape::from_slice(&[1, ROIS * CLASSES * 4]),
                },
            ],
        };
        let inputs = spec
            .inputs
            .iter()
            .map(|slot| vec![0.0; slot.shape.numel()])
            .collect();
        let outputs = spec
            .outputs
            .iter()
            .map(|slot| vec![0.0; slot.shape.numel()])
            .collect();
        Self {
            spec,
            capacity: 1,
            inputs,
            outputs,
        }
    }
}

impl Engine for MockEngine {
    fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    fn reshape(&mut self, batch_size: usize) -> Result<()> {
        self.capacity = batch_size;
        for (buf, slot) in self.inputs.iter_mut().zip(&self.spec.inputs) {
            buf.resize(batch_size * slot.item_width(), 0.0);
        }
        for (buf, slot) in self.outputs.iter_mut().zip(&self.spec.outputs) {
            buf.resize(batch_size * slot.item_width(), 0.0);
        }
        Ok(())
    }

    fn input_data_mut(&mut self, slot: usize) -> &mut [f32] {
        &mut self.inputs[slot]
    }

    fn forward(&mut self) -> Result<()> {
        // Scores are laid out roi-major: [roi0 bg, roi0 widget,
        // roi1 bg, roi1 widget].
        let scores = [0.99, 0.01, 0.01, 0.95];
        let mut boxes = [0.0; ROIS * CLASSES * 4];
        boxes[..4].copy_from_slice(&[0.0, 0.0, 10.0, 10.0]);
        // roi 1, class 1.
        boxes[12..16].copy_from_slice(&[100.0, 100.0, 200.0, 200.0]);

        for row in self.outputs[0].chunks_exact_mut(scores.len()) {
            row.copy_from_slice(&scores);
        }
        for row in self.outputs[1].chunks_exact_mut(boxes.len()) {
            row.copy_from_slice(&boxes);
        }
        Ok(())
    }

    fn output_data(&self, slot: usize) -> &[f32] {
        &self.outputs[slot]
    }
}
