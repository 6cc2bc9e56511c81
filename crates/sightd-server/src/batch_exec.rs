//! Drains closed batches from the scheduler and runs them through the
//! serving session, one batch at a time.

use std::sync::Arc;

use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, error};

use sightd_core::{BACKGROUND_CLASS, Blob, Shape};
use sightd_proto::sightd::v1 as pb;
use sightd_runtime::Batch;

use crate::manager::ModelManager;
use crate::postprocess::{batch_bgr_mean_subtract, process_detections};
use crate::request::{DetectTask, IMAGE_DATA_SIZE, IMAGE_HEIGHT, IMAGE_WIDTH};

const DATA_INPUT: &str = "data";
const IM_INFO_INPUT: &str = "im_info";
const SCORES_OUTPUT: &str = "cls_prob";
const BOXES_OUTPUT: &str = "bbox_pred";

pub struct BatchExecutor {
    manager: Arc<ModelManager>,
    model_name: String,
    /// Largest batch the backend accepts in one forward pass. A closed
    /// batch above this is a configuration bug, not a client error.
    backend_batch_limit: usize,
}

impl BatchExecutor {
    pub fn new(manager: Arc<ModelManager>, model_name: String, backend_batch_limit: usize) -> Self {
        Self {
            manager,
            model_name,
            backend_batch_limit,
        }
    }

    /// Consume closed batches until the scheduler side shuts down.
    pub async fn run(self, mut rx: mpsc::Receiver<Batch<DetectTask>>) {
        while let Some(batch) = rx.recv().await {
            self.execute(batch);
        }
        debug!("batch pipeline shut down");
    }

    /// Run one batch end to end. Every task in the batch is completed
    /// exactly once, whether the batch succeeds or fails.
    pub fn execute(&self, batch: Batch<DetectTask>) {
        if batch.is_empty() {
            return;
        }
        let tasks = batch.into_tasks();

        match self.infer(&tasks) {
            Ok(results) => {
                for (task, detections) in tasks.into_iter().zip(results) {
                    task.complete(Ok(detections));
                }
            }
            Err(status) => {
                error!(code = ?status.code(), message = status.message(), "batch failed");
                for task in tasks {
                    task.complete(Err(status.clone()));
                }
            }
        }
    }

    fn infer(&self, tasks: &[DetectTask]) -> Result<Vec<Vec<pb::Detection>>, Status> {
        let n = tasks.len();
        if n > self.backend_batch_limit {
            return Err(Status::internal(format!(
                "batch of {n} exceeds the backend limit of {}",
                self.backend_batch_limit
            )));
        }

        let model = self
            .manager
            .get_latest(&self.model_name)
            .map_err(|err| Status::internal(err.to_string()))?;

        // Interleave the raw BGR payloads into one image blob and
        // subtract the channel means in place.
        let mut pixels = Vec::with_capacity(n * IMAGE_DATA_SIZE);
        for task in tasks {
            pixels.extend(task.image_data.iter().map(|&b| f32::from(b)));
        }
        let mut im_blob = Blob::new(Shape::from_slice(&[n, IMAGE_DATA_SIZE]), pixels);
        batch_bgr_mean_subtract(&mut im_blob);

        // Every image is the same fixed size and unscaled.
        let mut im_info = Vec::with_capacity(n * 3);
        for _ in 0..n {
            im_info.extend([IMAGE_HEIGHT as f32, IMAGE_WIDTH as f32, 1.0]);
        }
        let im_info_blob = Blob::new(Shape::from_slice(&[n, 3]), im_info);

        let outputs = model
            .session()
            .run(
                vec![
                    (DATA_INPUT.to_owned(), im_blob),
                    (IM_INFO_INPUT.to_owned(), im_info_blob),
                ],
                &[SCORES_OUTPUT.to_owned(), BOXES_OUTPUT.to_owned()],
                &[],
            )
            .map_err(|err| Status::internal(err.to_string()))?;
        let [scores, boxes] = <[Blob; 2]>::try_from(outputs)
            .map_err(|outs| Status::internal(format!("expected 2 outputs, got {}", outs.len())))?;

        let score_width = scores.data().len() / n;
        let box_width = boxes.data().len() / n;

        let mut results = Vec::with_capacity(n);
        for i in 0..n {
            let row_scores = Blob::new(
                Shape::from_slice(&[1, score_width]),
                scores.data()[i * score_width..(i + 1) * score_width].to_vec(),
            );
            let row_boxes = Blob::new(
                Shape::from_slice(&[1, box_width]),
                boxes.data()[i * box_width..(i + 1) * box_width].to_vec(),
            );
            let detections = process_detections(&row_scores, &row_boxes, model.num_classes())
                .map_err(|err| Status::internal(err.to_string()))?;

            results.push(
                detections
                    .into_iter()
                    .filter(|det| det.class_idx != BACKGROUND_CLASS)
                    .map(|det| pb::Detection {
                        roi_x1: det.roi_rect[0],
                        roi_y1: det.roi_rect[1],
                        roi_x2: det.roi_rect[2],
                        roi_y2: det.roi_rect[3],
                        score: det.score,
                        class_label: model.label(det.class_idx).to_owned(),
                    })
                    .collect(),
            );
        }
        Ok(results)
    }
}
