//! Detection post-processing for the region-proposal output head.

use anyhow::{Result, ensure};
use sightd_core::{Blob, Detection};

use crate::request::{IMAGE_HEIGHT, IMAGE_WIDTH};

/// Per-channel BGR pixel means subtracted before inference.
const PIXEL_MEANS_BGR: [f32; 3] = [102.9801, 115.9465, 122.7717];

/// Minimum class score for a region to be reported.
const SCORE_THRESHOLD: f32 = 0.8;

/// IoU above which two boxes of the same class are duplicates.
const NMS_THRESHOLD: f32 = 0.3;

/// Subtract the channel mean from every pixel of the whole batch at
/// once. Pixels are interleaved BGR triplets.
pub fn batch_bgr_mean_subtract(blob: &mut Blob) {
    for px in blob.data_mut().chunks_exact_mut(3) {
        px[0] -= PIXEL_MEANS_BGR[0];
        px[1] -= PIXEL_MEANS_BGR[1];
        px[2] -= PIXEL_MEANS_BGR[2];
    }
}

/// Turn raw `[rois * classes]` scores and `[rois * classes * 4]` box
/// coordinates into thresholded, non-maximum-suppressed detections.
///
/// The background class is kept here and filtered at emission, so the
/// caller decides what reaches the client.
pub fn process_detections(
    scores: &Blob,
    boxes: &Blob,
    num_classes: usize,
) -> Result<Vec<Detection>> {
    ensure!(num_classes > 0, "model declares no classes");
    let scores = scores.data();
    let boxes = boxes.data();
    ensure!(
        scores.len() % num_classes == 0,
        "score tensor of {} elements is not divisible by {num_classes} classes",
        scores.len()
    );
    let rois = scores.len() / num_classes;
    ensure!(
        boxes.len() == rois * num_classes * 4,
        "box tensor of {} elements does not match {rois} rois x {num_classes} classes",
        boxes.len()
    );

    let mut dets = Vec::new();
    for class_idx in 0..num_classes {
        let mut candidates = Vec::new();
        for roi in 0..rois {
            let score = scores[roi * num_classes + class_idx];
            if score < SCORE_THRESHOLD {
                continue;
            }
            let base = (roi * num_classes + class_idx) * 4;
            candidates.push(Detection {
                roi_rect: [
                    clamp_coord(boxes[base], IMAGE_WIDTH),
                    clamp_coord(boxes[base + 1], IMAGE_HEIGHT),
                    clamp_coord(boxes[base + 2], IMAGE_WIDTH),
                    clamp_coord(boxes[base + 3], IMAGE_HEIGHT),
                ],
                class_idx,
                score,
            });
        }
        nms(&mut candidates);
        dets.extend(candidates);
    }
    Ok(dets)
}

fn clamp_coord(coord: f32, bound: usize) -> i32 {
    (coord.round() as i32).clamp(0, bound as i32 - 1)
}

/// Greedy non-maximum suppression within one class.
fn nms(dets: &mut Vec<Detection>) {
    dets.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(dets.len());
    for det in dets.drain(..) {
        if kept
            .iter()
            .all(|k| iou(&k.roi_rect, &det.roi_rect) <= NMS_THRESHOLD)
        {
            kept.push(det);
        }
    }
    *dets = kept;
}

fn iou(a: &[i32; 4], b: &[i32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0]) + 1).max(0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1]) + 1).max(0);
    let inter = (ix * iy) as f32;
    let area = |r: &[i32; 4]| ((r[2] - r[0] + 1) * (r[3] - r[1] + 1)) as f32;
    inter / (area(a) + area(b) - inter)
}
