use common::span_debug;
use crate::detection::{RawBox, ResultGroup};
use crate::params::DetectionParams;
use crate::processing::pre::TransformParams;
use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2};

/// Shape of a YOLO output tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// `[batch, 4 + num_classes, candidates]`: cxcywh followed by per-class
    /// scores, NMS still to be applied.
    Raw,
    /// `[batch, detections, 6]`: `x1, y1, x2, y2, score, class`, already
    /// suppressed by the exported graph.
    EndToEnd,
}

impl OutputLayout {
    pub fn detect(shape: &[usize]) -> anyhow::Result<Self> {
        match shape {
            [_, rows, 6] if *rows != 6 => Ok(Self::EndToEnd),
            [_, channels, _] if *channels > 4 => Ok(Self::Raw),
            _ => anyhow::bail!("Unsupported detector output shape {:?}", shape),
        }
    }
}

pub struct PostProcessor {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl PostProcessor {
    pub fn new(confidence_threshold: f32, iou_threshold: f32, max_detections: usize) -> Self {
        Self {
            confidence_threshold,
            iou_threshold,
            max_detections,
        }
    }

    pub fn from_params(params: &DetectionParams) -> Self {
        Self::new(
            params.confidence_threshold,
            params.iou_threshold,
            params.max_detections,
        )
    }

    /// Decode a YOLO output tensor into one result group per batch image,
    /// with boxes mapped back to original image coordinates.
    #[tracing::instrument(skip_all, fields(shape = ?output.shape()))]
    pub fn parse_detections(
        &self,
        output: &ArrayViewD<f32>,
        transform: &TransformParams,
    ) -> anyhow::Result<Vec<ResultGroup>> {
        let layout = OutputLayout::detect(output.shape())?;

        let mut groups = Vec::with_capacity(output.shape()[0]);

        for image_output in output.axis_iter(Axis(0)) {
            let image_output = image_output.into_dimensionality::<Ix2>()?;

            let mut boxes = match layout {
                OutputLayout::Raw => self.decode_raw(&image_output, transform),
                OutputLayout::EndToEnd => self.decode_end_to_end(&image_output, transform),
            };

            if layout == OutputLayout::Raw {
                boxes = nms(boxes, self.iou_threshold, self.max_detections);
            } else {
                boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            }
            boxes.truncate(self.max_detections);

            groups.push(ResultGroup::new(boxes));
        }

        Ok(groups)
    }

    fn decode_raw(&self, output: &ArrayView2<f32>, transform: &TransformParams) -> Vec<RawBox> {
        let num_candidates = output.shape()[1];
        let num_classes = output.shape()[0] - 4;

        let mut boxes = Vec::new();

        for i in 0..num_candidates {
            let mut confidence = f32::NEG_INFINITY;
            let mut class_id = 0usize;
            for c in 0..num_classes {
                let score = output[[4 + c, i]];
                if score > confidence {
                    confidence = score;
                    class_id = c;
                }
            }

            if confidence < self.confidence_threshold {
                continue;
            }

            let (x1, y1, x2, y2) = cxcywh_to_xyxy(
                output[[0, i]],
                output[[1, i]],
                output[[2, i]],
                output[[3, i]],
            );

            boxes.push(RawBox {
                xyxy: inverse_transform([x1, y1, x2, y2], transform),
                confidence,
                class_id: class_id as i64,
            });
        }

        boxes
    }

    fn decode_end_to_end(
        &self,
        output: &ArrayView2<f32>,
        transform: &TransformParams,
    ) -> Vec<RawBox> {
        output
            .outer_iter()
            .filter(|row| row[4] >= self.confidence_threshold)
            .map(|row| RawBox {
                xyxy: inverse_transform([row[0], row[1], row[2], row[3]], transform),
                confidence: row[4],
                class_id: row[5] as i64,
            })
            .collect()
    }
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;
    (x1, y1, x2, y2)
}

/// Undo the letterbox: model input pixels to original image pixels, clamped
/// to the image bounds.
#[inline]
fn inverse_transform(xyxy: [f32; 4], t: &TransformParams) -> [f32; 4] {
    let [x1, y1, x2, y2] = xyxy;
    let max_x = t.orig_width as f32;
    let max_y = t.orig_height as f32;
    [
        ((x1 - t.offset_x) / t.scale).clamp(0.0, max_x),
        ((y1 - t.offset_y) / t.scale).clamp(0.0, max_y),
        ((x2 - t.offset_x) / t.scale).clamp(0.0, max_x),
        ((y2 - t.offset_y) / t.scale).clamp(0.0, max_y),
    ]
}

/// Candidates considered by NMS after sorting; lower-scored ones are dropped.
pub const MAX_NMS_CANDIDATES: usize = 30_000;

/// Class-aware greedy non-maximum suppression. Output is sorted by
/// descending confidence and holds at most `max_detections` boxes.
pub fn nms(boxes: Vec<RawBox>, iou_threshold: f32, max_detections: usize) -> Vec<RawBox> {
    nms_capped(boxes, iou_threshold, max_detections, MAX_NMS_CANDIDATES)
}

fn nms_capped(
    mut boxes: Vec<RawBox>,
    iou_threshold: f32,
    max_detections: usize,
    max_candidates: usize,
) -> Vec<RawBox> {
    let _s = span_debug!("nms");

    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    if boxes.len() > max_candidates {
        tracing::debug!(
            candidates = boxes.len(),
            max_candidates,
            "Dropping lowest-scored NMS candidates"
        );
        boxes.truncate(max_candidates);
    }

    let mut kept: Vec<RawBox> = Vec::with_capacity(boxes.len().min(max_detections));

    for candidate in boxes {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.xyxy, &candidate.xyxy) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
