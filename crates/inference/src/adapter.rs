use crate::{
    backend::DetectorBackend,
    detection::{Detection, RawBox, ResultGroup},
    params::DetectionParams,
};
use image::RgbImage;

/// Run the backend on a decoded image and flatten its output into
/// [`Detection`] records labelled `class_name`.
pub fn infer<B: DetectorBackend + ?Sized>(
    backend: &mut B,
    image: &RgbImage,
    params: &DetectionParams,
    class_name: &str,
) -> anyhow::Result<Vec<Detection>> {
    let groups = backend.infer(image, params)?;
    Ok(normalize(groups, params.max_detections, class_name))
}

/// Concatenate every result group in order, skipping empty groups and boxes
/// that cannot be represented, and cap the total at `max_detections`.
pub fn normalize(
    groups: Vec<ResultGroup>,
    max_detections: usize,
    class_name: &str,
) -> Vec<Detection> {
    let mut detections = Vec::new();
    let mut dropped = 0usize;

    for group in groups.into_iter().filter(|g| !g.is_empty()) {
        for raw in group.boxes {
            match sanitize(raw) {
                Some(b) => detections.push(Detection {
                    x1: b.xyxy[0],
                    y1: b.xyxy[1],
                    x2: b.xyxy[2],
                    y2: b.xyxy[3],
                    confidence: b.confidence,
                    class_id: b.class_id,
                    class_name: class_name.to_string(),
                }),
                None => dropped += 1,
            }
        }
    }

    if dropped > 0 {
        tracing::warn!(dropped, "Discarded detector boxes with non-finite values");
    }

    if detections.len() > max_detections {
        tracing::debug!(
            total = detections.len(),
            max_detections,
            "Truncating detections"
        );
        detections.truncate(max_detections);
    }

    detections
}

/// Enforce `x1 <= x2`, `y1 <= y2` and a confidence in `[0, 1]`.
fn sanitize(raw: RawBox) -> Option<RawBox> {
    if !raw.confidence.is_finite() || raw.xyxy.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let [x1, y1, x2, y2] = raw.xyxy;
    Some(RawBox {
        xyxy: [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)],
        confidence: raw.confidence.clamp(0.0, 1.0),
        class_id: raw.class_id,
    })
}
