use serde::Serialize;

/// Label attached to every detection this service reports.
pub const VARROA_CLASS_NAME: &str = "varroa_mite";

/// Detection result in original image pixel coordinates.
/// Serialized as-is into the HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    #[serde(rename = "class")]
    pub class_id: i64,
    pub class_name: String,
}

/// One box as reported by a detector backend, before validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    /// Corners as `[x1, y1, x2, y2]`.
    pub xyxy: [f32; 4],
    pub confidence: f32,
    pub class_id: i64,
}

/// Boxes for one image of a detector batch. May be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultGroup {
    pub boxes: Vec<RawBox>,
}

impl ResultGroup {
    pub fn new(boxes: Vec<RawBox>) -> Self {
        Self { boxes }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}
