/// Class index reserved for "no object" by the detection heads served
/// here. Detections with this class are dropped before they reach the
/// client.
pub const BACKGROUND_CLASS: usize = 0;

/// One detected object region in pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`, inclusive.
    pub roi_rect: [i32; 4],
    pub class_idx: usize,
    pub score: f32,
}
