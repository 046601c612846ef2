/// A rectangle in integer pixel coordinates, already clamped to a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A detected face as a normalized rectangle (origin top-left, 0..1 on both
/// axes) tagged with the sequence id of the frame it was detected in.
///
/// Normalized coordinates let a region detected on one frame be drawn onto a
/// later frame, which is exactly what the compositor does when results lag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceRegion {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    sequence_id: u64,
}

impl FaceRegion {
    /// Builds a region, clamping it into the unit square. Non-finite inputs
    /// collapse to zero.
    pub fn new(x: f64, y: f64, width: f64, height: f64, sequence_id: u64) -> Self {
        let x1 = unit(x);
        let y1 = unit(y);
        let x2 = unit(x + width).max(x1);
        let y2 = unit(y + height).max(y1);
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            sequence_id,
        }
    }

    /// Builds a normalized region from pixel corners `(x1, y1, x2, y2)`.
    pub fn from_pixel_corners(
        corners: (f64, f64, f64, f64),
        frame_w: u32,
        frame_h: u32,
        sequence_id: u64,
    ) -> Self {
        let fw = frame_w.max(1) as f64;
        let fh = frame_h.max(1) as f64;
        let (x1, y1, x2, y2) = corners;
        Self::new(x1 / fw, y1 / fh, (x2 - x1) / fw, (y2 - y1) / fh, sequence_id)
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Pixel bounds of this region on a frame of the given size. Edges are
    /// floored/ceiled outward so a face is never under-covered.
    pub fn to_pixel_rect(&self, frame_w: u32, frame_h: u32) -> PixelRect {
        let fw = frame_w as f64;
        let fh = frame_h as f64;
        let x1 = (self.x * fw).floor().clamp(0.0, fw) as u32;
        let y1 = (self.y * fh).floor().clamp(0.0, fh) as u32;
        let x2 = ((self.x + self.width) * fw).ceil().clamp(0.0, fw) as u32;
        let y2 = ((self.y + self.height) * fh).ceil().clamp(0.0, fh) as u32;
        PixelRect {
            x: x1,
            y: y1,
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
        }
    }

    pub fn iou(&self, other: &FaceRegion) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}

fn unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
