use ndarray::ArrayView3;

use super::face_region::PixelRect;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("{len} byte(s) cannot hold a {width}x{height} frame with {channels} channel(s)")]
    LengthMismatch {
        len: usize,
        width: u32,
        height: u32,
        channels: u8,
    },
}

/// A captured camera frame: contiguous interleaved bytes in row-major order
/// plus the sequence id assigned by the frame source.
///
/// Once handed to the coordinator a frame is shared as `Arc<Frame>` and is
/// never mutated again. The compositor clones the pixels into its own
/// working buffer before blurring.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    sequence_id: u64,
}

impl Frame {
    /// Wraps `data` without checking its length. Callers that cannot
    /// vouch for the buffer use [`Frame::try_new`]; the coordinator refuses
    /// frames that are not [well formed](Frame::is_well_formed).
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, sequence_id: u64) -> Self {
        Self {
            data,
            width,
            height,
            channels,
            sequence_id,
        }
    }

    pub fn try_new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        sequence_id: u64,
    ) -> Result<Self, FrameError> {
        let frame = Self::new(data, width, height, channels, sequence_id);
        if frame.is_well_formed() {
            Ok(frame)
        } else {
            Err(FrameError::LengthMismatch {
                len: frame.data.len(),
                width,
                height,
                channels,
            })
        }
    }

    /// A frame filled with a single byte value, mostly useful for tests and
    /// synthetic sources.
    pub fn filled(width: u32, height: u32, channels: u8, value: u8, sequence_id: u64) -> Self {
        let len = (width as usize) * (height as usize) * (channels as usize);
        Self::new(vec![value; len], width, height, channels, sequence_id)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Whether the buffer holds exactly `width * height * channels` bytes.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.expected_len()
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the pixels inside `rect` into a new frame carrying the same
    /// sequence id. Returns `None` when the rectangle is empty or falls
    /// outside the frame, or when the frame itself is not well formed.
    pub fn crop(&self, rect: PixelRect) -> Option<Frame> {
        if !self.is_well_formed()
            || rect.is_empty()
            || rect.x + rect.width > self.width
            || rect.y + rect.height > self.height
        {
            return None;
        }
        let channels = self.channels as usize;
        let row_bytes = rect.width as usize * channels;
        let mut out = Vec::with_capacity(row_bytes * rect.height as usize);
        for row in 0..rect.height as usize {
            let start = ((rect.y as usize + row) * self.width as usize + rect.x as usize) * channels;
            out.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Some(Frame::new(
            out,
            rect.width,
            rect.height,
            self.channels,
            self.sequence_id,
        ))
    }

    fn expected_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * (self.channels as usize)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
