//! Frame type — decoded RGB pixel buffers and the conversions the models need.

use crate::types::PixelBox;

/// A decoded image: packed RGB bytes in row-major order.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap an RGB buffer. Fails if the length does not match `width * height * 3`.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Decode an encoded image (JPEG, PNG, ...) into an RGB frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| FrameError::InvalidImage(e.to_string()))?
            .to_rgb8();
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidImage("image has zero size".into()));
        }
        Ok(Self {
            data: img.into_raw(),
            width,
            height,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGB triple at (x, y). Caller guarantees bounds.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width as usize + x) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Copy of this frame with red and blue swapped (the channel order the plate detector expects).
    pub fn to_bgr(&self) -> Frame {
        let mut data = self.data.clone();
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Frame {
            data,
            width: self.width,
            height: self.height,
        }
    }

    /// Copy out the pixels inside `region`, clamped to the frame.
    ///
    /// Returns `None` when the clamped region is empty.
    pub fn crop(&self, region: &PixelBox) -> Option<Frame> {
        let left = region.left.clamp(0, self.width as i32) as usize;
        let right = region.right.clamp(0, self.width as i32) as usize;
        let top = region.top.clamp(0, self.height as i32) as usize;
        let bottom = region.bottom.clamp(0, self.height as i32) as usize;
        if right <= left || bottom <= top {
            return None;
        }

        let stride = self.width as usize * 3;
        let mut data = Vec::with_capacity((right - left) * (bottom - top) * 3);
        for y in top..bottom {
            let row = y * stride;
            data.extend_from_slice(&self.data[row + left * 3..row + right * 3]);
        }
        Some(Frame {
            data,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("invalid RGB length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
