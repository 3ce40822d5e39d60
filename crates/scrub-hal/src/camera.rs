//! Generic `Camera` trait and the frame sources the assistant ships with.
//!
//! The pipeline consumes exactly one still frame per cycle, so a driver only
//! has to answer [`Camera::capture`].  Two sources are provided:
//!
//! - [`PpmFileCamera`] re-reads a binary PPM on every capture.  Point an
//!   external grabber (e.g. `ffmpeg -f v4l2 … -update 1 frame.ppm`) at the
//!   same path and the pipeline always sees the latest frame.
//! - [`StaticCamera`] hands back a fixed frame; used by tests and demos.

use std::path::{Path, PathBuf};

use scrub_types::ScrubError;
use tracing::debug;

use crate::ppm;

/// A raw image frame returned by a camera driver.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Packed RGB24 pixel data, row-major, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl CameraFrame {
    /// Frame filled with a single RGB colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self { width, height, data }
    }

    /// Paint an axis-aligned rectangle (clipped to the frame).
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgb: [u8; 3]) {
        let x_end = (x + width).min(self.width);
        let y_end = (y + height).min(self.height);
        for row in y..y_end {
            for col in x..x_end {
                let i = (row as usize * self.width as usize + col as usize) * 3;
                self.data[i..i + 3].copy_from_slice(&rgb);
            }
        }
    }

    /// RGB triple at `(x, y)`.  Callers must stay inside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Check that the buffer length matches the declared dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`ScrubError::FrameProcessingFailure`] for empty or
    /// inconsistent frames.
    pub fn validate(&self) -> Result<(), ScrubError> {
        if self.width == 0 || self.height == 0 {
            return Err(ScrubError::FrameProcessingFailure(format!(
                "empty frame ({}x{})",
                self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * 3;
        if self.data.len() != expected {
            return Err(ScrubError::FrameProcessingFailure(format!(
                "frame buffer holds {} bytes, {}x{} RGB24 needs {expected}",
                self.data.len(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// A camera or image-capture device.
pub trait Camera: Send + Sync {
    /// Stable identifier for this camera, e.g. `"table_rgb"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`ScrubError::FrameAcquisitionFailure`] if the frame cannot be
    /// captured (e.g. the device is disconnected or the file is missing).
    fn capture(&mut self) -> Result<CameraFrame, ScrubError>;
}

/// Camera backed by a binary PPM (`P6`) file that is re-read on every
/// capture.
pub struct PpmFileCamera {
    id: String,
    path: PathBuf,
}

impl PpmFileCamera {
    pub fn new(id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Camera for PpmFileCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, ScrubError> {
        let frame = ppm::read_file(&self.path).map_err(|e| {
            ScrubError::FrameAcquisitionFailure(format!(
                "camera '{}' could not read {}: {e}",
                self.id,
                self.path.display()
            ))
        })?;
        debug!(camera = %self.id, width = frame.width, height = frame.height, "frame captured");
        Ok(frame)
    }
}

/// Camera that always returns the same frame.
pub struct StaticCamera {
    id: String,
    frame: CameraFrame,
}

impl StaticCamera {
    pub fn new(id: impl Into<String>, frame: CameraFrame) -> Self {
        Self {
            id: id.into(),
            frame,
        }
    }
}

impl Camera for StaticCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, ScrubError> {
        Ok(self.frame.clone())
    }
}
