pub mod encoder;
pub mod opencv_reader;
pub mod opencv_writer;
pub mod processor;

use crate::error::{PipelineError, Result};
use crate::pipeline::types::Frame;
use std::fmt;
use std::path::PathBuf;

/// Where frames come from: a finite file or an unbounded capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File(PathBuf),
    Device(i32),
}

impl Origin {
    /// A bare integer selects a capture device, anything else is a file path.
    pub fn parse(value: &str) -> Self {
        match value.trim().parse::<i32>() {
            Ok(index) => Origin::Device(index),
            Err(_) => Origin::File(PathBuf::from(value)),
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Origin::File(_))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::File(path) => write!(f, "{}", path.display()),
            Origin::Device(index) => write!(f, "device {}", index),
        }
    }
}

/// Frame geometry and rate, fixed when a source or sink is opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoSpec {
    pub width: i32,
    pub height: i32,
    pub fps: f64,
}

impl VideoSpec {
    /// Rejects frames whose dimensions differ from the ones captured at open time.
    pub fn check(&self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(PipelineError::sink_write(format!(
                "frame {} is {}x{}, sink was opened for {}x{}",
                frame.index,
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// Pull-based sequence of frames. `Ok(None)` marks end of stream.
pub trait FrameSource: Send {
    fn spec(&self) -> VideoSpec;

    /// False for capture devices, which only end on cancellation or failure.
    fn is_bounded(&self) -> bool;

    /// Container frame count, when the source knows it.
    fn frame_count(&self) -> Option<usize> {
        None
    }

    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Releases the underlying handle. Idempotent.
    fn close(&mut self);
}

/// Append-only video writer bound to one output path.
pub trait VideoSink: Send {
    fn spec(&self) -> VideoSpec;

    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flushes and releases the writer. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Opens the OpenCV capture backend for an origin.
pub fn open_source(origin: &Origin) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(opencv_reader::OpencvSource::open(origin)?))
}
