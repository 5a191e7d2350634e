use opencv::core::Mat;
use opencv::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A decoded BGR frame together with its read position in the source.
///
/// Frames are moved, never cloned, from the source through annotation to both sinks.
pub struct Frame {
    pub index: usize,
    pub mat: Mat,
}

impl Frame {
    pub fn new(index: usize, mat: Mat) -> Self {
        Self { index, mat }
    }

    pub fn width(&self) -> i32 {
        self.mat.cols()
    }

    pub fn height(&self) -> i32 {
        self.mat.rows()
    }
}

/// Integer pixel rectangle in `(x1, y1)` top-left / `(x2, y2)` bottom-right form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// One model output for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_label: String,
    /// Already rounded up to the next hundredth.
    pub confidence: f32,
    pub bbox: BBox,
}

/// Cooperative cancellation flag, checked by the pipeline between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Lifecycle of a detection pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Running,
    Draining,
    Done,
}

/// Frame accounting for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_read: usize,
    pub frames_written: usize,
    /// Frames dropped from both sinks after a recovered detection failure.
    pub frames_skipped: usize,
    pub cancelled: bool,
}
