// In-memory sources, sinks and detectors for pipeline tests.

use crate::error::{PipelineError, Result};
use crate::pipeline::detection::Detector;
use crate::pipeline::types::{Detection, Frame};
use crate::video::opencv_writer::OpencvSink;
use crate::video::{FrameSource, VideoSink, VideoSpec};
use opencv::core::{Mat, Scalar, Vec3b, CV_8UC3};
use opencv::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const FILL: u8 = 40;

pub fn solid_frame(index: usize, width: i32, height: i32, value: u8) -> Frame {
    let mat = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(value as f64))
        .unwrap();
    Frame::new(index, mat)
}

/// Solid frame with the read position stamped into pixel (0, 0).
pub fn synthetic_frame(index: usize, width: i32, height: i32) -> Frame {
    let mut frame = solid_frame(index, width, height, FILL);
    let marker = (index % 256) as u8;
    frame.mat.at_2d_mut::<Vec3b>(0, 0).unwrap().0 = [marker, marker, marker];
    frame
}

pub fn frame_marker(mat: &Mat) -> u8 {
    mat.at_2d::<Vec3b>(0, 0).unwrap().0[0]
}

pub fn frame_bytes(frame: &Frame) -> Vec<u8> {
    mat_bytes(&frame.mat)
}

pub fn mat_bytes(mat: &Mat) -> Vec<u8> {
    mat.data_bytes().unwrap().to_vec()
}

pub const ARTIFACT_SPEC: VideoSpec = VideoSpec {
    width: 64,
    height: 64,
    fps: 25.0,
};

/// Writes `count` synthetic frames to a real video file and closes it.
pub fn write_artifact(path: &Path, count: usize) {
    let mut sink = OpencvSink::create(path, ARTIFACT_SPEC).unwrap();
    for index in 0..count {
        sink.write(&synthetic_frame(index, ARTIFACT_SPEC.width, ARTIFACT_SPEC.height))
            .unwrap();
    }
    sink.close().unwrap();
}

/// Synthetic source; `total: None` behaves like a camera that never ends.
pub struct SyntheticSource {
    total: Option<usize>,
    next: usize,
    spec: VideoSpec,
    open_handles: Arc<AtomicUsize>,
    closed: bool,
}

impl SyntheticSource {
    pub fn bounded(total: usize, open_handles: Arc<AtomicUsize>) -> Self {
        Self::new(Some(total), open_handles)
    }

    pub fn unbounded(open_handles: Arc<AtomicUsize>) -> Self {
        Self::new(None, open_handles)
    }

    fn new(total: Option<usize>, open_handles: Arc<AtomicUsize>) -> Self {
        open_handles.fetch_add(1, Ordering::SeqCst);
        Self {
            total,
            next: 0,
            spec: ARTIFACT_SPEC,
            open_handles,
            closed: false,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn spec(&self) -> VideoSpec {
        self.spec
    }

    fn is_bounded(&self) -> bool {
        self.total.is_some()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Err(PipelineError::invalid_state("read from closed synthetic source"));
        }
        if self.total.is_some_and(|total| self.next >= total) {
            return Ok(None);
        }
        let frame = synthetic_frame(self.next, self.spec.width, self.spec.height);
        self.next += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Sink that keeps a copy of every written frame.
pub struct RecordingSink {
    pub frames: Arc<Mutex<Vec<Mat>>>,
    spec: VideoSpec,
    open_handles: Arc<AtomicUsize>,
    closed: bool,
    fail_at: Option<usize>,
}

impl RecordingSink {
    pub fn new(spec: VideoSpec, open_handles: Arc<AtomicUsize>) -> Self {
        open_handles.fetch_add(1, Ordering::SeqCst);
        Self {
            frames: Arc::new(Mutex::new(Vec::new())),
            spec,
            open_handles,
            closed: false,
            fail_at: None,
        }
    }

    /// Fails the write of the frame with this read index.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl VideoSink for RecordingSink {
    fn spec(&self) -> VideoSpec {
        self.spec
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.closed {
            return Err(PipelineError::invalid_state("write to closed recording sink"));
        }
        if self.fail_at == Some(frame.index) {
            return Err(PipelineError::sink_write("disk full"));
        }
        self.spec.check(frame)?;
        self.frames.lock().unwrap().push(frame.mat.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Detector answering from a per-frame script; unscripted frames have no detections.
#[derive(Default)]
pub struct ScriptedDetector {
    script: HashMap<usize, std::result::Result<Vec<Detection>, String>>,
}

impl ScriptedDetector {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_detections(mut self, index: usize, detections: Vec<Detection>) -> Self {
        self.script.insert(index, Ok(detections));
        self
    }

    pub fn failing_on(mut self, index: usize) -> Self {
        self.script
            .insert(index, Err(format!("bad geometry on frame {}", index)));
        self
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        match self.script.get(&frame.index) {
            Some(Ok(detections)) => Ok(detections.clone()),
            Some(Err(msg)) => Err(PipelineError::detection(msg.clone())),
            None => Ok(Vec::new()),
        }
    }
}
