// Detection pipeline: read -> detect -> annotate -> (artifact, live consumer)
//
// The pipeline is a pull-based iterator. Nothing happens between `next()` calls,
// so a slow consumer stalls capture instead of buffering frames.

use crate::error::{PipelineError, Result};
use crate::pipeline::annotate::Annotator;
use crate::pipeline::detection::Detector;
use crate::pipeline::types::{CancelToken, Frame, PipelineState, PipelineStats};
use crate::run_report::ensure_output_dir;
use crate::video::opencv_writer::OpencvSink;
use crate::video::{open_source, FrameSource, Origin, VideoSink};
use std::path::Path;
use std::sync::Arc;

/// One run over one source, writing one artifact.
///
/// Every frame that leaves `next()` has already been appended to the sink, and
/// frames leave in read order. Frames whose detection failed are absent from both.
/// Source and sink are released on exhaustion, cancellation, fatal error or drop.
pub struct DetectionPipeline {
    source: Box<dyn FrameSource>,
    sink: Box<dyn VideoSink>,
    detector: Arc<dyn Detector>,
    annotator: Annotator,
    cancel: CancelToken,
    state: PipelineState,
    stats: PipelineStats,
}

impl DetectionPipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        sink: Box<dyn VideoSink>,
        detector: Arc<dyn Detector>,
        annotator: Annotator,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            sink,
            detector,
            annotator,
            cancel,
            state: PipelineState::Running,
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn is_bounded(&self) -> bool {
        self.source.is_bounded()
    }

    pub fn frame_count(&self) -> Option<usize> {
        self.source.frame_count()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Consumes the remaining frames without a live consumer.
    pub fn finish(mut self) -> Result<PipelineStats> {
        for frame in self.by_ref() {
            frame?;
        }
        Ok(self.stats)
    }

    /// Stops the run and releases source and sink. A run that had not reached
    /// the end of its source is recorded as cancelled.
    pub fn close(&mut self) -> Result<PipelineStats> {
        if self.state == PipelineState::Running {
            self.stats.cancelled = true;
        }
        self.drain()?;
        Ok(self.stats)
    }

    fn step(&mut self) -> Result<Option<Frame>> {
        loop {
            if self.cancel.is_cancelled() {
                self.stats.cancelled = true;
                return Ok(None);
            }

            let Some(frame) = self.source.next_frame()? else {
                return Ok(None);
            };
            self.stats.frames_read += 1;

            let detections = match self.detector.detect(&frame) {
                Ok(detections) => detections,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("Skipping frame {}: {}", frame.index, e);
                    self.stats.frames_skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let (frame, drawn) = self.annotator.annotate(frame, &detections)?;
            if drawn > 0 {
                tracing::debug!("Frame {}: {} overlay(s)", frame.index, drawn);
            }

            self.sink.write(&frame)?;
            self.stats.frames_written += 1;
            return Ok(Some(frame));
        }
    }

    fn drain(&mut self) -> Result<()> {
        if self.state == PipelineState::Done {
            return Ok(());
        }
        self.state = PipelineState::Draining;
        self.source.close();
        let closed = self.sink.close();
        self.state = PipelineState::Done;

        tracing::info!(
            "Pipeline drained: read={} written={} skipped={} cancelled={}",
            self.stats.frames_read,
            self.stats.frames_written,
            self.stats.frames_skipped,
            self.stats.cancelled
        );
        closed
    }
}

impl Iterator for DetectionPipeline {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != PipelineState::Running {
            return None;
        }

        match self.step() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => self.drain().err().map(Err),
            Err(e) => {
                tracing::error!("Pipeline failed: {}", e);
                if let Err(close_err) = self.drain() {
                    tracing::warn!("Error while draining after failure: {}", close_err);
                }
                Some(Err(e))
            }
        }
    }
}

impl Drop for DetectionPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            tracing::warn!("Error while draining pipeline on drop: {}", e);
        }
    }
}

/// Opens the source, prepares the output directory and opens the artifact writer.
///
/// The source is opened first, so an unavailable input never creates output.
pub fn process(
    origin: &Origin,
    output_path: &Path,
    detector: Arc<dyn Detector>,
    annotator: Annotator,
    cancel: CancelToken,
) -> Result<DetectionPipeline> {
    let source = open_source(origin)?;

    ensure_output_dir(output_path).map_err(|e| {
        PipelineError::sink_write(format!(
            "creating directory for {}: {}",
            output_path.display(),
            e
        ))
    })?;
    let sink = OpencvSink::create(output_path, source.spec())?;

    tracing::info!(
        "Starting {} pipeline {} -> {}",
        if source.is_bounded() { "file" } else { "live" },
        origin,
        output_path.display()
    );

    Ok(DetectionPipeline::new(
        source,
        Box::new(sink),
        detector,
        annotator,
        cancel,
    ))
}
