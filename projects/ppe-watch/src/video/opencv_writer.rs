use super::{VideoSink, VideoSpec};
use crate::error::{PipelineError, Result};
use crate::pipeline::types::Frame;
use opencv::{
    core::Size,
    prelude::*,
    videoio::VideoWriter,
};
use std::path::{Path, PathBuf};

/// MPEG-4 Part 2 writer, the same container the viewers already play back.
pub struct OpencvSink {
    writer: Option<VideoWriter>,
    path: PathBuf,
    spec: VideoSpec,
    frames_written: usize,
}

impl OpencvSink {
    pub fn create(path: &Path, spec: VideoSpec) -> Result<Self> {
        let failed =
            |e: opencv::Error| PipelineError::sink_write(format!("{}: {}", path.display(), e));

        let path_str = path.to_str().ok_or_else(|| {
            PipelineError::sink_write(format!("non UTF-8 output path: {}", path.display()))
        })?;
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v').map_err(failed)?;
        let writer = VideoWriter::new(
            path_str,
            fourcc,
            spec.fps,
            Size::new(spec.width, spec.height),
            true,
        )
        .map_err(failed)?;

        if !writer.is_opened().map_err(failed)? {
            return Err(PipelineError::sink_write(format!(
                "failed to open video writer at {}",
                path.display()
            )));
        }

        tracing::info!(
            "OpencvSink: writing {} ({}x{} @ {:.2} fps)",
            path.display(),
            spec.width,
            spec.height,
            spec.fps
        );

        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            spec,
            frames_written: 0,
        })
    }
}

impl VideoSink for OpencvSink {
    fn spec(&self) -> VideoSpec {
        self.spec
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            PipelineError::invalid_state(format!("write to closed sink {}", self.path.display()))
        })?;
        self.spec.check(frame)?;
        writer
            .write(&frame.mat)
            .map_err(|e| PipelineError::sink_write(format!("{}: {}", self.path.display(), e)))?;
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .release()
                .map_err(|e| PipelineError::sink_write(format!("{}: {}", self.path.display(), e)))?;
            tracing::info!(
                "OpencvSink: closed {} after {} frames",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }
}

impl Drop for OpencvSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("OpencvSink: {}", e);
        }
    }
}
