// Frame -> multipart chunk streams, for the live pipeline and for artifact replay.

use crate::error::{PipelineError, Result};
use crate::pipeline::types::Frame;
use crate::video::encoder::{frame_chunk, FrameEncoder};
use crate::video::opencv_reader::OpencvSource;
use crate::video::{FrameSource, Origin};
use std::path::Path;

/// Encodes each frame of an inner sequence and wraps it in a multipart chunk.
pub struct MjpegStream<I, E> {
    frames: I,
    encoder: E,
}

pub fn mjpeg<I, E>(frames: I, encoder: E) -> MjpegStream<I, E>
where
    I: Iterator<Item = Result<Frame>>,
    E: FrameEncoder,
{
    MjpegStream { frames, encoder }
}

impl<I, E> MjpegStream<I, E> {
    pub fn into_inner(self) -> I {
        self.frames
    }
}

impl<I, E> Iterator for MjpegStream<I, E>
where
    I: Iterator<Item = Result<Frame>>,
    E: FrameEncoder,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = match self.frames.next()? {
            Ok(frame) => frame,
            Err(e) => return Some(Err(e)),
        };
        Some(self.encoder.encode(&frame).map(|payload| frame_chunk(&payload)))
    }
}

/// Raw frames from a source, closing it once exhausted or failed.
pub struct SourceFrames {
    source: Box<dyn FrameSource>,
    done: bool,
}

impl SourceFrames {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.source.close();
    }
}

impl Iterator for SourceFrames {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl Drop for SourceFrames {
    fn drop(&mut self) {
        self.source.close();
    }
}

pub type ReplayStream<E> = MjpegStream<SourceFrames, E>;

/// Re-streams an existing artifact. No detection or annotation is run; the
/// overlays are already baked into its frames.
pub fn replay<E: FrameEncoder>(artifact: &Path, encoder: E) -> Result<ReplayStream<E>> {
    if !artifact.is_file() {
        return Err(PipelineError::artifact_not_found(
            artifact.display().to_string(),
        ));
    }
    let source = OpencvSource::open(&Origin::File(artifact.to_path_buf())).map_err(|e| match e {
        PipelineError::SourceUnavailable(msg) => PipelineError::ArtifactNotFound(msg),
        other => other,
    })?;
    tracing::info!("Replaying artifact {}", artifact.display());
    Ok(replay_source(Box::new(source), encoder))
}

pub fn replay_source<E: FrameEncoder>(source: Box<dyn FrameSource>, encoder: E) -> ReplayStream<E> {
    mjpeg(SourceFrames::new(source), encoder)
}
