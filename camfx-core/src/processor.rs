//! # Frame Processor
//!
//! Wraps a [`FilterEngine`] for a frame source (live preview or still
//! capture). Frames go in, filtered buffers come out; failures turn into
//! dropped frames and the source keeps delivering.
//!
//! The engine is re-prepared only when the incoming format differs from the
//! one it was last prepared for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::engine::{EngineError, FilterEngine};
use crate::format::{FormatDescription, PixelBuffer};
use crate::params::ParameterStore;
use crate::pool::PooledBuffer;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub frames_rendered: u64,
    pub frames_dropped: u64,
    pub prepares: u64,
    pub failed_prepares: u64,
}

pub struct FrameProcessor {
    engine: FilterEngine,
    retained_buffers: usize,
    prepared_for: Mutex<Option<FormatDescription>>,
    frames_rendered: AtomicU64,
    frames_dropped: AtomicU64,
    prepares: AtomicU64,
    failed_prepares: AtomicU64,
}

impl FrameProcessor {
    pub fn new(
        parameters: Arc<ParameterStore>,
        retained_buffers: usize,
        config: &EngineConfig,
    ) -> Self {
        Self {
            engine: FilterEngine::with_config(parameters, config),
            retained_buffers,
            prepared_for: Mutex::new(None),
            frames_rendered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            prepares: AtomicU64::new(0),
            failed_prepares: AtomicU64::new(0),
        }
    }

    /// Live-preview processor
    pub fn for_video(parameters: Arc<ParameterStore>, config: &EngineConfig) -> Self {
        Self::new(parameters, config.video_retained_buffers, config)
    }

    /// Still-capture processor
    pub fn for_photo(parameters: Arc<ParameterStore>, config: &EngineConfig) -> Self {
        Self::new(parameters, config.photo_retained_buffers, config)
    }

    /// Filter one frame. `None` means the frame was dropped.
    pub fn process(&self, frame: &PixelBuffer) -> Option<PooledBuffer> {
        match self.try_process(frame) {
            Ok(output) => {
                self.frames_rendered.fetch_add(1, Ordering::Relaxed);
                Some(output)
            }
            Err(e) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping frame: {}", e);
                None
            }
        }
    }

    /// Like [`process`](Self::process) but hands back the reason for a drop
    pub fn try_process(&self, frame: &PixelBuffer) -> Result<PooledBuffer, EngineError> {
        self.ensure_prepared(frame.format())?;
        self.engine.render(frame)
    }

    fn ensure_prepared(&self, format: &FormatDescription) -> Result<(), EngineError> {
        let mut prepared_for = self.prepared_for.lock();
        if prepared_for.as_ref() == Some(format) && self.engine.is_prepared() {
            return Ok(());
        }

        *prepared_for = None;
        self.prepares.fetch_add(1, Ordering::Relaxed);
        match self.engine.prepare(format, self.retained_buffers) {
            Ok(output) => {
                tracing::info!(
                    "Prepared for {}x{} {} -> {} bytes/row",
                    format.width,
                    format.height,
                    format.layout,
                    output.bytes_per_row
                );
                *prepared_for = Some(*format);
                Ok(())
            }
            Err(e) => {
                self.failed_prepares.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Tear down the engine; the next frame prepares it again
    pub fn reset(&self) {
        let mut prepared_for = self.prepared_for.lock();
        *prepared_for = None;
        self.engine.reset();
    }

    pub fn engine(&self) -> &FilterEngine {
        &self.engine
    }

    pub fn retained_buffers(&self) -> usize {
        self.retained_buffers
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            prepares: self.prepares.load(Ordering::Relaxed),
            failed_prepares: self.failed_prepares.load(Ordering::Relaxed),
        }
    }
}
