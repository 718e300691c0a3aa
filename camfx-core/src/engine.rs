//! # Filter Engine
//!
//! Owns the prepared output format, the output buffer pool and a handle to
//! the shared parameter store, and pushes frames through the five-stage
//! filter chain.
//!
//! ## Lifecycle
//!
//! ```text
//!              prepare (ok)                 render
//! Unprepared ──────────────► Prepared ◄──────────────┐
//!     ▲                         │  └─────────────────┘
//!     └─────────────────────────┘
//!        reset / failed prepare
//! ```
//!
//! ## Threading
//!
//! Any number of renders may run at once; each holds the prepared state for
//! its whole duration. `prepare` and `reset` wait for in-flight renders to
//! finish before swapping state, so a render never sees a half-replaced pool.
//! Parameters are copied once at the start of each render.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::format::{ColorSpace, FormatDescription, FormatError, PixelBuffer, PixelLayout};
use crate::params::{FilterParameters, ParameterStore};
use crate::pool::{BufferPool, PoolError, PoolOptions, PoolStats, PooledBuffer};
use crate::stage::{FilterChain, StageKind, WorkingImage};

/// Row alignment of output buffers, in bytes
pub const OUTPUT_ROW_ALIGNMENT: usize = 64;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Filter engine is not prepared")]
    NotPrepared,
    #[error("Unsupported pixel format {0} (only BGRA is accepted)")]
    UnsupportedPixelFormat(PixelLayout),
    #[error("Invalid format: {0}")]
    InvalidFormat(#[from] FormatError),
    #[error("Output pool allocation failed: {0}")]
    PoolAllocationFailure(PoolError),
    #[error("{0} stage produced no output")]
    FilterStageFailure(StageKind),
    #[error("Output buffer pool exhausted")]
    Exhausted,
    #[error(
        "Frame is {}x{} {}, engine prepared for {}x{} {}",
        .actual.width, .actual.height, .actual.layout,
        .expected.width, .expected.height, .expected.layout
    )]
    FormatMismatch {
        expected: FormatDescription,
        actual: FormatDescription,
    },
}

impl EngineError {
    /// Per-frame failure: drop this frame and carry on with the next one
    pub fn is_dropped_frame(&self) -> bool {
        matches!(
            self,
            Self::FilterStageFailure(_) | Self::Exhausted | Self::FormatMismatch { .. }
        )
    }
}

impl From<PoolError> for EngineError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { .. } => Self::Exhausted,
            other => Self::PoolAllocationFailure(other),
        }
    }
}

struct PreparedState {
    input_format: FormatDescription,
    output_format: FormatDescription,
    color_space: ColorSpace,
    decode_table: [f32; 256],
    pool: BufferPool,
}

pub struct FilterEngine {
    parameters: Arc<ParameterStore>,
    pool_options: PoolOptions,
    state: RwLock<Option<PreparedState>>,
}

impl FilterEngine {
    pub fn new(parameters: Arc<ParameterStore>) -> Self {
        Self::with_pool_options(parameters, PoolOptions::default())
    }

    pub fn with_config(parameters: Arc<ParameterStore>, config: &EngineConfig) -> Self {
        Self::with_pool_options(parameters, config.pool_options())
    }

    pub fn with_pool_options(parameters: Arc<ParameterStore>, pool_options: PoolOptions) -> Self {
        Self {
            parameters,
            pool_options,
            state: RwLock::new(None),
        }
    }

    /// Get ready to render frames of `input_format`.
    ///
    /// Drops any previous state first; if anything below fails the engine is
    /// left unprepared. Returns the format of the buffers `render` produces.
    pub fn prepare(
        &self,
        input_format: &FormatDescription,
        output_retained_buffer_count_hint: usize,
    ) -> Result<FormatDescription, EngineError> {
        let mut state = self.state.write();
        if let Some(previous) = state.take() {
            tracing::debug!(
                "Discarding prepared state for {}x{} (pool generation {})",
                previous.input_format.width,
                previous.input_format.height,
                previous.pool.generation()
            );
        }

        if input_format.layout != PixelLayout::Bgra32 {
            tracing::warn!("Rejecting input pixel format {}", input_format.layout);
            return Err(EngineError::UnsupportedPixelFormat(input_format.layout));
        }
        input_format.validate()?;

        let color_space = input_format.color_space();
        let output_format = derive_output_format(input_format);
        let pool = BufferPool::allocate(
            output_format,
            color_space,
            output_retained_buffer_count_hint,
            self.pool_options,
        )
        .map_err(EngineError::PoolAllocationFailure)?;
        pool.preallocate(output_retained_buffer_count_hint)
            .map_err(EngineError::PoolAllocationFailure)?;

        tracing::debug!(
            "Prepared {}x{} {:?}, {} output buffers (pool generation {})",
            output_format.width,
            output_format.height,
            color_space,
            pool.threshold(),
            pool.generation()
        );

        *state = Some(PreparedState {
            input_format: *input_format,
            output_format,
            color_space,
            decode_table: color_space.decode_table(),
            pool,
        });
        Ok(output_format)
    }

    /// Release the pool and cached formats. Safe to call repeatedly.
    pub fn reset(&self) {
        if self.state.write().take().is_some() {
            tracing::debug!("Filter engine reset");
        }
    }

    /// Filter one frame with the current parameters
    pub fn render(&self, input: &PixelBuffer) -> Result<PooledBuffer, EngineError> {
        let params = self.parameters.snapshot();
        self.render_with(input, &params)
    }

    /// Filter one frame with an explicit parameter snapshot
    pub fn render_with(
        &self,
        input: &PixelBuffer,
        params: &FilterParameters,
    ) -> Result<PooledBuffer, EngineError> {
        let state = self.state.read();
        let prepared = state.as_ref().ok_or(EngineError::NotPrepared)?;

        if !input.format().same_geometry(&prepared.input_format) {
            return Err(EngineError::FormatMismatch {
                expected: prepared.input_format,
                actual: *input.format(),
            });
        }

        let mut output = prepared.pool.checkout()?;

        let mut image = WorkingImage::from_bgra(input, &prepared.decode_table);
        FilterChain::from_parameters(params)
            .apply(&mut image)
            .map_err(|e| {
                tracing::debug!("Filter chain failed: {}", e);
                EngineError::FilterStageFailure(e.stage())
            })?;
        image.write_bgra(&mut output, prepared.color_space);

        Ok(output)
    }

    pub fn is_prepared(&self) -> bool {
        self.state.read().is_some()
    }

    pub fn input_format(&self) -> Option<FormatDescription> {
        self.state.read().as_ref().map(|s| s.input_format)
    }

    pub fn output_format(&self) -> Option<FormatDescription> {
        self.state.read().as_ref().map(|s| s.output_format)
    }

    pub fn output_color_space(&self) -> Option<ColorSpace> {
        self.state.read().as_ref().map(|s| s.color_space)
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.state.read().as_ref().map(|s| s.pool.stats())
    }

    pub fn parameters(&self) -> &Arc<ParameterStore> {
        &self.parameters
    }
}

/// Output buffers: input geometry, BGRA, aligned rows, input color metadata
fn derive_output_format(input: &FormatDescription) -> FormatDescription {
    let mut attachments = input.attachments.propagated();
    attachments.color_space = Some(input.color_space());

    let row = input.width as usize * 4;
    FormatDescription::bgra(input.width, input.height)
        .with_bytes_per_row(row.div_ceil(OUTPUT_ROW_ALIGNMENT) * OUTPUT_ROW_ALIGNMENT)
        .with_attachments(attachments)
}

// ============================================================================
// Tests
// ============================================================================
