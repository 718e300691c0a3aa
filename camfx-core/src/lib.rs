//! # camfx Core
//!
//! Real-time camera frame filter pipeline: a five-stage color chain over
//! BGRA frames, a shared live-tunable parameter store and bounded output
//! buffer pools.

// ============================================================================
// Frames / Buffers
// ============================================================================
pub mod format;
pub mod pool;

// ============================================================================
// Filtering
// ============================================================================
pub mod params;
pub mod stage;
pub mod engine;

// ============================================================================
// Frame Sources
// ============================================================================
pub mod config;
pub mod processor;
pub mod photo;

pub use config::EngineConfig;
pub use engine::{EngineError, FilterEngine};
pub use format::{ColorSpace, FormatDescription, PixelBuffer, PixelLayout};
pub use params::{FilterParameters, ParameterName, ParameterStore};
pub use pool::{BufferPool, PooledBuffer};
pub use processor::FrameProcessor;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
