//! # Pixel Formats
//!
//! Buffer layouts, color metadata and the owned pixel buffer that travels
//! from the frame source, through the filter engine, to the sink.
//!
//! ```text
//! FormatDescription ─┬─ width / height / bytes_per_row
//!                    ├─ PixelLayout (BGRA, RGBA, ARGB, NV12)
//!                    └─ ColorAttachments (primaries, matrix, transfer, space)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Row stride of {stride} bytes is too small for {width} {layout} pixels")]
    StrideTooSmall {
        stride: usize,
        width: u32,
        layout: PixelLayout,
    },
    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },
    #[error("Buffer size overflows for {width}x{height}")]
    SizeOverflow { width: u32, height: u32 },
}

// ============================================================================
// Pixel Layout
// ============================================================================

/// Memory layout of a frame as delivered by the capture layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    /// 8-bit B, G, R, A packed into 32 bits (the only layout the engine accepts)
    Bgra32,
    /// 8-bit R, G, B, A packed into 32 bits
    Rgba32,
    /// 8-bit A, R, G, B packed into 32 bits
    Argb32,
    /// Bi-planar 4:2:0 YCbCr (Y plane, interleaved CbCr plane)
    Nv12,
}

impl PixelLayout {
    pub fn fourcc(&self) -> &'static str {
        match self {
            Self::Bgra32 => "BGRA",
            Self::Rgba32 => "RGBA",
            Self::Argb32 => "ARGB",
            Self::Nv12 => "NV12",
        }
    }

    /// Bytes per pixel for packed layouts, `None` for planar ones
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Bgra32 | Self::Rgba32 | Self::Argb32 => Some(4),
            Self::Nv12 => None,
        }
    }

    /// Smallest legal row stride for `width` pixels
    pub fn min_bytes_per_row(&self, width: u32) -> usize {
        let width = width as usize;
        match self.bytes_per_pixel() {
            Some(bpp) => width * bpp,
            None => width,
        }
    }

    fn rows(&self, height: u32) -> usize {
        let height = height as usize;
        match self {
            Self::Nv12 => height + height.div_ceil(2),
            _ => height,
        }
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.fourcc())
    }
}

// ============================================================================
// Color Metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorPrimaries {
    ItuR709,
    P3D65,
    ItuR2020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum YCbCrMatrix {
    ItuR601,
    ItuR709,
    ItuR2020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferFunction {
    ItuR709,
    Srgb,
    Linear,
}

/// Color space an image is encoded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    /// Device-dependent RGB (what the capture layer hands out untagged)
    #[default]
    DeviceRgb,
    Srgb,
    /// Wide-gamut P3 with D65 white point
    DisplayP3,
    /// sRGB primaries with a linear transfer curve
    LinearSrgb,
}

impl ColorSpace {
    pub fn is_wide_gamut(&self) -> bool {
        matches!(self, Self::DisplayP3)
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Self::LinearSrgb)
    }

    /// Encoded sample (0.0..=1.0) to linear light
    pub fn to_linear(&self, value: f32) -> f32 {
        if self.is_linear() {
            return value;
        }
        if value <= 0.04045 {
            value / 12.92
        } else {
            ((value + 0.055) / 1.055).powf(2.4)
        }
    }

    /// Linear light to encoded sample, clamped to 0.0..=1.0
    pub fn from_linear(&self, value: f32) -> f32 {
        let value = value.clamp(0.0, 1.0);
        if self.is_linear() {
            return value;
        }
        if value <= 0.003_130_8 {
            value * 12.92
        } else {
            1.055 * value.powf(1.0 / 2.4) - 0.055
        }
    }

    /// Lookup table from 8-bit encoded samples to linear light
    pub fn decode_table(&self) -> [f32; 256] {
        let mut table = [0.0f32; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = self.to_linear(i as f32 / 255.0);
        }
        table
    }
}

/// Color attachments carried alongside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorAttachments {
    pub primaries: Option<ColorPrimaries>,
    pub ycbcr_matrix: Option<YCbCrMatrix>,
    pub transfer_function: Option<TransferFunction>,
    pub color_space: Option<ColorSpace>,
}

impl ColorAttachments {
    /// Explicit color space, else Display P3 for P3 primaries, else device RGB
    pub fn resolved_color_space(&self) -> ColorSpace {
        if let Some(space) = self.color_space {
            return space;
        }
        match self.primaries {
            Some(ColorPrimaries::P3D65) => ColorSpace::DisplayP3,
            _ => ColorSpace::DeviceRgb,
        }
    }

    /// Attachments that follow a frame into a derived buffer.
    ///
    /// Matrix and transfer function only travel together with primaries.
    pub fn propagated(&self) -> ColorAttachments {
        match self.primaries {
            Some(primaries) => ColorAttachments {
                primaries: Some(primaries),
                ycbcr_matrix: self.ycbcr_matrix,
                transfer_function: self.transfer_function,
                color_space: None,
            },
            None => ColorAttachments::default(),
        }
    }
}

// ============================================================================
// Format Description
// ============================================================================

/// Geometry, layout and color metadata of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescription {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    /// Row stride in bytes (may include padding)
    pub bytes_per_row: usize,
    #[serde(default)]
    pub attachments: ColorAttachments,
}

impl FormatDescription {
    /// Tightly packed format with no color attachments
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            layout,
            bytes_per_row: layout.min_bytes_per_row(width),
            attachments: ColorAttachments::default(),
        }
    }

    pub fn bgra(width: u32, height: u32) -> Self {
        Self::new(width, height, PixelLayout::Bgra32)
    }

    pub fn with_bytes_per_row(mut self, bytes_per_row: usize) -> Self {
        self.bytes_per_row = bytes_per_row;
        self
    }

    pub fn with_attachments(mut self, attachments: ColorAttachments) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        if self.width == 0 || self.height == 0 {
            return Err(FormatError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.bytes_per_row < self.layout.min_bytes_per_row(self.width) {
            return Err(FormatError::StrideTooSmall {
                stride: self.bytes_per_row,
                width: self.width,
                layout: self.layout,
            });
        }
        Ok(())
    }

    /// Bytes needed to hold one buffer of this format
    pub fn buffer_len(&self) -> Result<usize, FormatError> {
        self.validate()?;
        self.bytes_per_row
            .checked_mul(self.layout.rows(self.height))
            .ok_or(FormatError::SizeOverflow {
                width: self.width,
                height: self.height,
            })
    }

    /// Same width, height and layout (stride and attachments may differ)
    pub fn same_geometry(&self, other: &FormatDescription) -> bool {
        self.width == other.width && self.height == other.height && self.layout == other.layout
    }

    pub fn color_space(&self) -> ColorSpace {
        self.attachments.resolved_color_space()
    }
}

// ============================================================================
// Pixel Buffer
// ============================================================================

/// An owned frame: format description plus backing bytes
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    format: FormatDescription,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Zero-filled buffer
    pub fn new(format: FormatDescription) -> Result<Self, FormatError> {
        let len = format.buffer_len()?;
        Ok(Self {
            format,
            data: vec![0u8; len],
        })
    }

    /// Wrap existing bytes; extra trailing bytes are kept
    pub fn from_data(format: FormatDescription, data: Vec<u8>) -> Result<Self, FormatError> {
        let needed = format.buffer_len()?;
        if data.len() < needed {
            return Err(FormatError::BufferTooSmall {
                needed,
                actual: data.len(),
            });
        }
        Ok(Self { format, data })
    }

    /// Packed 32-bit buffer with every pixel set to `pixel` (in layout order)
    pub fn solid(format: FormatDescription, pixel: [u8; 4]) -> Result<Self, FormatError> {
        let mut buffer = Self::new(format)?;
        for y in 0..format.height as usize {
            if let Some(row) = buffer.row_mut(y) {
                for chunk in row.chunks_exact_mut(4) {
                    chunk.copy_from_slice(&pixel);
                }
            }
        }
        Ok(buffer)
    }

    /// Storage handed out by a buffer pool; length already matches the format
    pub(crate) fn from_pool_storage(format: FormatDescription, data: Vec<u8>) -> Self {
        Self { format, data }
    }

    pub fn format(&self) -> &FormatDescription {
        &self.format
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.format.bytes_per_row
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Pixel bytes of row `y`, without stride padding
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        if y >= self.format.height as usize {
            return None;
        }
        let start = y * self.format.bytes_per_row;
        let len = self.format.layout.min_bytes_per_row(self.format.width);
        self.data.get(start..start + len)
    }

    pub fn row_mut(&mut self, y: usize) -> Option<&mut [u8]> {
        if y >= self.format.height as usize {
            return None;
        }
        let start = y * self.format.bytes_per_row;
        let len = self.format.layout.min_bytes_per_row(self.format.width);
        self.data.get_mut(start..start + len)
    }

    /// Raw 32-bit pixel at (x, y) in layout byte order
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if self.format.layout.bytes_per_pixel() != Some(4) || x >= self.format.width {
            return None;
        }
        let row = self.row(y as usize)?;
        let start = x as usize * 4;
        let bytes = row.get(start..start + 4)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

// ============================================================================
// Tests
// ============================================================================
