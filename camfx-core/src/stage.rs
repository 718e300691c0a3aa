//! # Filter Stages
//!
//! The fixed five-stage enhancement chain. Every frame goes through the
//! same stages in the same order, each one consuming the previous stage's
//! output:
//!
//! ```text
//! BGRA in ─► decode ─► ColorControls ─► Exposure ─► Gamma ─► ColorPolynomial ─► SharpenLuminance ─► encode ─► BGRA out
//!                      (linear light, f32 RGBA working image)
//! ```
//!
//! Stages operate in linear light on an `f32` working image. Values are not
//! clamped between stages; clamping happens once, when the result is encoded
//! into the output buffer.

use std::fmt;

use thiserror::Error;

use crate::format::{ColorSpace, PixelBuffer};
use crate::params::FilterParameters;

/// Intrinsic sharpness of the luminance sharpen stage
pub const SHARPEN_INTRINSIC_SHARPNESS: f32 = 0.4;

/// Rec. 709 luma weights
const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    ColorControls,
    Exposure,
    Gamma,
    ColorPolynomial,
    SharpenLuminance,
}

impl StageKind {
    /// Chain order
    pub const ALL: [StageKind; 5] = [
        Self::ColorControls,
        Self::Exposure,
        Self::Gamma,
        Self::ColorPolynomial,
        Self::SharpenLuminance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ColorControls => "Color Controls",
            Self::Exposure => "Exposure",
            Self::Gamma => "Gamma",
            Self::ColorPolynomial => "Color Polynomial",
            Self::SharpenLuminance => "Sharpen Luminance",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("{stage}: input image is {width}x{height} but holds {len} pixels")]
    Geometry {
        stage: StageKind,
        width: usize,
        height: usize,
        len: usize,
    },
    #[error("{stage}: parameter is not a finite number")]
    NonFiniteParameter { stage: StageKind },
}

impl StageError {
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Geometry { stage, .. } | Self::NonFiniteParameter { stage } => *stage,
        }
    }
}

// ============================================================================
// Working Image
// ============================================================================

/// Linear-light RGBA image the stages read and write
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingImage {
    width: usize,
    height: usize,
    pixels: Vec<[f32; 4]>,
}

impl WorkingImage {
    /// Image with every pixel set to `rgba`
    pub fn filled(width: usize, height: usize, rgba: [f32; 4]) -> Self {
        Self {
            width,
            height,
            pixels: vec![rgba; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<[f32; 4]> {
        if x >= self.width {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, rgba: [f32; 4]) {
        if x < self.width {
            if let Some(slot) = self.pixels.get_mut(y * self.width + x) {
                *slot = rgba;
            }
        }
    }

    fn check_geometry(&self, stage: StageKind) -> Result<(), StageError> {
        if self.width == 0 || self.height == 0 || self.pixels.len() != self.width * self.height {
            return Err(StageError::Geometry {
                stage,
                width: self.width,
                height: self.height,
                len: self.pixels.len(),
            });
        }
        Ok(())
    }

    /// Decode a packed BGRA buffer through an 8-bit to linear table
    pub fn from_bgra(buffer: &PixelBuffer, decode: &[f32; 256]) -> Self {
        let width = buffer.width() as usize;
        let height = buffer.height() as usize;
        let stride = buffer.bytes_per_row();
        let data = buffer.data();
        let mut pixels = vec![[0.0f32; 4]; width * height];

        for_each_row(&mut pixels, width, |y, row| {
            let start = y * stride;
            let Some(bytes) = data.get(start..start + width * 4) else {
                return;
            };
            let src: &[[u8; 4]] = bytemuck::cast_slice(bytes);
            for (dst, bgra) in row.iter_mut().zip(src) {
                *dst = [
                    decode[bgra[2] as usize],
                    decode[bgra[1] as usize],
                    decode[bgra[0] as usize],
                    bgra[3] as f32 / 255.0,
                ];
            }
        });

        Self {
            width,
            height,
            pixels,
        }
    }

    /// Encode into a packed BGRA buffer of the same size
    pub fn write_bgra(&self, buffer: &mut PixelBuffer, color_space: ColorSpace) {
        let width = self.width.min(buffer.width() as usize);
        let stride = buffer.bytes_per_row();
        let pixels = &self.pixels;
        let src_width = self.width;

        for_each_row(buffer.data_mut(), stride, |y, row| {
            let Some(src) = pixels.get(y * src_width..y * src_width + width) else {
                return;
            };
            let dst: &mut [[u8; 4]] = bytemuck::cast_slice_mut(&mut row[..width * 4]);
            for (out, rgba) in dst.iter_mut().zip(src) {
                *out = [
                    quantize(color_space.from_linear(rgba[2])),
                    quantize(color_space.from_linear(rgba[1])),
                    quantize(color_space.from_linear(rgba[0])),
                    quantize(rgba[3]),
                ];
            }
        });
    }
}

fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Run `f` over consecutive rows of `row_len` elements
fn for_each_row<T, F>(data: &mut [T], row_len: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    if row_len == 0 {
        return;
    }

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        data.par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| f(y, row));
    }

    #[cfg(not(feature = "rayon"))]
    {
        data.chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| f(y, row));
    }
}

// ============================================================================
// Stages
// ============================================================================

/// One stage of the chain with its resolved numeric inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterStage {
    /// Saturation around luma, then brightness offset, then contrast around 0.5
    ColorControls {
        saturation: f32,
        brightness: f32,
        contrast: f32,
    },
    /// Scale by 2^ev
    Exposure { ev: f32 },
    /// Signed power curve
    Gamma { power: f32 },
    /// Per-channel cubic `c0 + c1*x + c2*x^2 + c3*x^3`
    ColorPolynomial {
        red: [f32; 4],
        green: [f32; 4],
        blue: [f32; 4],
    },
    /// Unsharp mask on luma, detail added equally to R, G and B
    SharpenLuminance { sharpness: f32 },
}

impl FilterStage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::ColorControls { .. } => StageKind::ColorControls,
            Self::Exposure { .. } => StageKind::Exposure,
            Self::Gamma { .. } => StageKind::Gamma,
            Self::ColorPolynomial { .. } => StageKind::ColorPolynomial,
            Self::SharpenLuminance { .. } => StageKind::SharpenLuminance,
        }
    }

    /// Check if the stage leaves every pixel untouched
    pub fn is_identity(&self) -> bool {
        match *self {
            Self::ColorControls {
                saturation,
                brightness,
                contrast,
            } => saturation == 1.0 && brightness == 0.0 && contrast == 1.0,
            Self::Exposure { ev } => ev == 0.0,
            Self::Gamma { power } => power == 1.0,
            Self::ColorPolynomial { red, green, blue } => {
                [red, green, blue].iter().all(|c| *c == [0.0, 1.0, 0.0, 0.0])
            }
            Self::SharpenLuminance { sharpness } => sharpness == 0.0,
        }
    }

    fn parameters_finite(&self) -> bool {
        match self {
            Self::ColorControls {
                saturation,
                brightness,
                contrast,
            } => [saturation, brightness, contrast].iter().all(|v| v.is_finite()),
            Self::Exposure { ev } => ev.is_finite(),
            Self::Gamma { power } => power.is_finite(),
            Self::ColorPolynomial { red, green, blue } => red
                .iter()
                .chain(green)
                .chain(blue)
                .all(|v| v.is_finite()),
            Self::SharpenLuminance { sharpness } => sharpness.is_finite(),
        }
    }

    /// Apply in place. Fails without touching the image when the stage
    /// cannot produce an output.
    pub fn apply(&self, image: &mut WorkingImage) -> Result<(), StageError> {
        let stage = self.kind();
        image.check_geometry(stage)?;
        if !self.parameters_finite() {
            return Err(StageError::NonFiniteParameter { stage });
        }
        if self.is_identity() {
            return Ok(());
        }

        let width = image.width;
        match *self {
            Self::ColorControls {
                saturation,
                brightness,
                contrast,
            } => for_each_row(&mut image.pixels, width, |_, row| {
                for px in row {
                    let luma = px[0] * LUMA[0] + px[1] * LUMA[1] + px[2] * LUMA[2];
                    for c in &mut px[..3] {
                        let saturated = luma + (*c - luma) * saturation;
                        *c = (saturated + brightness - 0.5) * contrast + 0.5;
                    }
                }
            }),
            Self::Exposure { ev } => {
                let gain = ev.exp2();
                for_each_row(&mut image.pixels, width, |_, row| {
                    for px in row {
                        for c in &mut px[..3] {
                            *c *= gain;
                        }
                    }
                });
            }
            Self::Gamma { power } => for_each_row(&mut image.pixels, width, |_, row| {
                for px in row {
                    for c in &mut px[..3] {
                        *c = c.signum() * c.abs().powf(power);
                    }
                }
            }),
            Self::ColorPolynomial { red, green, blue } => {
                let coefficients = [red, green, blue];
                for_each_row(&mut image.pixels, width, |_, row| {
                    for px in row {
                        for (c, k) in px[..3].iter_mut().zip(&coefficients) {
                            let x = *c;
                            *c = k[0] + x * (k[1] + x * (k[2] + x * k[3]));
                        }
                    }
                });
            }
            Self::SharpenLuminance { sharpness } => sharpen_luminance(image, sharpness),
        }
        Ok(())
    }
}

fn sharpen_luminance(image: &mut WorkingImage, sharpness: f32) {
    let width = image.width;
    let height = image.height;

    let luma: Vec<f32> = image
        .pixels
        .iter()
        .map(|px| px[0] * LUMA[0] + px[1] * LUMA[1] + px[2] * LUMA[2])
        .collect();

    // separable [1 2 1] / 4 blur, edges clamped
    let mut horizontal = vec![0.0f32; width * height];
    for_each_row(&mut horizontal, width, |y, row| {
        let src = &luma[y * width..(y + 1) * width];
        for (x, out) in row.iter_mut().enumerate() {
            let left = src[x.saturating_sub(1)];
            let right = src[(x + 1).min(width - 1)];
            *out = (left + 2.0 * src[x] + right) * 0.25;
        }
    });

    for_each_row(&mut image.pixels, width, |y, row| {
        let up = y.saturating_sub(1) * width;
        let mid = y * width;
        let down = (y + 1).min(height - 1) * width;
        for (x, px) in row.iter_mut().enumerate() {
            let blurred =
                (horizontal[up + x] + 2.0 * horizontal[mid + x] + horizontal[down + x]) * 0.25;
            let detail = (luma[mid + x] - blurred) * sharpness;
            for c in &mut px[..3] {
                *c += detail;
            }
        }
    });
}

// ============================================================================
// Filter Chain
// ============================================================================

/// The five stages in their fixed order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterChain {
    stages: [FilterStage; 5],
}

impl FilterChain {
    /// Resolve stage inputs from a parameter snapshot.
    ///
    /// The color controls stage takes its brightness from `contrast` and its
    /// contrast from `level`. The sharpen stage runs at its intrinsic
    /// sharpness; `sharpen` and `blur` are not read.
    pub fn from_parameters(params: &FilterParameters) -> Self {
        Self {
            stages: [
                FilterStage::ColorControls {
                    saturation: params.saturation,
                    brightness: params.contrast,
                    contrast: params.level,
                },
                FilterStage::Exposure {
                    ev: params.highlights + params.brightness_h,
                },
                FilterStage::Gamma {
                    power: params.shadows + params.brightness_s,
                },
                FilterStage::ColorPolynomial {
                    red: [0.0, 1.0, params.red, 0.0],
                    green: [0.0, 1.0, params.green, 0.0],
                    blue: [0.0, 1.0, params.blue, 0.0],
                },
                FilterStage::SharpenLuminance {
                    sharpness: SHARPEN_INTRINSIC_SHARPNESS,
                },
            ],
        }
    }

    pub fn stages(&self) -> &[FilterStage; 5] {
        &self.stages
    }

    /// Run every stage in order, stopping at the first one that fails
    pub fn apply(&self, image: &mut WorkingImage) -> Result<(), StageError> {
        for stage in &self.stages {
            stage.apply(image)?;
        }
        Ok(())
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::from_parameters(&FilterParameters::default())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(v: f32) -> WorkingImage {
        WorkingImage::filled(8, 8, [v, v, v, 1.0])
    }

    #[test]
    fn test_chain_order() {
        let chain = FilterChain::default();
        let kinds: Vec<_> = chain.stages().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, StageKind::ALL.to_vec());
    }

    #[test]
    fn test_color_controls_inputs_are_swapped() {
        let params = FilterParameters {
            contrast: 0.1,
            level: 1.3,
            ..FilterParameters::default()
        };
        let chain = FilterChain::from_parameters(&params);
        assert_eq!(
            chain.stages()[0],
            FilterStage::ColorControls {
                saturation: 1.0,
                brightness: 0.1,
                contrast: 1.3,
            }
        );
    }

    #[test]
    fn test_sharpen_ignores_parameters() {
        let params = FilterParameters {
            sharpen: 2.0,
            blur: 5.0,
            ..FilterParameters::default()
        };
        let chain = FilterChain::from_parameters(&params);
        assert_eq!(
            chain.stages()[4],
            FilterStage::SharpenLuminance {
                sharpness: SHARPEN_INTRINSIC_SHARPNESS
            }
        );
        assert_eq!(chain, FilterChain::default());
    }

    #[test]
    fn test_exposure_and_gamma() {
        let mut image = gray(0.25);
        FilterStage::Exposure { ev: 1.0 }.apply(&mut image).unwrap();
        assert_eq!(image.pixel(0, 0).unwrap()[0], 0.5);

        FilterStage::Gamma { power: 2.0 }.apply(&mut image).unwrap();
        assert!((image.pixel(3, 3).unwrap()[1] - 0.25).abs() < 1e-6);

        let mut negative = gray(-0.25);
        FilterStage::Gamma { power: 2.0 }.apply(&mut negative).unwrap();
        assert!((negative.pixel(0, 0).unwrap()[2] + 0.0625).abs() < 1e-6);
    }

    #[test]
    fn test_polynomial_tints_one_channel() {
        let mut image = gray(0.5);
        FilterStage::ColorPolynomial {
            red: [0.0, 1.0, 1.0, 0.0],
            green: [0.0, 1.0, 0.0, 0.0],
            blue: [0.0, 1.0, 0.0, 0.0],
        }
        .apply(&mut image)
        .unwrap();
        let px = image.pixel(1, 1).unwrap();
        assert_eq!(px[0], 0.75);
        assert_eq!(px[1], 0.5);
        assert_eq!(px[2], 0.5);
    }

    #[test]
    fn test_saturation_zero_is_grayscale() {
        let mut image = WorkingImage::filled(2, 2, [0.8, 0.2, 0.1, 1.0]);
        FilterStage::ColorControls {
            saturation: 0.0,
            brightness: 0.0,
            contrast: 1.0,
        }
        .apply(&mut image)
        .unwrap();
        let px = image.pixel(0, 0).unwrap();
        assert!((px[0] - px[1]).abs() < 1e-6);
        assert!((px[1] - px[2]).abs() < 1e-6);
        // alpha untouched
        assert_eq!(px[3], 1.0);
    }

    #[test]
    fn test_sharpen_flat_and_edge() {
        let mut flat = gray(0.4);
        FilterStage::SharpenLuminance { sharpness: 0.4 }
            .apply(&mut flat)
            .unwrap();
        assert!(flat.pixels().iter().all(|px| (px[0] - 0.4).abs() < 1e-6));

        let mut edge = gray(0.2);
        for y in 0..8 {
            for x in 4..8 {
                edge.set_pixel(x, y, [0.8, 0.8, 0.8, 1.0]);
            }
        }
        FilterStage::SharpenLuminance { sharpness: 0.4 }
            .apply(&mut edge)
            .unwrap();
        // overshoot on both sides of the edge
        assert!(edge.pixel(3, 4).unwrap()[0] < 0.2);
        assert!(edge.pixel(4, 4).unwrap()[0] > 0.8);
        // far from the edge nothing changes
        assert!((edge.pixel(0, 4).unwrap()[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_parameter_fails_stage() {
        let mut image = gray(0.5);
        let before = image.clone();
        let err = FilterStage::Exposure { ev: f32::NAN }
            .apply(&mut image)
            .unwrap_err();
        assert_eq!(err.stage(), StageKind::Exposure);
        assert_eq!(image, before);

        let params = FilterParameters {
            blue: f32::INFINITY,
            ..FilterParameters::default()
        };
        let err = FilterChain::from_parameters(&params)
            .apply(&mut image)
            .unwrap_err();
        assert_eq!(
            err,
            StageError::NonFiniteParameter {
                stage: StageKind::ColorPolynomial
            }
        );
    }

    #[test]
    fn test_inconsistent_image_fails_stage() {
        let mut image = WorkingImage {
            width: 4,
            height: 4,
            pixels: vec![[0.0; 4]; 15],
        };
        let err = FilterChain::default().apply(&mut image).unwrap_err();
        assert_eq!(err.stage(), StageKind::ColorControls);
        assert!(matches!(err, StageError::Geometry { len: 15, .. }));
    }

    #[test]
    fn test_bgra_round_trip_preserves_alpha_and_order() {
        use crate::format::FormatDescription;

        let format = FormatDescription::bgra(2, 2).with_bytes_per_row(12);
        let input = PixelBuffer::solid(format, [10, 20, 200, 77]).unwrap();
        let table = ColorSpace::DeviceRgb.decode_table();
        let image = WorkingImage::from_bgra(&input, &table);
        assert!(image.pixel(0, 0).unwrap()[0] > image.pixel(0, 0).unwrap()[2]);

        let mut output = PixelBuffer::new(format).unwrap();
        image.write_bgra(&mut output, ColorSpace::DeviceRgb);
        assert_eq!(output.pixel(1, 1), Some([10, 20, 200, 77]));
    }
}
