//! Subcommand implementations

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use camfx_core::params::parse_assignment;
use camfx_core::photo::filter_photo_file;
use camfx_core::{
    EngineConfig, FilterParameters, FormatDescription, FrameProcessor, ParameterStore,
    PixelBuffer,
};
use serde_json::json;
use tracing::{info, warn};

pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_json(path)
            .with_context(|| format!("Failed to load engine config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_parameters(preset: Option<&Path>, overrides: &[String]) -> Result<FilterParameters> {
    let mut params = match preset {
        Some(path) => FilterParameters::load_json(path)
            .with_context(|| format!("Failed to load preset {}", path.display()))?,
        None => FilterParameters::default(),
    };
    for assignment in overrides {
        let (name, value) = parse_assignment(assignment)?;
        params.set(name, value);
    }
    Ok(params)
}

/// Filter a still photo through the photo path
pub fn filter(
    config: &EngineConfig,
    input: &Path,
    output: &Path,
    preset: Option<&Path>,
    overrides: &[String],
    quality: u8,
) -> Result<()> {
    let params = load_parameters(preset, overrides)?;
    let store = Arc::new(ParameterStore::with_parameters(params));
    let processor = FrameProcessor::for_photo(store, config);

    let start = Instant::now();
    let (width, height) = filter_photo_file(&processor, input, output, quality.clamp(1, 100))
        .with_context(|| format!("Failed to filter {}", input.display()))?;

    let summary = json!({
        "input": input.display().to_string(),
        "output": output.display().to_string(),
        "width": width,
        "height": height,
        "elapsed_ms": start.elapsed().as_secs_f64() * 1000.0,
        "parameters": params,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Print (or save) the default parameter preset
pub fn defaults(output: Option<&Path>) -> Result<()> {
    let params = FilterParameters::default();
    match output {
        Some(path) => {
            params
                .save_json(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote default preset to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&params)?),
    }
    Ok(())
}

/// Diagonal gradient with a checker overlay, so every stage has work to do
fn test_frame(width: u32, height: u32) -> Result<PixelBuffer> {
    let format = FormatDescription::bgra(width, height);
    let mut data = Vec::with_capacity(format.buffer_len()?);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = if (x / 16 + y / 16) % 2 == 0 { 48 } else { 208 };
            data.extend_from_slice(&[b, g, r, 255]);
        }
    }
    Ok(PixelBuffer::from_data(format, data)?)
}

/// Render `frames` synthetic frames through a video processor while a
/// simulated sink keeps the last `hold` outputs alive
pub fn bench(
    config: &EngineConfig,
    width: u32,
    height: u32,
    frames: u32,
    hold: usize,
    preset: Option<&Path>,
) -> Result<()> {
    let params = load_parameters(preset, &[])?;
    let store = Arc::new(ParameterStore::with_parameters(params));
    let processor = FrameProcessor::for_video(Arc::clone(&store), config);
    let frame = test_frame(width, height)?;

    if hold >= processor.retained_buffers() {
        warn!(
            "Holding {} buffers with a pool of {}: expect dropped frames",
            hold,
            processor.retained_buffers()
        );
    }

    let mut sink = VecDeque::with_capacity(hold + 1);
    let start = Instant::now();
    for _ in 0..frames {
        if let Some(output) = processor.process(&frame) {
            sink.push_back(output);
        }
        while sink.len() > hold {
            sink.pop_front();
        }
    }
    let elapsed = start.elapsed().as_secs_f64();

    let stats = processor.stats();
    let (parameter_version, parameters) = store.versioned_snapshot();
    let pool = processor.engine().pool_stats();
    let summary = json!({
        "width": width,
        "height": height,
        "frames": frames,
        "hold": hold,
        "rendered": stats.frames_rendered,
        "dropped": stats.frames_dropped,
        "prepares": stats.prepares,
        "elapsed_s": elapsed,
        "fps": if elapsed > 0.0 { stats.frames_rendered as f64 / elapsed } else { 0.0 },
        "pool": pool.map(|p| json!({
            "generation": p.generation,
            "threshold": p.threshold,
            "allocated": p.total_allocated,
            "recycled": p.total_recycled,
            "exhausted": p.exhausted,
        })),
        "parameter_version": parameter_version,
        "parameters": parameters,
        "parallel": cfg!(feature = "rayon"),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
