//! End-to-end scenarios for the filter engine

use std::sync::Arc;
use std::thread;

use camfx_core::format::{ColorAttachments, ColorPrimaries, TransferFunction, YCbCrMatrix};
use camfx_core::pool::PoolError;
use camfx_core::{
    ColorSpace, EngineConfig, EngineError, FilterEngine, FilterParameters, FormatDescription,
    FrameProcessor, ParameterName, ParameterStore, PixelBuffer, PixelLayout,
};

fn gray(width: u32, height: u32, v: u8) -> PixelBuffer {
    PixelBuffer::solid(FormatDescription::bgra(width, height), [v, v, v, 255]).unwrap()
}

/// Vertical stripes so the sharpen stage has edges to work on
fn stripes(width: u32, height: u32) -> PixelBuffer {
    let format = FormatDescription::bgra(width, height);
    let mut data = Vec::with_capacity(format.buffer_len().unwrap());
    for _ in 0..height {
        for x in 0..width {
            let v = if (x / 4) % 2 == 0 { 60 } else { 190 };
            data.extend_from_slice(&[v, v / 2, v, 255]);
        }
    }
    PixelBuffer::from_data(format, data).unwrap()
}

fn render_bytes(engine: &FilterEngine, frame: &PixelBuffer, params: &FilterParameters) -> Vec<u8> {
    engine.render_with(frame, params).unwrap().data().to_vec()
}

#[test]
fn test_full_hd_gray_frame_with_defaults() {
    let engine = FilterEngine::new(Arc::new(ParameterStore::new()));
    let input = gray(1920, 1080, 128);
    let output_format = engine.prepare(input.format(), 2).unwrap();
    assert_eq!((output_format.width, output_format.height), (1920, 1080));

    let output = engine.render(&input).unwrap();
    assert_eq!(output.width(), 1920);
    assert_eq!(output.height(), 1080);

    let centre = output.pixel(960, 540).unwrap();
    assert_ne!(centre[0], 128, "default parameters should move mid-gray");
    assert_eq!(centre[0], centre[1]);
    assert_eq!(centre[1], centre[2]);
    assert_eq!(centre[3], 255);
    // a flat frame stays flat
    assert_eq!(output.pixel(0, 0), Some(centre));
    assert_eq!(output.pixel(1919, 1079), Some(centre));
}

#[test]
fn test_red_polynomial_tints_gray() {
    let store = Arc::new(ParameterStore::new());
    store.set(ParameterName::Red, 1.0);
    let engine = FilterEngine::new(store);
    let input = gray(64, 32, 128);
    engine.prepare(input.format(), 2).unwrap();

    let output = engine.render(&input).unwrap();
    let [b, g, r, _] = output.pixel(10, 10).unwrap();
    assert!(r > g, "red {} green {}", r, g);
    assert!(r > b, "red {} blue {}", r, b);
}

#[test]
fn test_render_is_deterministic() {
    let engine = FilterEngine::new(Arc::new(ParameterStore::new()));
    let input = stripes(64, 16);
    engine.prepare(input.format(), 2).unwrap();

    let mut params = FilterParameters::default();
    params.saturation = 1.6;
    params.green = -0.4;
    params.blue = 0.7;

    let first = render_bytes(&engine, &input, &params);
    let second = render_bytes(&engine, &input, &params);
    assert_eq!(first, second);
}

#[test]
fn test_unprepared_engine_never_renders() {
    let engine = FilterEngine::new(Arc::new(ParameterStore::new()));
    let input = gray(16, 16, 50);
    assert!(matches!(engine.render(&input), Err(EngineError::NotPrepared)));

    engine.prepare(input.format(), 2).unwrap();
    engine.render(&input).unwrap();
    engine.reset();
    assert!(matches!(engine.render(&input), Err(EngineError::NotPrepared)));
}

#[test]
fn test_unsupported_format_leaves_engine_unprepared() {
    let engine = FilterEngine::new(Arc::new(ParameterStore::new()));
    let bgra = FormatDescription::bgra(16, 16);
    engine.prepare(&bgra, 2).unwrap();

    for layout in [PixelLayout::Rgba32, PixelLayout::Argb32, PixelLayout::Nv12] {
        let err = engine
            .prepare(&FormatDescription::new(16, 16, layout), 2)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedPixelFormat(l) if l == layout));
        assert!(!engine.is_prepared());
    }
    assert!(matches!(
        engine.render(&gray(16, 16, 0)),
        Err(EngineError::NotPrepared)
    ));
}

#[test]
fn test_pool_budget_is_a_prepare_error() {
    let config = EngineConfig {
        max_pool_bytes: Some(1920 * 1080 * 4),
        ..EngineConfig::default()
    };
    let engine = FilterEngine::with_config(Arc::new(ParameterStore::new()), &config);
    let err = engine
        .prepare(&FormatDescription::bgra(1920, 1080), 2)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::PoolAllocationFailure(PoolError::AllocationFailed(_))
    ));
    assert!(!err.is_dropped_frame());
}

#[test]
fn test_output_color_space_derivation() {
    let engine = FilterEngine::new(Arc::new(ParameterStore::new()));

    let explicit = FormatDescription::bgra(8, 8).with_attachments(ColorAttachments {
        primaries: Some(ColorPrimaries::P3D65),
        color_space: Some(ColorSpace::Srgb),
        ..ColorAttachments::default()
    });
    let out = engine.prepare(&explicit, 2).unwrap();
    assert_eq!(out.attachments.color_space, Some(ColorSpace::Srgb));

    let p3 = FormatDescription::bgra(8, 8).with_attachments(ColorAttachments {
        primaries: Some(ColorPrimaries::P3D65),
        transfer_function: Some(TransferFunction::Srgb),
        ..ColorAttachments::default()
    });
    let out = engine.prepare(&p3, 2).unwrap();
    assert_eq!(out.attachments.color_space, Some(ColorSpace::DisplayP3));
    assert_eq!(out.attachments.transfer_function, Some(TransferFunction::Srgb));

    // matrix and transfer travel only with primaries
    let no_primaries = FormatDescription::bgra(8, 8).with_attachments(ColorAttachments {
        ycbcr_matrix: Some(YCbCrMatrix::ItuR601),
        transfer_function: Some(TransferFunction::ItuR709),
        ..ColorAttachments::default()
    });
    let out = engine.prepare(&no_primaries, 2).unwrap();
    assert_eq!(out.attachments.color_space, Some(ColorSpace::DeviceRgb));
    assert_eq!(out.attachments.ycbcr_matrix, None);
    assert_eq!(out.attachments.transfer_function, None);
}

#[test]
fn test_sharpen_and_blur_parameters_are_ignored() {
    let engine = FilterEngine::new(Arc::new(ParameterStore::new()));
    let input = stripes(64, 16);
    engine.prepare(input.format(), 2).unwrap();

    let defaults = FilterParameters::default();
    let mut tweaked = defaults;
    tweaked.sharpen = 0.0;
    tweaked.blur = 5.0;

    assert_eq!(
        render_bytes(&engine, &input, &defaults),
        render_bytes(&engine, &input, &tweaked)
    );
}

#[test]
fn test_contrast_feeds_brightness_and_level_feeds_contrast() {
    let engine = FilterEngine::new(Arc::new(ParameterStore::new()));
    let input = gray(32, 8, 40);
    engine.prepare(input.format(), 2).unwrap();

    let defaults = FilterParameters::default();
    let base = render_bytes(&engine, &input, &defaults)[0];

    // `contrast` shifts every channel up like a brightness control
    let mut brighter = defaults;
    brighter.contrast = 0.1;
    assert!(render_bytes(&engine, &input, &brighter)[0] > base);

    // `level` scales around mid-gray, pushing a dark frame darker
    let mut stretched = defaults;
    stretched.level = 2.0;
    assert!(render_bytes(&engine, &input, &stretched)[0] < base);
}

#[test]
fn test_concurrent_renders_see_whole_snapshots() {
    let store = Arc::new(ParameterStore::new());
    let engine = Arc::new(FilterEngine::new(Arc::clone(&store)));
    let input = Arc::new(stripes(64, 8));
    engine.prepare(input.format(), 8).unwrap();

    let mut a = FilterParameters::default();
    a.red = 0.8;
    a.saturation = 0.2;
    let mut b = FilterParameters::default();
    b.blue = -0.6;
    b.highlights = 1.5;

    let expected_a = render_bytes(&engine, &input, &a);
    let expected_b = render_bytes(&engine, &input, &b);
    store.replace(a);

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..200 {
                store.replace(if i % 2 == 0 { b } else { a });
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let input = Arc::clone(&input);
            let (expected_a, expected_b) = (expected_a.clone(), expected_b.clone());
            thread::spawn(move || {
                for _ in 0..25 {
                    let out = engine.render(&input).unwrap().data().to_vec();
                    assert!(out == expected_a || out == expected_b);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_processor_counts_exhaustion_drops() {
    let processor =
        FrameProcessor::for_video(Arc::new(ParameterStore::new()), &EngineConfig::default());
    let input = gray(16, 16, 100);

    let held: Vec<_> = (0..3).filter_map(|_| processor.process(&input)).collect();
    assert_eq!(held.len(), 3);
    assert!(processor.process(&input).is_none());
    assert_eq!(processor.stats().frames_dropped, 1);

    drop(held);
    assert!(processor.process(&input).is_some());
    assert_eq!(processor.stats().prepares, 1);
}
