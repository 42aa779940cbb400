// tests/test_upscaler.rs — End-to-end behaviour of the Upscaler facade on
// the CPU backend.
//
// Run with `cargo test --test test_upscaler`.

mod common;

use common::{cpu_config, max_diff, noise, pattern, uniform, Mini};
use supertile::{
    Config, Image, ImageView, ImageViewMut, SyncGap, UpscaleError, Upscaler, UpscalerBuilder, UpscalerState,
};

fn ready(config: Config, mini: Mini) -> Upscaler {
    let mut up = Upscaler::new(config).expect("config is valid");
    up.load_model(mini.model()).expect("model matches config");
    up.prepare().expect("prepare succeeds");
    up
}

// ===== Shapes =====

#[test]
fn output_shape_for_every_scale_and_odd_sizes() {
    for scale in [2u32, 3, 4] {
        let mut up = ready(Config { tile_size: 24, ..cpu_config(scale) }, Mini::new(scale));
        for (w, h) in [(13usize, 7usize), (1, 1), (31, 2)] {
            let src = pattern(w, h, 3);
            let out = up.process_image(&src).expect("process succeeds");
            let s = scale as usize;
            assert_eq!((out.width(), out.height(), out.channels()), (w * s, h * s, 3), "{scale}x {w}×{h}");
        }
    }
}

// ===== The 64×64 grey scenario =====

#[test]
fn grey_64_tiled_matches_single_tile() {
    let src = uniform(64, 64, 3, 128);

    let tiled_cfg = Config { tile_size: 32, sync_gap: SyncGap::Off, ..cpu_config(2) };
    let single_cfg = Config { tile_size: 64, sync_gap: SyncGap::Off, ..cpu_config(2) };

    let mut tiled = ready(tiled_cfg, Mini::new(2));
    assert_eq!(tiled.initial_plan().map(|p| p.edge), Some(32));
    let a = tiled.process_image(&src).unwrap();
    let b = ready(single_cfg, Mini::new(2)).process_image(&src).unwrap();

    assert_eq!((a.width(), a.height()), (128, 128));
    assert!(max_diff(a.as_slice(), b.as_slice()) <= 1);
}

#[test]
fn grey_64_isotropic_model_gives_uniform_output() {
    let src = uniform(64, 64, 3, 128);
    let cfg = Config { tile_size: 32, sync_gap: SyncGap::Off, ..cpu_config(2) };
    let out = ready(cfg, Mini::isotropic(2)).process_image(&src).unwrap();
    let first = out.pixel(0, 0).to_vec();
    for y in 0..out.height() {
        for x in 0..out.width() {
            let px = out.pixel(x, y);
            assert!(max_diff(px, &first) <= 1, "({x}, {y}) = {px:?}, expected {first:?}");
        }
    }
}

// ===== Determinism =====

#[test]
fn thread_count_does_not_change_output() {
    let src = noise(50, 38, 3, 7);
    let one = ready(Config { tile_size: 24, threads: 1, ..cpu_config(2) }, Mini::new(2))
        .process_image(&src)
        .unwrap();
    let four = ready(Config { tile_size: 24, threads: 4, ..cpu_config(2) }, Mini::new(2))
        .process_image(&src)
        .unwrap();
    assert_eq!(one.as_slice(), four.as_slice());
}

#[test]
fn repeated_process_is_stable() {
    let src = pattern(30, 22, 3);
    let mut up = ready(Config { tile_size: 24, ..cpu_config(3) }, Mini::new(3));
    let a = up.process_image(&src).unwrap();
    let b = up.process_image(&src).unwrap();
    assert_eq!(a.as_slice(), b.as_slice());
}

// ===== Alpha =====

#[test]
fn rgba_alpha_is_resampled_not_inferred() {
    let mut src = pattern(20, 14, 4);
    for y in 0..14 {
        for x in 0..20 {
            src.set(x, y, 3, 200);
        }
    }
    let out = ready(cpu_config(2), Mini::new(2)).process_image(&src).unwrap();
    assert_eq!(out.channels(), 4);
    for y in 0..out.height() {
        for x in 0..out.width() {
            assert_eq!(out.get(x, y, 3), 200);
        }
    }
}

#[test]
fn rgba_colour_matches_rgb_run() {
    let rgba = pattern(18, 12, 4);
    let mut rgb = Image::new(18, 12, 3);
    for y in 0..12 {
        for x in 0..18 {
            rgb.pixel_mut(x, y).copy_from_slice(&rgba.pixel(x, y)[..3]);
        }
    }
    let mut up = ready(cpu_config(2), Mini::new(2));
    let a = up.process_image(&rgba).unwrap();
    let b = up.process_image(&rgb).unwrap();
    for y in 0..24 {
        for x in 0..36 {
            assert_eq!(&a.pixel(x, y)[..3], b.pixel(x, y));
        }
    }
}

// ===== State machine =====

#[test]
fn process_before_prepare_is_state_error() {
    let mut up = Upscaler::new(cpu_config(2)).unwrap();
    assert_eq!(up.state(), UpscalerState::Uninitialized);
    let src = uniform(4, 4, 3, 0);
    assert!(matches!(up.process_image(&src), Err(UpscaleError::State { .. })));

    up.load_model(Mini::new(2).model()).unwrap();
    assert_eq!(up.state(), UpscalerState::Loaded);
    let mut out = vec![0u8; 8 * 8 * 3];
    let mut dst = ImageViewMut::new(&mut out, 8, 8, 3).unwrap();
    assert!(matches!(up.process(&src.view(), &mut dst), Err(UpscaleError::State { .. })));

    up.prepare().unwrap();
    assert_eq!(up.state(), UpscalerState::Ready);
    up.process(&src.view(), &mut dst).unwrap();
}

#[test]
fn prepare_without_model_is_state_error() {
    let mut up = Upscaler::new(cpu_config(2)).unwrap();
    assert!(matches!(up.prepare(), Err(UpscaleError::State { .. })));
}

#[test]
fn mismatched_model_is_config_error_and_leaves_uninitialized() {
    let mut up = Upscaler::new(cpu_config(3)).unwrap();
    let err = up.load_model(Mini::new(2).model()).unwrap_err();
    assert!(matches!(err, UpscaleError::Config(_)));
    assert_eq!(up.state(), UpscalerState::Uninitialized);
}

#[test]
fn failed_load_leaves_uninitialized() {
    let mut up = ready(cpu_config(2), Mini::new(2));
    let err = up.load(&b"not json"[..], &b"SRWB"[..]).unwrap_err();
    assert!(matches!(err, UpscaleError::Load(_)));
    assert_eq!(up.state(), UpscalerState::Uninitialized);
    assert!(up.model().is_none());
}

#[test]
fn teardown_is_idempotent_and_final() {
    let mut up = ready(cpu_config(2), Mini::new(2));
    up.teardown();
    up.teardown();
    assert_eq!(up.state(), UpscalerState::Uninitialized);
    up.load_model(Mini::new(2).model()).unwrap();
    assert!(matches!(up.prepare(), Err(UpscaleError::State { .. })));
}

// ===== Input validation =====

#[test]
fn wrong_output_size_is_input_error() {
    let mut up = ready(cpu_config(2), Mini::new(2));
    let src = uniform(10, 10, 3, 50);
    let mut out = vec![0u8; 19 * 20 * 3];
    let mut dst = ImageViewMut::new(&mut out, 19, 20, 3).unwrap();
    assert!(matches!(up.process(&src.view(), &mut dst), Err(UpscaleError::Input(_))));
}

#[test]
fn unsupported_channel_counts_are_input_errors() {
    let mut up = ready(cpu_config(2), Mini::new(2));

    let grey = vec![0u8; 6 * 6 * 2];
    let src = ImageView::new(&grey, 6, 6, 2).unwrap();
    let mut out = vec![0u8; 12 * 12 * 2];
    let mut dst = ImageViewMut::new(&mut out, 12, 12, 2).unwrap();
    assert!(matches!(up.process(&src, &mut dst), Err(UpscaleError::Input(_))));

    let rgb = uniform(6, 6, 3, 0);
    let mut out = vec![0u8; 12 * 12 * 4];
    let mut dst = ImageViewMut::new(&mut out, 12, 12, 4).unwrap();
    assert!(matches!(up.process(&rgb.view(), &mut dst), Err(UpscaleError::Input(_))));
}

#[test]
fn zero_area_is_input_error() {
    let mut up = ready(cpu_config(2), Mini::new(2));
    let empty: Vec<u8> = Vec::new();
    let src = ImageView::new(&empty, 0, 5, 3).unwrap();
    let mut out: Vec<u8> = Vec::new();
    let mut dst = ImageViewMut::new(&mut out, 0, 10, 3).unwrap();
    assert!(matches!(up.process(&src, &mut dst), Err(UpscaleError::Input(_))));
}

// ===== Configuration =====

#[test]
fn tile_not_larger_than_twice_prepadding_rejected_at_new() {
    let cfg = Config { tile_size: 20, ..cpu_config(2) };
    assert!(matches!(Upscaler::new(cfg), Err(UpscaleError::Config(_))));
}

#[test]
fn budget_too_small_for_minimum_tile_rejected_at_prepare() {
    let cfg = Config { heap_budget: Some(1024), ..cpu_config(2) };
    let mut up = Upscaler::new(cfg).unwrap();
    up.load_model(Mini::new(2).model()).unwrap();
    assert!(matches!(up.prepare(), Err(UpscaleError::Config(_))));
    assert_eq!(up.state(), UpscalerState::Loaded);
}

#[test]
fn prepadding_smaller_than_model_border_rejected_at_prepare() {
    // The mini 2x model crops 4 output pixels per side; 1 input pixel of
    // context covers only 2.
    let cfg = Config { prepadding: Some(1), ..cpu_config(2) };
    let mut up = Upscaler::new(cfg).unwrap();
    up.load_model(Mini::new(2).model()).unwrap();
    assert!(matches!(up.prepare(), Err(UpscaleError::Config(_))));
}

#[test]
fn invalid_gpu_index_is_config_error() {
    let cfg = Config { device: supertile::DeviceSelector::Gpu(usize::MAX), ..cpu_config(2) };
    assert!(matches!(Upscaler::new(cfg), Err(UpscaleError::Config(_))));
}

// ===== Memory estimates =====

#[test]
fn deferred_estimate_keeps_dropped_activations_until_stat_layers() {
    // 20×20 mini 2x tile, in floats: in 1200, f0 2592, d 648, e 648,
    // u 2592, sum 2592, big 10368, cr 9248, g 9248, out 3072.
    let model = Mini::new(2).model();
    // Liveness peak at the crop: big + cr.
    assert_eq!(model.peak_activation_bytes(20, 20).unwrap(), 19616 * 4);
    // Everything dropped between se0 and se1 is still resident when se1
    // allocates: d, e, f0, u, sum, big plus the live cr and g.
    assert_eq!(model.deferred_peak_bytes(20, 20).unwrap(), 37936 * 4);
}

#[test]
fn deferred_estimate_without_stat_layers_holds_everything() {
    let model = Mini::without_se(2).model();
    // No flush before the end: in + f0 + d + u + sum + big + cr + out.
    let total = 1200 + 2592 + 648 + 2592 + 2592 + 10368 + 9248 + 3072;
    assert_eq!(model.deferred_peak_bytes(20, 20).unwrap(), total * 4);
}

// ===== Builder =====

#[test]
fn builder_from_bytes_runs() {
    let (topology, weights) = Mini::new(2).bytes();
    let mut up = UpscalerBuilder::new()
        .cpu()
        .scale(2)
        .noise(supertile::NoiseLevel::None)
        .prepadding(10)
        .tile_size(24)
        .threads(2)
        .model_bytes(topology, weights)
        .build()
        .expect("builder succeeds");
    assert_eq!(up.state(), UpscalerState::Ready);
    let out = up.process_image(&pattern(9, 9, 3)).unwrap();
    assert_eq!((out.width(), out.height()), (18, 18));
}

#[test]
fn builder_without_model_is_config_error() {
    assert!(matches!(UpscalerBuilder::new().cpu().build(), Err(UpscaleError::Config(_))));
}

#[test]
fn builder_model_dir_loads_by_name() {
    let root = std::env::temp_dir().join(format!("supertile-models-{}", std::process::id()));
    let (tp, wp) = supertile::model_paths(&root, supertile::ModelFamily::Se, 2, supertile::NoiseLevel::None);
    std::fs::create_dir_all(tp.parent().unwrap()).unwrap();
    let (topology, weights) = Mini::new(2).bytes();
    std::fs::write(&tp, topology).unwrap();
    std::fs::write(&wp, weights).unwrap();

    let up = UpscalerBuilder::new()
        .cpu()
        .scale(2)
        .noise(supertile::NoiseLevel::None)
        .prepadding(10)
        .model_dir(&root, supertile::ModelFamily::Se)
        .build();
    std::fs::remove_dir_all(&root).ok();
    assert_eq!(up.unwrap().model().map(|m| m.scale()), Some(2));
}

#[test]
fn builder_missing_model_files_is_load_error() {
    let err = UpscalerBuilder::new()
        .cpu()
        .model_files("/nonexistent/up2x.json", "/nonexistent/up2x.bin")
        .build()
        .err()
        .expect("must fail");
    assert!(matches!(err, UpscaleError::Load(_)));
}
