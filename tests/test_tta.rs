// tests/test_tta.rs — Test-time augmentation through the public API.
//
// Run with `cargo test --test test_tta`.

mod common;

use common::{cpu_config, max_diff, pattern, symmetric, Mini};
use supertile::tta::Transform;
use supertile::{Config, Image, Upscaler};

fn run(config: Config, mini: Mini, src: &Image<u8>) -> Image<u8> {
    let mut up = Upscaler::new(config).unwrap();
    up.load_model(mini.model()).unwrap();
    up.prepare().unwrap();
    up.process_image(src).unwrap()
}

// ===== Equivariant network =====

#[test]
fn tta_matches_plain_run_for_isotropic_model() {
    // One tile covering the whole image; even sizes keep the stride-2 phase
    // under every flip.
    let src = pattern(24, 16, 3);
    let base = Config { tile_size: 64, ..cpu_config(2) };
    let plain = run(base.clone(), Mini::isotropic(2), &src);
    let tta = run(Config { tta: true, ..base }, Mini::isotropic(2), &src);
    assert!(max_diff(plain.as_slice(), tta.as_slice()) <= 1);
}

// ===== Symmetry of the averaged output =====

#[test]
fn tta_output_of_symmetric_input_is_symmetric() {
    let src = symmetric(20);
    let out = run(Config { tile_size: 64, tta: true, ..cpu_config(2) }, Mini::new(2), &src);
    for t in Transform::ALL {
        let moved = t.apply(&out.view());
        assert!(max_diff(moved.as_slice(), out.as_slice()) <= 1, "{t:?}");
    }
}

#[test]
fn tta_keeps_alpha_and_shape() {
    let mut src = pattern(14, 10, 4);
    for y in 0..10 {
        for x in 0..14 {
            src.set(x, y, 3, 77);
        }
    }
    let out = run(Config { tta: true, ..cpu_config(3) }, Mini::new(3), &src);
    assert_eq!((out.width(), out.height(), out.channels()), (42, 30, 4));
    assert!((0..30).all(|y| (0..42).all(|x| out.get(x, y, 3) == 77)));
}

#[test]
fn tta_with_tiling_and_sync_gap_runs() {
    let src = pattern(40, 26, 3);
    let cfg = Config { tile_size: 24, tta: true, sync_gap: supertile::SyncGap::Moderate, ..cpu_config(4) };
    let out = run(cfg, Mini::new(4), &src);
    assert_eq!((out.width(), out.height()), (160, 104));
}
