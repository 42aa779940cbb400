// interop.rs — `image` crate integration (feature "image").
//
// Decoded images arrive in whatever layout the file had. The network wants
// RGB, so grey is promoted to RGB and grey+alpha to RGBA; 16-bit and float
// images are narrowed to 8 bits. The result keeps an alpha channel exactly
// when the input had one.

use image::{DynamicImage, RgbImage, RgbaImage};

use crate::error::{Result, UpscaleError};
use crate::image::{Image, ImageView};
use crate::upscaler::Upscaler;

impl Upscaler {
    /// Upscale a decoded image.
    pub fn process_dynamic_image(&mut self, src: &DynamicImage) -> Result<DynamicImage> {
        let scale = self
            .model()
            .map(|m| m.scale())
            .ok_or(UpscaleError::State { state: "uninitialized" })?;

        let (w, h) = (src.width(), src.height());
        let (ow, oh) = output_dims(w, h, scale)?;
        let alpha = src.color().has_alpha();
        let (raw, channels) = if alpha {
            (src.to_rgba8().into_raw(), 4)
        } else {
            (src.to_rgb8().into_raw(), 3)
        };

        let view = ImageView::new(&raw, w as usize, h as usize, channels)?;
        let mut out = Image::<u8>::try_new(ow as usize, oh as usize, channels)?;
        self.process(&view, &mut out.view_mut())?;

        let mismatch = || UpscaleError::Resource("output buffer does not match its dimensions".into());
        if alpha {
            RgbaImage::from_raw(ow, oh, out.into_vec()).map(DynamicImage::ImageRgba8).ok_or_else(mismatch)
        } else {
            RgbImage::from_raw(ow, oh, out.into_vec()).map(DynamicImage::ImageRgb8).ok_or_else(mismatch)
        }
    }
}

/// Output dimensions for a `w × h` input, rejecting sizes whose scaled
/// extent does not fit the `image` crate's `u32` dimensions.
fn output_dims(w: u32, h: u32, scale: u32) -> Result<(u32, u32)> {
    match (w.checked_mul(scale), h.checked_mul(scale)) {
        (Some(ow), Some(oh)) => Ok((ow, oh)),
        _ => Err(UpscaleError::Input(format!("{w}×{h} scaled {scale}× overflows the output dimensions"))),
    }
}
