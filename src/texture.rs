// src/texture.rs
//! Textures and the image-based texture loader.
//!
//! Textures are device resources shared as `Arc<Texture>` through
//! `Assets::textures`. The loader decodes PNG/JPEG with `image`, applies the
//! load flags and uploads RGBA8 data; the flags choose the colour space per
//! texture semantic (base colour is sRGB, normal and ORM maps are linear).

use std::path::Path;
use std::sync::Arc;

use glam::{UVec2, Vec4};
use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgba};

use crate::asset::Assets;
use crate::error::{Error, Result};
use crate::gpu::{RenderDevice, TextureDesc, TextureFormat, TextureId};

// ─────────────────────────────────────────────────────────────────────────────
// Texture
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Texture {
    pub name: String,
    pub id: TextureId,
    pub size: UVec2,
    pub format: TextureFormat,
}

impl Texture {
    #[inline]
    pub fn width(&self) -> u32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.size.y
    }

    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        self.size.x as f32 / self.size.y.max(1) as f32
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loader flags
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    Srgb,
    Linear,
}

/// Controls how an image becomes a texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureLoaderFlags {
    pub space: ColorSpace,
    pub flip_y: bool,
    pub premultiply_alpha: bool,
    /// Downscale so neither side exceeds this.
    pub max_dimension: Option<u32>,
}

impl Default for TextureLoaderFlags {
    fn default() -> Self {
        Self {
            space: ColorSpace::Srgb,
            flip_y: false,
            premultiply_alpha: false,
            max_dimension: None,
        }
    }
}

impl TextureLoaderFlags {
    /// Base colour and emissive maps.
    pub fn srgb() -> Self {
        Self::default()
    }

    /// Normal, metallic/roughness and occlusion maps.
    pub fn linear() -> Self {
        Self {
            space: ColorSpace::Linear,
            ..Default::default()
        }
    }

    pub fn with_flip_y(mut self, flip: bool) -> Self {
        self.flip_y = flip;
        self
    }

    pub fn with_premultiply_alpha(mut self, premultiply: bool) -> Self {
        self.premultiply_alpha = premultiply;
        self
    }

    pub fn with_max_dimension(mut self, max: u32) -> Self {
        self.max_dimension = Some(max);
        self
    }

    fn format(&self) -> TextureFormat {
        match self.space {
            ColorSpace::Srgb => TextureFormat::Rgba8Srgb,
            ColorSpace::Linear => TextureFormat::Rgba8,
        }
    }

    /// Registry key: the same file loaded in both spaces yields two textures.
    fn registry_key(&self, name: &str) -> String {
        match self.space {
            ColorSpace::Srgb => name.to_string(),
            ColorSpace::Linear => format!("{name}@linear"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loader
// ─────────────────────────────────────────────────────────────────────────────

pub struct TextureLoader;

impl TextureLoader {
    /// Load an image file, reusing an already registered texture of the same path and space.
    pub fn load(
        device: &mut dyn RenderDevice,
        assets: &Assets,
        path: impl AsRef<Path>,
        flags: &TextureLoaderFlags,
    ) -> Result<Arc<Texture>> {
        let path = path.as_ref();
        let name = path.to_string_lossy().into_owned();
        if let Some(texture) = assets.textures.try_get(&flags.registry_key(&name)) {
            return Ok(texture);
        }
        let bytes = std::fs::read(path)?;
        Self::load_from_memory(device, assets, &name, &bytes, flags)
    }

    /// Decode an encoded image (PNG, JPEG) held in memory.
    pub fn load_from_memory(
        device: &mut dyn RenderDevice,
        assets: &Assets,
        name: &str,
        bytes: &[u8],
        flags: &TextureLoaderFlags,
    ) -> Result<Arc<Texture>> {
        let key = flags.registry_key(name);
        assets.textures.get_or_try_insert_with(&key, || {
            let image = image::load_from_memory(bytes)?;
            let rgba = prepare(image, flags);
            let size = UVec2::new(rgba.width(), rgba.height());
            log::debug!("Decoded texture {key} ({}x{})", size.x, size.y);
            upload(device, &key, size, flags.format(), rgba.as_raw())
        })
    }

    /// Wrap raw RGBA8 pixels.
    pub fn from_rgba8(
        device: &mut dyn RenderDevice,
        assets: &Assets,
        name: &str,
        size: UVec2,
        pixels: &[u8],
        flags: &TextureLoaderFlags,
    ) -> Result<Arc<Texture>> {
        let expected = size.x as usize * size.y as usize * 4;
        if pixels.len() != expected {
            return Err(Error::load(format!(
                "texture {name}: expected {expected} bytes of RGBA8 data, got {}",
                pixels.len()
            )));
        }
        let key = flags.registry_key(name);
        assets
            .textures
            .get_or_try_insert_with(&key, || upload(device, &key, size, flags.format(), pixels))
    }

    /// A 1×1 texture of one colour, e.g. the fallback for missing maps.
    pub fn solid_color(
        device: &mut dyn RenderDevice,
        assets: &Assets,
        name: &str,
        color: Vec4,
    ) -> Result<Arc<Texture>> {
        let pixel = color
            .clamp(Vec4::ZERO, Vec4::ONE)
            .to_array()
            .map(|c| (c * 255.0).round() as u8);
        Self::from_rgba8(device, assets, name, UVec2::ONE, &pixel, &TextureLoaderFlags::linear())
    }

    /// Procedural checkerboard, handy for missing-texture placeholders.
    pub fn checkerboard(
        device: &mut dyn RenderDevice,
        assets: &Assets,
        name: &str,
        size: u32,
        cell: u32,
    ) -> Result<Arc<Texture>> {
        let cell = cell.max(1);
        let image = ImageBuffer::from_fn(size, size, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgba([255u8, 0, 255, 255])
            } else {
                Rgba([20u8, 20, 20, 255])
            }
        });
        Self::from_rgba8(
            device,
            assets,
            name,
            UVec2::splat(size),
            image.as_raw(),
            &TextureLoaderFlags::srgb(),
        )
    }
}

fn prepare(image: DynamicImage, flags: &TextureLoaderFlags) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    let image = match flags.max_dimension {
        Some(max) if image.width() > max || image.height() > max => {
            image.resize(max, max, FilterType::Lanczos3)
        }
        _ => image,
    };
    let image = if flags.flip_y { image.flipv() } else { image };
    let mut rgba = image.to_rgba8();
    if flags.premultiply_alpha {
        premultiply_alpha_inplace(&mut rgba);
    }
    rgba
}

fn premultiply_alpha_inplace(image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>) {
    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as u16;
        for channel in 0..3 {
            pixel[channel] = ((pixel[channel] as u16 * alpha + 127) / 255) as u8;
        }
    }
}

fn upload(
    device: &mut dyn RenderDevice,
    name: &str,
    size: UVec2,
    format: TextureFormat,
    pixels: &[u8],
) -> Result<Texture> {
    let id = device.create_texture(&TextureDesc {
        label: name.to_string(),
        size,
        format,
        render_target: false,
    });
    device.write_texture(id, pixels)?;
    Ok(Texture {
        name: name.to_string(),
        id,
        size,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererSettings;
    use crate::gpu::headless::HeadlessDevice;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        let image = ImageBuffer::from_pixel(width, height, Rgba(pixel));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_color_space_selects_format_and_key() {
        let mut device = HeadlessDevice::new(UVec2::new(64, 64));
        let assets = Assets::new(&RendererSettings::default());
        let png = png_bytes(4, 2, [10, 20, 30, 255]);

        let albedo =
            TextureLoader::load_from_memory(&mut device, &assets, "wall.png", &png, &TextureLoaderFlags::srgb())
                .unwrap();
        let normal =
            TextureLoader::load_from_memory(&mut device, &assets, "wall.png", &png, &TextureLoaderFlags::linear())
                .unwrap();

        assert_eq!(albedo.format, TextureFormat::Rgba8Srgb);
        assert_eq!(normal.format, TextureFormat::Rgba8);
        assert_ne!(albedo.id, normal.id);
        assert_eq!(albedo.size, UVec2::new(4, 2));
        assert!(assets.textures.contains("wall.png@linear"));
        assert_eq!(device.texture_data(albedo.id).unwrap().len(), 4 * 2 * 4);
    }

    #[test]
    fn test_reloading_reuses_texture() {
        let mut device = HeadlessDevice::new(UVec2::new(64, 64));
        let assets = Assets::new(&RendererSettings::default());
        let png = png_bytes(2, 2, [255, 255, 255, 255]);
        let flags = TextureLoaderFlags::srgb();
        let first = TextureLoader::load_from_memory(&mut device, &assets, "a.png", &png, &flags).unwrap();
        let second = TextureLoader::load_from_memory(&mut device, &assets, "a.png", &png, &flags).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(device.live_texture_count(), 1);
    }

    #[test]
    fn test_premultiply_and_downscale() {
        let pixel = Rgba([200, 100, 50, 128]);
        let premultiplied = prepare(
            DynamicImage::ImageRgba8(ImageBuffer::from_pixel(2, 2, pixel)),
            &TextureLoaderFlags::srgb().with_premultiply_alpha(true),
        );
        assert_eq!(premultiplied.get_pixel(0, 0).0, [100, 50, 25, 128]);

        let downscaled = prepare(
            DynamicImage::ImageRgba8(ImageBuffer::from_pixel(16, 8, pixel)),
            &TextureLoaderFlags::srgb().with_max_dimension(4),
        );
        assert_eq!((downscaled.width(), downscaled.height()), (4, 2));
    }

    #[test]
    fn test_rgba8_size_mismatch_is_load_error() {
        let mut device = HeadlessDevice::new(UVec2::new(8, 8));
        let assets = Assets::new(&RendererSettings::default());
        let err = TextureLoader::from_rgba8(
            &mut device,
            &assets,
            "bad",
            UVec2::new(2, 2),
            &[0; 12],
            &TextureLoaderFlags::linear(),
        )
        .unwrap_err();
        assert!(err.is_load());
        assert!(!assets.textures.contains("bad@linear"));
    }
}
