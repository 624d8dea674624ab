//! The drawing surface frames are blitted onto.
//!
//! [`Canvas`] holds the guest's last frame as RGBA8, replaced wholesale every tick. Presenting
//! applies the transform derived from the guest's scaling factor and produces an image for a
//! frontend: RGBA8 for PNG export, XRGB8888 for libretro.

use std::io::BufWriter;
use std::path::Path;

use crate::abi::BYTES_PER_PIXEL;
use crate::error::{BridgeError, BridgeResult};

/// Identifier of the drawing surface.
pub const CANVAS_ID: &str = "wasm_app_canvas";

/// Largest presentation scale; keeps `width * scale` and the presented frame bounded.
pub const MAX_SCALE: u32 = 16;

/// Canvas geometry reported by the guest.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasInfo {
    pub width: u32,
    pub height: u32,
    /// `None` when the guest does not export `getCanvasScaling`.
    pub scaling: Option<f32>,
}

impl CanvasInfo {
    /// Bytes in one RGBA8 frame.
    pub fn frame_len(&self) -> u64 {
        self.width as u64 * self.height as u64 * BYTES_PER_PIXEL
    }

    pub fn transform(&self) -> Transform {
        match self.scaling {
            Some(scale) => Transform::from_scaling(scale),
            None => Transform::IDENTITY,
        }
    }
}

/// Presentation transform: integer upscale plus optional vertical flip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transform {
    pub scale: u32,
    pub flip_vertical: bool,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale: 1,
        flip_vertical: false,
    };

    /// Guests that report a scaling factor render with the origin at the bottom-left, so the
    /// image is flipped as well as scaled.
    pub fn from_scaling(scale: f32) -> Self {
        let scale = if scale.is_finite() {
            scale.abs().round().clamp(1.0, MAX_SCALE as f32) as u32
        } else {
            1
        };
        Transform {
            scale,
            flip_vertical: true,
        }
    }
}

/// A transformed image ready for a frontend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Frame {
    /// Pack as libretro XRGB8888: one little-endian `0x00RRGGBB` word per pixel.
    pub fn to_xrgb8888(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.rgba.len());
        for px in self.rgba.chunks_exact(4) {
            out.extend_from_slice(&[px[2], px[1], px[0], 0]);
        }
        out
    }

    pub fn save_png(&self, path: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::create(path)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&self.rgba)?;
        writer.finish()?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Canvas {
    info: CanvasInfo,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(info: CanvasInfo) -> BridgeResult<Self> {
        if info.width == 0 || info.height == 0 {
            return Err(BridgeError::InvalidCanvas {
                width: info.width,
                height: info.height,
            });
        }
        Ok(Self {
            info,
            pixels: vec![0; info.frame_len() as usize],
        })
    }

    pub fn info(&self) -> CanvasInfo {
        self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    /// The current frame, untransformed.
    pub fn image_data(&self) -> &[u8] {
        &self.pixels
    }

    /// Replace the whole frame. `data` must be exactly `width * height * 4` bytes.
    pub fn put_image_data(&mut self, data: &[u8]) -> BridgeResult<()> {
        if data.len() != self.pixels.len() {
            return Err(BridgeError::OutOfBounds {
                offset: 0,
                len: data.len() as u64,
                capacity: self.pixels.len() as u64,
            });
        }
        self.pixels.copy_from_slice(data);
        Ok(())
    }

    pub fn presented_size(&self) -> (u32, u32) {
        let scale = self.info.transform().scale;
        (self.info.width * scale, self.info.height * scale)
    }

    /// Apply the presentation transform.
    pub fn present(&self) -> Frame {
        let Transform {
            scale,
            flip_vertical,
        } = self.info.transform();
        let (width, height) = self.presented_size();
        let src_row = self.info.width as usize * 4;
        let dst_row = width as usize * 4;

        let mut rgba = Vec::with_capacity(dst_row * height as usize);
        for y in 0..height as usize {
            let mut src_y = y / scale as usize;
            if flip_vertical {
                src_y = self.info.height as usize - 1 - src_y;
            }
            let row = &self.pixels[src_y * src_row..(src_y + 1) * src_row];
            if scale == 1 {
                rgba.extend_from_slice(row);
            } else {
                for px in row.chunks_exact(4) {
                    for _ in 0..scale {
                        rgba.extend_from_slice(px);
                    }
                }
            }
        }

        Frame {
            width,
            height,
            rgba,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32, height: u32, scaling: Option<f32>) -> CanvasInfo {
        CanvasInfo {
            width,
            height,
            scaling,
        }
    }

    #[test]
    fn frame_length_matches_geometry() {
        for (w, h) in [(1, 1), (320, 240), (640, 480), (7, 3)] {
            let canvas = Canvas::new(info(w, h, None)).unwrap();
            assert_eq!(canvas.image_data().len(), (w * h * 4) as usize);
        }
    }

    #[test]
    fn zero_sized_canvas_is_rejected() {
        assert!(matches!(
            Canvas::new(info(0, 10, None)),
            Err(BridgeError::InvalidCanvas { width: 0, height: 10 })
        ));
    }

    #[test]
    fn mismatched_frame_is_rejected_not_truncated() {
        let mut canvas = Canvas::new(info(2, 2, None)).unwrap();
        assert!(canvas.put_image_data(&[1; 12]).is_err());
        assert!(canvas.put_image_data(&[1; 20]).is_err());
        assert!(canvas.image_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn identity_presentation_copies_frame() {
        let mut canvas = Canvas::new(info(2, 1, None)).unwrap();
        canvas.put_image_data(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let frame = canvas.present();
        assert_eq!((frame.width, frame.height), (2, 1));
        assert_eq!(frame.rgba, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn scaling_flips_and_upscales() {
        // Two rows: red on top, blue below (as stored by the guest).
        let red = [255, 0, 0, 255];
        let blue = [0, 0, 255, 255];
        let mut canvas = Canvas::new(info(1, 2, Some(2.0))).unwrap();
        canvas.put_image_data(&[red, blue].concat()).unwrap();

        let frame = canvas.present();
        assert_eq!((frame.width, frame.height), (2, 4));
        let expected = [blue, blue, blue, blue, red, red, red, red].concat();
        assert_eq!(frame.rgba, expected);
    }

    #[test]
    fn degenerate_scaling_falls_back_to_one() {
        assert_eq!(Transform::from_scaling(0.2).scale, 1);
        assert_eq!(Transform::from_scaling(f32::NAN).scale, 1);
        assert_eq!(Transform::from_scaling(-3.0).scale, 3);
    }

    #[test]
    fn large_scaling_is_capped() {
        assert_eq!(Transform::from_scaling(16.4).scale, MAX_SCALE);
        assert_eq!(Transform::from_scaling(20.0).scale, MAX_SCALE);
        assert_eq!(Transform::from_scaling(f32::MAX).scale, MAX_SCALE);
        let canvas = Canvas::new(info(10, 5, Some(1e9))).unwrap();
        assert_eq!(canvas.presented_size(), (160, 80));
    }

    #[test]
    fn xrgb_packing_swaps_red_and_blue() {
        let frame = Frame {
            width: 1,
            height: 1,
            rgba: vec![0x11, 0x22, 0x33, 0xFF],
        };
        let packed = frame.to_xrgb8888();
        assert_eq!(u32::from_le_bytes(packed.try_into().unwrap()), 0x0011_2233);
    }

    #[test]
    fn png_export_round_trips_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame {
            width: 3,
            height: 2,
            rgba: vec![200; 3 * 2 * 4],
        };
        frame.save_png(&path).unwrap();

        let decoder = png::Decoder::new(std::fs::File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        assert_eq!(reader.info().width, 3);
        assert_eq!(reader.info().height, 2);
    }
}
