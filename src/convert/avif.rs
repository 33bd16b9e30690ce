//! AVIF decoding
//!
//! The `image` crate only encodes AVIF when built without native libraries,
//! so AVIF sources are unpacked here: `avif-parse` pulls the AV1 items out of
//! the container, rav1d decodes them to YUV planes and the planes are
//! converted to RGBA8 for the encoders in [`super::raster`].

use ::image::{Rgba, RgbaImage};
use rav1d::include::dav1d::data::Dav1dData;
use rav1d::include::dav1d::dav1d::{Dav1dContext, Dav1dSettings};
use rav1d::include::dav1d::headers::{
    DAV1D_MC_BT2020_CL, DAV1D_MC_BT2020_NCL, DAV1D_MC_BT709, DAV1D_MC_IDENTITY,
    DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
};
use rav1d::include::dav1d::picture::Dav1dPicture;
use rav1d::src::lib::{
    dav1d_close, dav1d_data_create, dav1d_data_unref, dav1d_default_settings, dav1d_get_picture,
    dav1d_open, dav1d_picture_unref, dav1d_send_data,
};
use rav1d::Dav1dResult;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use tracing::debug;

use crate::error::FragmentError;

fn failure(message: impl std::fmt::Display) -> FragmentError {
    FragmentError::ConversionFailure(format!("Invalid AVIF data: {}", message))
}

/// rav1d reports success as 0 and errors as a negated errno
fn check(res: Dav1dResult) -> Result<(), FragmentError> {
    if res.0 == 0 {
        Ok(())
    } else {
        Err(failure(format!("AV1 decoder error {}", res.0)))
    }
}

/// Decode an AVIF still image to RGBA8
pub fn decode(data: &[u8]) -> Result<RgbaImage, FragmentError> {
    let avif = avif_parse::read_avif(&mut &data[..]).map_err(failure)?;

    let mut decoder = Decoder::new()?;
    let color = Plane::read_all(&decoder.decode(&avif.primary_item)?)?;
    let alpha = match &avif.alpha_item {
        Some(item) => Some(Plane::read_all(&decoder.decode(item)?)?),
        None => None,
    };

    let image = color.to_rgba(alpha.as_ref(), avif.premultiplied_alpha)?;
    debug!(
        width = image.width(),
        height = image.height(),
        depth = color.depth,
        alpha = alpha.is_some(),
        "Decoded AVIF"
    );
    Ok(image)
}

/// A single-threaded rav1d context
struct Decoder {
    ctx: Option<Dav1dContext>,
}

/// A decoded picture, released when dropped
struct Picture(Dav1dPicture);

impl Drop for Picture {
    fn drop(&mut self) {
        // SAFETY: the picture was filled by dav1d_get_picture or is still
        // default, and unref accepts both.
        unsafe { dav1d_picture_unref(Some(NonNull::from(&mut self.0))) }
    }
}

impl Decoder {
    fn new() -> Result<Self, FragmentError> {
        // SAFETY: dav1d_default_settings initialises every field before
        // assume_init, and dav1d_open only writes the context slot.
        unsafe {
            let mut settings = MaybeUninit::<Dav1dSettings>::uninit();
            dav1d_default_settings(NonNull::from(&mut settings).cast());
            let settings = settings.assume_init_mut();
            settings.n_threads = 1;
            settings.max_frame_delay = 1;
            settings.apply_grain = 1;

            let mut ctx: Option<Dav1dContext> = None;
            check(dav1d_open(Some(NonNull::from(&mut ctx)), Some(NonNull::from(settings))))?;
            Ok(Self { ctx })
        }
    }

    /// Decode one AV1 item. Layered items yield one picture per layer; the
    /// last one is the complete image.
    fn decode(&mut self, av1: &[u8]) -> Result<Picture, FragmentError> {
        let ctx = self
            .ctx
            .ok_or_else(|| FragmentError::Internal("AV1 decoder is closed".to_string()))?;
        let mut last = None;

        // SAFETY: ctx came from dav1d_open, the input buffer is allocated by
        // dav1d_data_create with exactly av1.len() bytes, and `data` is
        // unreferenced on every path before it goes out of scope.
        unsafe {
            let mut data = Dav1dData::default();
            let buf = dav1d_data_create(Some(NonNull::from(&mut data)), av1.len());
            if buf.is_null() {
                return Err(FragmentError::Internal("AV1 input allocation failed".to_string()));
            }
            ptr::copy_nonoverlapping(av1.as_ptr(), buf, av1.len());

            let sent = loop {
                let res = dav1d_send_data(Some(ctx), Some(NonNull::from(&mut data)));
                if res.0 == 0 {
                    break Ok(());
                }
                // decoder is full: take a picture out and retry
                match next_picture(ctx) {
                    Some(picture) => last = Some(picture),
                    None => break check(res),
                }
            };
            dav1d_data_unref(Some(NonNull::from(&mut data)));
            sent?;

            while let Some(picture) = next_picture(ctx) {
                last = Some(picture);
            }
        }

        last.ok_or_else(|| failure("no frame decoded"))
    }
}

/// # Safety
///
/// `ctx` must be an open context.
unsafe fn next_picture(ctx: Dav1dContext) -> Option<Picture> {
    let mut picture = Picture(Dav1dPicture::default());
    let res = dav1d_get_picture(Some(ctx), Some(NonNull::from(&mut picture.0)));
    (res.0 == 0).then_some(picture)
}

impl Drop for Decoder {
    fn drop(&mut self) {
        // SAFETY: ctx is either None or an open context; close resets it.
        unsafe { dav1d_close(Some(NonNull::from(&mut self.ctx))) }
    }
}

/// Colour matrix of the YUV planes
#[derive(Debug, Clone, Copy, PartialEq)]
enum Matrix {
    /// Planes are G, B, R
    Identity,
    /// Luma weights `(kr, kb)`
    YCbCr(f32, f32),
}

impl Matrix {
    fn from_dav1d(mtrx: u32) -> Self {
        match mtrx {
            DAV1D_MC_IDENTITY => Matrix::Identity,
            DAV1D_MC_BT709 => Matrix::YCbCr(0.2126, 0.0722),
            DAV1D_MC_BT2020_NCL | DAV1D_MC_BT2020_CL => Matrix::YCbCr(0.2627, 0.0593),
            // BT.601 also covers unspecified
            _ => Matrix::YCbCr(0.299, 0.114),
        }
    }
}

/// Planes copied out of a picture, samples widened to u16
struct Plane {
    width: usize,
    height: usize,
    depth: u32,
    full_range: bool,
    matrix: Matrix,
    /// Chroma subsampling shift `(x, y)`, `None` for monochrome
    chroma: Option<(usize, usize)>,
    luma: Vec<u16>,
    cb: Vec<u16>,
    cr: Vec<u16>,
}

impl Plane {
    fn read_all(picture: &Picture) -> Result<Self, FragmentError> {
        let pic = &picture.0;
        let width = usize::try_from(pic.p.w).map_err(|_| failure("negative width"))?;
        let height = usize::try_from(pic.p.h).map_err(|_| failure("negative height"))?;
        let depth = u32::try_from(pic.p.bpc).map_err(|_| failure("bad bit depth"))?;
        if width == 0 || height == 0 {
            return Err(failure("empty picture"));
        }

        // SAFETY: seq_hdr, when present, points into the picture's
        // reference-counted header and lives as long as the picture.
        let (matrix, full_range) = match pic.seq_hdr {
            Some(header) => unsafe {
                let header = header.as_ref();
                (Matrix::from_dav1d(header.mtrx), header.color_range != 0)
            },
            None => (Matrix::YCbCr(0.299, 0.114), false),
        };

        let chroma = match pic.p.layout {
            DAV1D_PIXEL_LAYOUT_I400 => None,
            DAV1D_PIXEL_LAYOUT_I420 => Some((1, 1)),
            DAV1D_PIXEL_LAYOUT_I422 => Some((1, 0)),
            _ => Some((0, 0)),
        };

        let wide = depth > 8;
        let luma_stride = usize::try_from(pic.stride[0]).map_err(|_| failure("negative stride"))?;
        let chroma_stride = usize::try_from(pic.stride[1]).map_err(|_| failure("negative stride"))?;

        let luma = read_samples(pic.data[0], luma_stride, width, height, wide)?;
        let (cb, cr) = match chroma {
            Some((sx, sy)) => {
                let cw = (width + sx) >> sx;
                let ch = (height + sy) >> sy;
                (
                    read_samples(pic.data[1], chroma_stride, cw, ch, wide)?,
                    read_samples(pic.data[2], chroma_stride, cw, ch, wide)?,
                )
            }
            None => (Vec::new(), Vec::new()),
        };

        Ok(Self {
            width,
            height,
            depth,
            full_range,
            matrix,
            chroma,
            luma,
            cb,
            cr,
        })
    }

    fn luma_at(&self, x: usize, y: usize) -> f32 {
        let max = ((1u32 << self.depth) - 1) as f32;
        let sample = self.luma[y * self.width + x] as f32;
        if self.full_range {
            sample / max
        } else {
            let scale = (1u32 << (self.depth - 8)) as f32;
            (sample - 16.0 * scale) / (219.0 * scale)
        }
    }

    fn chroma_at(&self, plane: &[u16], x: usize, y: usize) -> f32 {
        let Some((sx, _)) = self.chroma else {
            return 0.0;
        };
        let (cx, cy) = self.chroma_coords(x, y);
        let cw = (self.width + sx) >> sx;
        let sample = plane[cy * cw + cx] as f32;
        let scale = (1u32 << (self.depth - 8)) as f32;
        if self.full_range {
            (sample - 128.0 * scale) / ((1u32 << self.depth) - 1) as f32
        } else {
            (sample - 128.0 * scale) / (224.0 * scale)
        }
    }

    fn chroma_coords(&self, x: usize, y: usize) -> (usize, usize) {
        match self.chroma {
            Some((sx, sy)) => (x >> sx, y >> sy),
            None => (0, 0),
        }
    }

    /// Planes as `(r, g, b)` in 0.0..=1.0
    fn rgb_at(&self, x: usize, y: usize) -> (f32, f32, f32) {
        if self.chroma.is_none() {
            let luma = self.luma_at(x, y);
            return (luma, luma, luma);
        }

        match self.matrix {
            Matrix::Identity => {
                // no offsets on GBR planes
                let max = ((1u32 << self.depth) - 1) as f32;
                let (cx, cy) = self.chroma_coords(x, y);
                let cw = self.chroma_width();
                let g = self.luma[y * self.width + x] as f32 / max;
                let b = self.cb[cy * cw + cx] as f32 / max;
                let r = self.cr[cy * cw + cx] as f32 / max;
                (r, g, b)
            }
            Matrix::YCbCr(kr, kb) => {
                let luma = self.luma_at(x, y);
                let cb = self.chroma_at(&self.cb, x, y);
                let cr = self.chroma_at(&self.cr, x, y);
                let kg = 1.0 - kr - kb;
                let r = luma + 2.0 * (1.0 - kr) * cr;
                let b = luma + 2.0 * (1.0 - kb) * cb;
                let g = (luma - kr * r - kb * b) / kg;
                (r, g, b)
            }
        }
    }

    fn chroma_width(&self) -> usize {
        match self.chroma {
            Some((sx, _)) => (self.width + sx) >> sx,
            None => 0,
        }
    }

    fn to_rgba(&self, alpha: Option<&Plane>, premultiplied: bool) -> Result<RgbaImage, FragmentError> {
        if let Some(alpha) = alpha {
            if (alpha.width, alpha.height) != (self.width, self.height) {
                return Err(failure("alpha plane size does not match the image"));
            }
        }

        let width = u32::try_from(self.width).map_err(|_| failure("image too wide"))?;
        let height = u32::try_from(self.height).map_err(|_| failure("image too tall"))?;

        Ok(RgbaImage::from_fn(width, height, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let (mut r, mut g, mut b) = self.rgb_at(x, y);
            let a = alpha.map_or(1.0, |plane| plane.luma_at(x, y).clamp(0.0, 1.0));
            if premultiplied && a > 0.0 {
                r /= a;
                g /= a;
                b /= a;
            }
            Rgba([to_u8(r), to_u8(g), to_u8(b), to_u8(a)])
        }))
    }
}

fn to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Copy a plane row by row, dropping the stride padding
fn read_samples(
    plane: Option<NonNull<std::ffi::c_void>>,
    stride: usize,
    width: usize,
    height: usize,
    wide: bool,
) -> Result<Vec<u16>, FragmentError> {
    let plane = plane.ok_or_else(|| failure("missing picture plane"))?;
    let base = plane.cast::<u8>().as_ptr();
    let mut samples = Vec::with_capacity(width * height);

    for row in 0..height {
        // SAFETY: rav1d allocates `stride` bytes per row for `height` rows,
        // each holding at least `width` samples of the picture's bit depth.
        // High bit depth rows are u16 aligned.
        unsafe {
            let start = base.add(row * stride);
            if wide {
                let row = std::slice::from_raw_parts(start.cast::<u16>(), width);
                samples.extend_from_slice(row);
            } else {
                let row = std::slice::from_raw_parts(start, width);
                samples.extend(row.iter().map(|&sample| u16::from(sample)));
            }
        }
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn encode_avif(img: RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Avif)
            .unwrap();
        out.into_inner()
    }

    fn close(a: u8, b: u8) -> bool {
        a.abs_diff(b) <= 24
    }

    #[test]
    fn test_decode_solid_color() {
        let avif = encode_avif(RgbaImage::from_pixel(16, 16, Rgba([200, 40, 40, 255])));
        let img = decode(&avif).unwrap();

        assert_eq!(img.dimensions(), (16, 16));
        let Rgba([r, g, b, a]) = *img.get_pixel(8, 8);
        assert!(close(r, 200) && close(g, 40) && close(b, 40), "got {:?}", (r, g, b));
        assert_eq!(a, 255);
    }

    #[test]
    fn test_decode_keeps_alpha() {
        let avif = encode_avif(RgbaImage::from_pixel(8, 8, Rgba([20, 120, 220, 128])));
        let img = decode(&avif).unwrap();

        let Rgba([_, _, _, a]) = *img.get_pixel(3, 3);
        assert!(close(a, 128), "alpha was {}", a);
    }

    #[test]
    fn test_odd_dimensions() {
        let avif = encode_avif(RgbaImage::from_pixel(7, 5, Rgba([10, 200, 90, 255])));
        assert_eq!(decode(&avif).unwrap().dimensions(), (7, 5));
    }

    #[test]
    fn test_not_avif() {
        let err = decode(b"\0\0\0\x18ftypavif but truncated").unwrap_err();
        assert!(matches!(err, FragmentError::ConversionFailure(_)));

        let err = decode(b"plain text").unwrap_err();
        assert!(matches!(err, FragmentError::ConversionFailure(_)));
    }

    #[test]
    fn test_matrix_from_dav1d() {
        assert_eq!(Matrix::from_dav1d(DAV1D_MC_IDENTITY), Matrix::Identity);
        assert_eq!(Matrix::from_dav1d(DAV1D_MC_BT709), Matrix::YCbCr(0.2126, 0.0722));
        assert_eq!(Matrix::from_dav1d(2), Matrix::YCbCr(0.299, 0.114));
    }
}
