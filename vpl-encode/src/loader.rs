use std::sync::Once;

use dcv_color_primitives as dcp;

use crate::{
    format::{FourCc, Plane},
    frame::{Frame, PixelLayout},
    surface::SurfaceMut,
    Error, Result,
};

static DCP_INIT: Once = Once::new();

/// Whether [`load`] knows how to fill surfaces of this format.
pub fn supports(fourcc: FourCc) -> bool {
    matches!(fourcc, FourCc::RGB4 | FourCc::NV12 | FourCc::I420)
}

/// Copy or convert `frame` into the planes of `surface`.
pub fn load(frame: &Frame, surface: &mut SurfaceMut<'_>) -> Result<()> {
    let info = *surface.info();
    if frame.width() > info.width || frame.height() > info.height {
        return Err(Error::InvalidFrame(format!(
            "{}x{} frame does not fit a {}x{} surface",
            frame.width(),
            frame.height(),
            info.width,
            info.height
        )));
    }

    match info.fourcc {
        FourCc::RGB4 => {
            copy_packed(frame, surface);
            Ok(())
        }
        FourCc::NV12 | FourCc::I420 => bgra2yuv(frame, surface),
        fourcc => Err(Error::UnsupportedFormat(fourcc)),
    }
}

/// Row by row copy at the surface pitch, reading rows at the frame stride.
fn copy_packed(frame: &Frame, surface: &mut SurfaceMut<'_>) {
    let pitch = surface.pitch();
    let stride = frame.stride();
    let len = pitch.min(stride);
    let src = frame.data();

    for (y, dst) in surface
        .data_mut()
        .chunks_exact_mut(pitch)
        .take(frame.height() as usize)
        .enumerate()
    {
        let row = &src[y * stride..];
        let len = len.min(row.len());
        dst[..len].copy_from_slice(&row[..len]);
    }
}

fn bgra2yuv(frame: &Frame, surface: &mut SurfaceMut<'_>) -> Result<()> {
    if frame.layout() != PixelLayout::Bgra8 {
        return Err(Error::Conversion(format!(
            "{:?} input cannot be converted to YUV",
            frame.layout()
        )));
    }

    DCP_INIT.call_once(dcp::initialize);

    let fourcc = surface.info().fourcc;
    let planes = surface.layout().planes;
    let pitch = surface.pitch();
    let offset = |plane: Plane| planes.offset(plane).unwrap_or_default();

    // 4:2:0 needs even dimensions, odd frames get their last row and column repeated.
    let width = frame.width() + frame.width() % 2;
    let height = frame.height() + frame.height() % 2;
    let padded;
    let (src, src_stride) = if (width, height) == (frame.width(), frame.height()) {
        (frame.data(), [frame.stride()])
    } else {
        padded = pad_to_even(frame, width, height);
        (&padded[..], [width as usize * 4])
    };

    let dcp_src_format = dcp::ImageFormat {
        pixel_format: dcp::PixelFormat::Bgra,
        color_space: dcp::ColorSpace::Rgb,
        num_planes: 1,
    };

    let data = surface.data_mut();
    let result = if fourcc == FourCc::NV12 {
        let dcp_dst_format = dcp::ImageFormat {
            pixel_format: dcp::PixelFormat::Nv12,
            color_space: dcp::ColorSpace::Bt709,
            num_planes: 2,
        };
        let (y, uv) = data.split_at_mut(offset(Plane::U));

        dcp::convert_image(
            width,
            height,
            &dcp_src_format,
            Some(&src_stride[..]),
            &[src],
            &dcp_dst_format,
            Some(&[pitch, pitch][..]),
            &mut [y, uv],
        )
    } else {
        let dcp_dst_format = dcp::ImageFormat {
            pixel_format: dcp::PixelFormat::I420,
            color_space: dcp::ColorSpace::Bt709,
            num_planes: 3,
        };
        let (y, uv) = data.split_at_mut(offset(Plane::U));
        let (u, v) = uv.split_at_mut(offset(Plane::V) - offset(Plane::U));

        dcp::convert_image(
            width,
            height,
            &dcp_src_format,
            Some(&src_stride[..]),
            &[src],
            &dcp_dst_format,
            Some(&[pitch, pitch / 2, pitch / 2][..]),
            &mut [y, u, v],
        )
    };

    result.map_err(|e| Error::Conversion(format!("{e:?}")))
}

/// Packed BGRA copy of `frame` grown to `width` x `height` by edge replication.
fn pad_to_even(frame: &Frame, width: u32, height: u32) -> Vec<u8> {
    let row_len = frame.width() as usize * 4;
    let last_row = frame.height().saturating_sub(1) as usize;
    let mut out = Vec::with_capacity(width as usize * height as usize * 4);

    for y in 0..height as usize {
        let start = y.min(last_row) * frame.stride();
        let row = &frame.data()[start..start + row_len];
        out.extend_from_slice(row);
        if width > frame.width() {
            out.extend_from_slice(&row[row_len - 4..]);
        }
    }
    out
}
