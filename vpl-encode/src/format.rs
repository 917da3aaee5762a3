use std::fmt;

use serde::{Deserialize, Serialize};

/// A FourCC pixel format code, laid out the way `MFX_MAKEFOURCC` does.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const fn new(code: &[u8; 4]) -> Self {
        FourCc(
            code[0] as u32 | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24,
        )
    }

    /// `Y` followed by a single interleaved `UV` plane.
    pub const NV12: FourCc = FourCc::new(b"NV12");
    /// `Y`, `U` and `V` in three separate planes.
    pub const I420: FourCc = FourCc::new(b"I420");
    /// This is actually `BGRA` in memory.
    pub const RGB4: FourCc = FourCc::new(b"RGB4");
    /// 10 bit `NV12`, two bytes per sample.
    pub const P010: FourCc = FourCc::new(b"P010");
    /// 10 bit `I420`, two bytes per sample.
    pub const I010: FourCc = FourCc::new(b"I010");
    pub const YUY2: FourCc = FourCc::new(b"YUY2");
    pub const NV16: FourCc = FourCc::new(b"NV16");
    pub const P210: FourCc = FourCc::new(b"P210");
    pub const Y210: FourCc = FourCc::new(b"Y210");
    pub const AYUV: FourCc = FourCc::new(b"AYUV");
    pub const Y410: FourCc = FourCc::new(b"Y410");

    pub fn chroma_format(self) -> ChromaFormat {
        match self {
            FourCc::NV16 | FourCc::P210 | FourCc::Y210 | FourCc::YUY2 => ChromaFormat::Yuv422,
            FourCc::RGB4 | FourCc::AYUV | FourCc::Y410 => ChromaFormat::Yuv444,
            _ => ChromaFormat::Yuv420,
        }
    }

    /// Bytes needed by one surface of `width` x `height` (already padded).
    ///
    /// Returns `None` for formats without a system memory layout.
    pub fn surface_size(self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        let yuv420 = w.checked_mul(h)?.checked_add((w >> 1) * (h >> 1) * 2)?;
        match self {
            FourCc::NV12 | FourCc::I420 => Some(yuv420),
            FourCc::P010 | FourCc::I010 => yuv420.checked_mul(2),
            FourCc::RGB4 => w.checked_mul(h)?.checked_mul(4),
            _ => None,
        }
    }

    /// Where each plane of a surface starts, relative to the surface base.
    pub fn plane_layout(self, width: u32, height: u32) -> Option<PlaneLayout> {
        let (w, h) = (width as usize, height as usize);
        let layout = match self {
            FourCc::RGB4 => PlaneLayout {
                pitch: w * 4,
                planes: Planes::Packed {
                    b: 0,
                    g: 1,
                    r: 2,
                    a: 3,
                },
            },
            FourCc::I420 => PlaneLayout {
                pitch: w,
                planes: Planes::Planar {
                    y: 0,
                    u: w * h,
                    v: w * h + (w / 2) * (h / 2),
                },
            },
            FourCc::NV12 => PlaneLayout {
                pitch: w,
                planes: Planes::Planar {
                    y: 0,
                    u: w * h,
                    v: w * h + 1,
                },
            },
            FourCc::I010 => PlaneLayout {
                pitch: w * 2,
                planes: Planes::Planar {
                    y: 0,
                    u: w * 2 * h,
                    v: w * 2 * h + w * (h / 2),
                },
            },
            FourCc::P010 => PlaneLayout {
                pitch: w * 2,
                planes: Planes::Planar {
                    y: 0,
                    u: w * 2 * h,
                    v: w * 2 * h + 2,
                },
            },
            _ => return None,
        };
        Some(layout)
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        if bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
            write!(f, "{}", String::from_utf8_lossy(&bytes))
        } else {
            write!(f, "FourCc({:#010x})", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChromaFormat {
    Yuv420,
    Yuv422,
    Yuv444,
}

/// Byte offsets of the planes of one surface, plus the luma (or packed) pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub pitch: usize,
    pub planes: Planes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Planes {
    /// Interleaved `BGRA`, one offset per channel inside each pixel group.
    Packed { b: usize, g: usize, r: usize, a: usize },
    /// Separate luma and chroma planes. For semi-planar formats `v`
    /// points inside the interleaved `UV` plane.
    Planar { y: usize, u: usize, v: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    B,
    G,
    R,
    A,
    Y,
    U,
    V,
}

impl Planes {
    pub fn offset(&self, plane: Plane) -> Option<usize> {
        match (*self, plane) {
            (Planes::Packed { b, .. }, Plane::B) => Some(b),
            (Planes::Packed { g, .. }, Plane::G) => Some(g),
            (Planes::Packed { r, .. }, Plane::R) => Some(r),
            (Planes::Packed { a, .. }, Plane::A) => Some(a),
            (Planes::Planar { y, .. }, Plane::Y) => Some(y),
            (Planes::Planar { u, .. }, Plane::U) => Some(u),
            (Planes::Planar { v, .. }, Plane::V) => Some(v),
            _ => None,
        }
    }
}

/// `None` if the aligned value does not fit a `u32`.
pub fn align16(x: u32) -> Option<u32> {
    x.checked_add(15).map(|x| (x >> 4) << 4)
}

pub fn align32(x: u32) -> Option<u32> {
    x.checked_add(31).map(|x| x & !31)
}
