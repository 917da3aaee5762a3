use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Gray8,
    Bgr8,
    Bgra8,
    /// Anything else, copied to the surface as is.
    Other { bytes_per_pixel: usize },
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Bgr8 => 3,
            PixelLayout::Bgra8 => 4,
            PixelLayout::Other { bytes_per_pixel } => bytes_per_pixel,
        }
    }
}

/// One captured image.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    stride: usize,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        stride: usize,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Result<Self> {
        let too_large = || Error::InvalidFrame(format!("{width}x{height} frame is too large"));
        let row = (width as usize)
            .checked_mul(layout.bytes_per_pixel())
            .ok_or_else(too_large)?;
        if stride < row {
            return Err(Error::InvalidFrame(format!(
                "stride {stride} is smaller than a row of {row} bytes"
            )));
        }
        let needed = stride.checked_mul(height as usize).ok_or_else(too_large)?;
        if data.len() < needed {
            return Err(Error::InvalidFrame(format!(
                "{} bytes given, {width}x{height} with stride {stride} needs {needed}",
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            stride,
            layout,
            data,
        })
    }

    /// A frame whose rows are not padded.
    pub fn packed(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        Self::new(
            width,
            height,
            (width as usize).saturating_mul(layout.bytes_per_pixel()),
            layout,
            data,
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row, including padding.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Convert 1 and 3 channel frames to `BGRA` with an opaque alpha channel.
    ///
    /// Frames in any other layout are returned unchanged.
    pub fn into_bgra(self) -> Frame {
        let expand: fn(&[u8], &mut Vec<u8>) = match self.layout {
            PixelLayout::Gray8 => |px, out| out.extend_from_slice(&[px[0], px[0], px[0], 0xff]),
            PixelLayout::Bgr8 => |px, out| out.extend_from_slice(&[px[0], px[1], px[2], 0xff]),
            PixelLayout::Bgra8 | PixelLayout::Other { .. } => return self,
        };

        let (w, h) = (self.width as usize, self.height as usize);
        let bpp = self.layout.bytes_per_pixel();
        let mut data = Vec::with_capacity(w * h * 4);
        for row in self.data.chunks(self.stride).take(h) {
            for px in row[..w * bpp].chunks_exact(bpp) {
                expand(px, &mut data);
            }
        }

        Frame {
            width: self.width,
            height: self.height,
            stride: w * 4,
            layout: PixelLayout::Bgra8,
            data,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_short_buffers() {
        assert!(matches!(
            Frame::new(4, 2, 8, PixelLayout::Bgra8, vec![0; 32]),
            Err(Error::InvalidFrame(_))
        ));
        assert!(matches!(
            Frame::packed(4, 2, PixelLayout::Bgr8, vec![0; 23]),
            Err(Error::InvalidFrame(_))
        ));
        assert!(Frame::packed(4, 2, PixelLayout::Bgr8, vec![0; 24]).is_ok());
    }

    #[test]
    fn rejects_overflowing_sizes() {
        assert!(matches!(
            Frame::new(1, u32::MAX, usize::MAX / 2, PixelLayout::Gray8, vec![0; 16]),
            Err(Error::InvalidFrame(_))
        ));
        assert!(matches!(
            Frame::packed(
                u32::MAX,
                1,
                PixelLayout::Other { bytes_per_pixel: usize::MAX },
                vec![0; 16]
            ),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn gray_to_bgra() {
        // Two rows of two pixels, each row padded to 3 bytes.
        let frame = Frame::new(2, 2, 3, PixelLayout::Gray8, vec![10, 20, 0, 30, 40, 0]).unwrap();
        let bgra = frame.into_bgra();
        assert_eq!(bgra.layout(), PixelLayout::Bgra8);
        assert_eq!(bgra.stride(), 8);
        assert_eq!(
            bgra.data(),
            &[10, 10, 10, 255, 20, 20, 20, 255, 30, 30, 30, 255, 40, 40, 40, 255]
        );
    }

    #[test]
    fn bgr_to_bgra() {
        let frame = Frame::packed(1, 2, PixelLayout::Bgr8, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(frame.into_bgra().data(), &[1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn other_layouts_pass_through() {
        let frame = Frame::packed(2, 1, PixelLayout::Other { bytes_per_pixel: 2 }, vec![1; 4])
            .unwrap();
        assert_eq!(frame.clone().into_bgra(), frame);

        let frame = Frame::packed(1, 1, PixelLayout::Bgra8, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(frame.clone().into_bgra(), frame);
    }
}
