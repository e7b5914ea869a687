use bytes::Bytes;

/// Decoded image data as handed back by the decode daemon: tightly packed
/// 8-bit samples, row-major, `channels` interleaved samples per pixel.
/// Immutable once constructed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Raster {
    /// 1 = grayscale, 3 = RGB
    pub channels: u8,
    pub width: u32,
    pub height: u32,
    pub samples: Bytes,
}

impl Raster {
    pub fn is_gray(&self) -> bool {
        self.channels == 1
    }
}
