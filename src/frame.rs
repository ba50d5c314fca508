//! Captured frames and model input tensors.
//!
//! - `Frame`: one RGB8 image as produced by an ingest source.
//! - `InputTensor`: the `[1, 3, H, W]` float tensor the model consumes, values
//!   scaled to `[0, 1]`, channel-first.

use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

/// One captured RGB8 image.
#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl Frame {
    /// Wrap packed RGB8 pixels. The buffer length must be `width * height * 3`.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame must not be empty ({}x{})", width, height));
        }
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self { image })
    }

    pub fn from_image(image: DynamicImage) -> Result<Self> {
        let image = image.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("decoded image is empty"));
        }
        Ok(Self { image })
    }

    /// Decode an encoded still (JPEG, PNG).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)?;
        Self::from_image(image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Resize to the model input size and lay out as a `[1, 3, H, W]` tensor.
    pub fn to_input_tensor(&self, width: u32, height: u32) -> Result<InputTensor> {
        if width == 0 || height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        let resized;
        let image = if (self.width(), self.height()) == (width, height) {
            &self.image
        } else {
            resized = image::imageops::resize(&self.image, width, height, FilterType::CatmullRom);
            &resized
        };

        let plane = width as usize * height as usize;
        let mut data = vec![0.0f32; plane * 3];
        for (x, y, pixel) in image.enumerate_pixels() {
            let offset = y as usize * width as usize + x as usize;
            for channel in 0..3 {
                data[channel * plane + offset] = f32::from(pixel[channel]) / 255.0;
            }
        }
        Ok(InputTensor {
            width,
            height,
            data,
        })
    }
}

/// Model input: batch of one, three channels, channel-first.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl InputTensor {
    /// All-zero tensor of the given model input size.
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; 3 * width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `[1, 3, height, width]`
    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.height as usize, self.width as usize]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn value(&self, channel: usize, y: u32, x: u32) -> Option<f32> {
        if channel >= 3 || y >= self.height || x >= self.width {
            return None;
        }
        let plane = self.width as usize * self.height as usize;
        self.data
            .get(channel * plane + y as usize * self.width as usize + x as usize)
            .copied()
    }
}
