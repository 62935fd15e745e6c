use common::span;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use image::RgbImage;
use ndarray::{Array, IxDyn};

const LETTERBOX_COLOR: u8 = 114;

/// Mapping between the letterboxed model input and the original image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub orig_width: u32,
    pub orig_height: u32,
    pub input_size: u32,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl TransformParams {
    pub fn new(orig_width: u32, orig_height: u32, input_size: u32) -> Self {
        let scale =
            (input_size as f32 / orig_width as f32).min(input_size as f32 / orig_height as f32);
        let (new_width, new_height) = scaled_size(orig_width, orig_height, input_size, scale);

        Self {
            orig_width,
            orig_height,
            input_size,
            scale,
            offset_x: ((input_size - new_width) / 2) as f32,
            offset_y: ((input_size - new_height) / 2) as f32,
        }
    }

    fn resized_dims(&self) -> (u32, u32) {
        scaled_size(
            self.orig_width,
            self.orig_height,
            self.input_size,
            self.scale,
        )
    }
}

fn scaled_size(width: u32, height: u32, input_size: u32, scale: f32) -> (u32, u32) {
    let new_width = ((width as f32 * scale) as u32).clamp(1, input_size);
    let new_height = ((height as f32 * scale) as u32).clamp(1, input_size);
    (new_width, new_height)
}

/// Letterboxes RGB images into a square NCHW tensor scaled to `[0, 1]`.
///
/// Buffers are kept between calls and only reallocated when the input size
/// changes.
pub struct PreProcessor {
    input_size: u32,
    rgb_buffer: Vec<u8>,
    letterboxed_buffer: Vec<u8>,
}

impl PreProcessor {
    pub fn new(input_size: u32) -> Self {
        let side = input_size as usize;
        Self {
            input_size,
            rgb_buffer: Vec::new(),
            letterboxed_buffer: vec![LETTERBOX_COLOR; side * side * 3],
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn preprocess(
        &mut self,
        image: &RgbImage,
        input_size: u32,
    ) -> anyhow::Result<(Array<f32, IxDyn>, TransformParams)> {
        let _s = span!("preprocess_image");

        if image.width() == 0 || image.height() == 0 {
            anyhow::bail!("Cannot preprocess an empty image");
        }

        if input_size != self.input_size {
            tracing::debug!(
                from = self.input_size,
                to = input_size,
                "Resizing letterbox buffer"
            );
            *self = Self::new(input_size);
        }

        let transform = TransformParams::new(image.width(), image.height(), input_size);

        self.rgb_buffer.clear();
        self.rgb_buffer.extend_from_slice(image.as_raw());

        self.letterbox(&transform)?;

        let input = Self::normalize(&self.letterboxed_buffer, input_size as usize)?;

        Ok((input, transform))
    }

    fn letterbox(&mut self, transform: &TransformParams) -> anyhow::Result<()> {
        let _s = span!("resize_and_letterbox");

        let (new_width, new_height) = transform.resized_dims();

        let src = Image::from_slice_u8(
            transform.orig_width,
            transform.orig_height,
            &mut self.rgb_buffer,
            PixelType::U8x3,
        )?;

        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        Resizer::new().resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        self.letterboxed_buffer.fill(LETTERBOX_COLOR);

        let resized_data = resized.buffer();
        let stride = self.input_size as usize * 3;
        let row_len = new_width as usize * 3;
        let offset_x = transform.offset_x as usize;
        let offset_y = transform.offset_y as usize;

        for y in 0..new_height as usize {
            let src_row = y * row_len;
            let dst_row = (y + offset_y) * stride + offset_x * 3;

            self.letterboxed_buffer[dst_row..dst_row + row_len]
                .copy_from_slice(&resized_data[src_row..src_row + row_len]);
        }

        Ok(())
    }

    fn normalize(buf: &[u8], side: usize) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("normalize");

        let spatial = side * side;
        let mut output = vec![0.0f32; 3 * spatial];

        for (i, px) in buf.chunks_exact(3).enumerate() {
            output[i] = px[0] as f32 / 255.0;
            output[i + spatial] = px[1] as f32 / 255.0;
            output[i + 2 * spatial] = px[2] as f32 / 255.0;
        }

        Ok(Array::from_shape_vec(IxDyn(&[1, 3, side, side]), output)?)
    }
}
