use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use crate::error::liveness_error::LivenessError;
use crate::pipeline::module::bbox_gate::BoundingBox;

/// Decoded colour frame. Owned by the request that submitted it.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn decode(im_bytes: &[u8]) -> Result<Self, LivenessError> {
        if im_bytes.is_empty() {
            return Err(LivenessError::InvalidImageData("image is empty".to_string()));
        }
        let decoded = image::load_from_memory(im_bytes)
            .map_err(|e| LivenessError::InvalidImageData(e.to_string()))?;
        let image = decoded.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(LivenessError::InvalidImageData("image dimensions are zero".to_string()));
        }
        Ok(Frame { image })
    }

    #[cfg(test)]
    pub fn from_image(image: RgbImage) -> Self {
        Frame { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Inclusive pixel corners of a crop window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Grows `bbox` around its centre by `scale`, clamped so the window stays inside
/// a `src_w` x `src_h` frame. Windows touching an edge are shifted inward.
pub fn scaled_crop_box(src_w: u32, src_h: u32, bbox: &BoundingBox, scale: f32) -> CropBox {
    let (src_w, src_h) = (src_w as f32, src_h as f32);
    let box_w = bbox.w as f32;
    let box_h = bbox.h as f32;
    let scale = f32::min((src_h - 1.0) / box_h, f32::min((src_w - 1.0) / box_w, scale));

    let new_width = box_w * scale;
    let new_height = box_h * scale;
    let (center_x, center_y) = (box_w / 2.0 + bbox.x as f32, box_h / 2.0 + bbox.y as f32);

    let mut left_top_x = center_x - new_width / 2.0;
    let mut left_top_y = center_y - new_height / 2.0;
    let mut right_bottom_x = center_x + new_width / 2.0;
    let mut right_bottom_y = center_y + new_height / 2.0;

    if left_top_x < 0.0 {
        right_bottom_x -= left_top_x;
        left_top_x = 0.0;
    }

    if left_top_y < 0.0 {
        right_bottom_y -= left_top_y;
        left_top_y = 0.0;
    }

    if right_bottom_x > src_w - 1.0 {
        left_top_x -= right_bottom_x - src_w + 1.0;
        right_bottom_x = src_w - 1.0;
    }

    if right_bottom_y > src_h - 1.0 {
        left_top_y -= right_bottom_y - src_h + 1.0;
        right_bottom_y = src_h - 1.0;
    }

    CropBox {
        left: left_top_x.max(0.0) as u32,
        top: left_top_y.max(0.0) as u32,
        right: right_bottom_x.max(0.0) as u32,
        bottom: right_bottom_y.max(0.0) as u32,
    }
}

/// Produces the model input patch. Without a scale the whole frame is resized.
pub fn crop_face_patch(frame: &Frame, bbox: &BoundingBox, scale: Option<f32>, out_w: u32, out_h: u32) -> RgbImage {
    match scale {
        None => imageops::resize(frame.image(), out_w, out_h, FilterType::Triangle),
        Some(scale) => {
            let window = scaled_crop_box(frame.width(), frame.height(), bbox, scale);
            let width = window.right.saturating_sub(window.left) + 1;
            let height = window.bottom.saturating_sub(window.top) + 1;
            let patch = imageops::crop_imm(frame.image(), window.left, window.top, width, height).to_image();
            imageops::resize(&patch, out_w, out_h, FilterType::Triangle)
        }
    }
}

/// NCHW float tensor in BGR channel order with raw 0-255 values.
pub fn to_bgr_tensor(img: &RgbImage) -> Array4<f32> {
    let (width, height) = img.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, 2 - c, y as usize, x as usize]] = pixel[c] as f32;
        }
    }
    tensor
}

/// NCHW float tensor in RGB order scaled to [0, 1].
pub fn to_unit_rgb_tensor(img: &RgbImage) -> Array4<f32> {
    let (width, height) = img.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use crate::pipeline::testing::encoded_png;

    #[test]
    fn test_decode_png() {
        let frame = Frame::decode(&encoded_png(64, 48)).unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Frame::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, LivenessError::InvalidImageData(_)));
        assert!(matches!(Frame::decode(&[]), Err(LivenessError::InvalidImageData(_))));
    }

    #[test]
    fn test_scaled_crop_box_centered() {
        let bbox = BoundingBox { x: 100, y: 100, w: 100, h: 100 };
        let window = scaled_crop_box(640, 480, &bbox, 2.0);
        assert_eq!(window, CropBox { left: 50, top: 50, right: 250, bottom: 250 });
    }

    #[test]
    fn test_scaled_crop_box_shifted_inside_frame() {
        let bbox = BoundingBox { x: 0, y: 0, w: 100, h: 100 };
        let window = scaled_crop_box(640, 480, &bbox, 2.7);
        assert_eq!(window.left, 0);
        assert_eq!(window.top, 0);
        assert_eq!(window.right, 270);
        assert_eq!(window.bottom, 270);
    }

    #[test]
    fn test_scale_clamped_to_frame() {
        let bbox = BoundingBox { x: 40, y: 40, w: 80, h: 80 };
        let window = scaled_crop_box(160, 160, &bbox, 4.0);
        assert!(window.right <= 159);
        assert!(window.bottom <= 159);
    }

    #[test]
    fn test_crop_patch_dimensions_and_tensor_layout() {
        let frame = Frame::from_image(RgbImage::from_pixel(320, 240, Rgb([10, 20, 30])));
        let bbox = BoundingBox { x: 100, y: 60, w: 90, h: 90 };
        let patch = crop_face_patch(&frame, &bbox, Some(2.7), 80, 80);
        assert_eq!(patch.dimensions(), (80, 80));
        let full = crop_face_patch(&frame, &bbox, None, 80, 60);
        assert_eq!(full.dimensions(), (80, 60));

        let tensor = to_bgr_tensor(&patch);
        assert_eq!(tensor.shape(), &[1, 3, 80, 80]);
        assert_eq!(tensor[[0, 0, 0, 0]], 30.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 10.0);
    }
}
