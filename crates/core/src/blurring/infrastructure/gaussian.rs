use crate::shared::face_region::PixelRect;

/// A separable Gaussian kernel plus the reduced kernel used on a downscaled
/// copy of large regions.
///
/// Wide kernels on full-resolution faces are expensive; for kernel sizes
/// above 50 the ROI is shrunk by `scale`, blurred with the proportionally
/// smaller kernel, then scaled back up.
#[derive(Clone, Debug)]
pub struct GaussianKernel {
    full: Vec<f32>,
    small: Vec<f32>,
    scale: usize,
}

impl GaussianKernel {
    /// `kernel_size` must be odd and >= 1.
    pub fn new(kernel_size: usize) -> Self {
        let scale = (kernel_size / 50).max(1);
        let small_size = (kernel_size / scale) | 1;
        Self {
            full: kernel_1d(kernel_size),
            small: kernel_1d(small_size),
            scale,
        }
    }

    pub fn size(&self) -> usize {
        self.full.len()
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    pub fn small_size(&self) -> usize {
        self.small.len()
    }

    /// Blurs an extracted ROI buffer in place. `temp` is scratch space kept
    /// by the caller across calls.
    pub fn blur_in_place(
        &self,
        roi: &mut [u8],
        width: usize,
        height: usize,
        channels: usize,
        temp: &mut Vec<f32>,
    ) {
        let scale = self.scale;
        if scale <= 1 || height < scale * 2 || width < scale * 2 {
            separable_blur(roi, width, height, channels, &self.full, temp);
            return;
        }
        let (mut small, sw, sh) = downscale(roi, width, height, channels, scale);
        separable_blur(&mut small, sw, sh, channels, &self.small, temp);
        let upscaled = upscale(&small, sw, sh, channels, width, height);
        roi[..width * height * channels].copy_from_slice(&upscaled);
    }
}

/// 1D Gaussian weights, sigma = size / 6 (OpenCV's sigma=0 convention).
fn kernel_1d(kernel_size: usize) -> Vec<f32> {
    debug_assert!(kernel_size >= 1 && kernel_size % 2 == 1);
    let sigma = kernel_size as f64 / 6.0;
    let half = (kernel_size / 2) as f64;
    let weights: Vec<f64> = (0..kernel_size)
        .map(|i| {
            let x = i as f64 - half;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter().map(|&v| (v / sum) as f32).collect()
}

/// Horizontal pass into `temp`, vertical pass back into `data`. Edges are
/// clamped (replicate border).
fn separable_blur(
    data: &mut [u8],
    width: usize,
    height: usize,
    channels: usize,
    kernel: &[f32],
    temp: &mut Vec<f32>,
) {
    let kernel_size = kernel.len();
    if kernel_size <= 1 || width == 0 || height == 0 {
        return;
    }
    let half = kernel_size as isize / 2;
    temp.resize(width * height * channels, 0.0);

    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                let mut sum = 0.0f32;
                for (k, &w) in kernel.iter().enumerate() {
                    let sx = (x as isize + k as isize - half).clamp(0, width as isize - 1) as usize;
                    sum += data[(y * width + sx) * channels + c] as f32 * w;
                }
                temp[(y * width + x) * channels + c] = sum;
            }
        }
    }

    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                let mut sum = 0.0f32;
                for (k, &w) in kernel.iter().enumerate() {
                    let sy = (y as isize + k as isize - half).clamp(0, height as isize - 1) as usize;
                    sum += temp[(sy * width + x) * channels + c] * w;
                }
                data[(y * width + x) * channels + c] = sum.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Copies `rect` out of a frame buffer into `roi`.
pub fn extract_roi(data: &[u8], frame_width: usize, channels: usize, rect: PixelRect, roi: &mut Vec<u8>) {
    let (x, y, w, h) = (rect.x as usize, rect.y as usize, rect.width as usize, rect.height as usize);
    roi.resize(w * h * channels, 0);
    for row in 0..h {
        let src = ((y + row) * frame_width + x) * channels;
        let dst = row * w * channels;
        roi[dst..dst + w * channels].copy_from_slice(&data[src..src + w * channels]);
    }
}

/// Writes `roi` back over `rect` in a frame buffer.
pub fn write_roi_back(data: &mut [u8], roi: &[u8], frame_width: usize, channels: usize, rect: PixelRect) {
    let (x, y, w, h) = (rect.x as usize, rect.y as usize, rect.width as usize, rect.height as usize);
    for row in 0..h {
        let dst = ((y + row) * frame_width + x) * channels;
        let src = row * w * channels;
        data[dst..dst + w * channels].copy_from_slice(&roi[src..src + w * channels]);
    }
}

/// Integer-factor area-average downscale.
fn downscale(data: &[u8], width: usize, height: usize, channels: usize, scale: usize) -> (Vec<u8>, usize, usize) {
    let new_w = width / scale;
    let new_h = height / scale;
    let mut out = vec![0u8; new_w * new_h * channels];

    for y in 0..new_h {
        for x in 0..new_w {
            for c in 0..channels {
                let mut sum = 0u32;
                for dy in 0..scale {
                    for dx in 0..scale {
                        sum += data[((y * scale + dy) * width + x * scale + dx) * channels + c] as u32;
                    }
                }
                out[(y * new_w + x) * channels + c] = (sum / (scale * scale) as u32) as u8;
            }
        }
    }

    (out, new_w, new_h)
}

/// Bilinear upscale to an arbitrary target size.
fn upscale(data: &[u8], width: usize, height: usize, channels: usize, target_w: usize, target_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; target_w * target_h * channels];
    let sx_ratio = (width as f32 - 1.0) / (target_w as f32 - 1.0).max(1.0);
    let sy_ratio = (height as f32 - 1.0) / (target_h as f32 - 1.0).max(1.0);

    for y in 0..target_h {
        let src_y = y as f32 * sy_ratio;
        let y0 = (src_y.floor() as usize).min(height - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fy = src_y - y0 as f32;
        for x in 0..target_w {
            let src_x = x as f32 * sx_ratio;
            let x0 = (src_x.floor() as usize).min(width - 1);
            let x1 = (x0 + 1).min(width - 1);
            let fx = src_x - x0 as f32;

            for c in 0..channels {
                let at = |yy: usize, xx: usize| data[(yy * width + xx) * channels + c] as f32;
                let val = at(y0, x0) * (1.0 - fx) * (1.0 - fy)
                    + at(y0, x1) * fx * (1.0 - fy)
                    + at(y1, x0) * (1.0 - fx) * fy
                    + at(y1, x1) * fx * fy;
                out[(y * target_w + x) * channels + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}
