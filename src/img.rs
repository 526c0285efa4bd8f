//! Image checks: format, geometry and perceptual fingerprints.

use image::GenericImageView;
use serde::{Deserialize, Serialize};

use crate::checks::CheckError;
use crate::request::Response;

const HIST_BUCKETS: usize = 12;
const BMV_GRID: u32 = 8;

/// Decodes the body as an image and verifies format, dimensions and
/// optional fingerprints.
///
/// `ColorHist` is a 24-hex-digit packed histogram (12 buckets), `BMV` a
/// 16-hex-digit block-mean-value fingerprint (64 bits). The normalized
/// distance between the configured and the observed fingerprint must not
/// exceed `Threshold`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ImageCheck {
    /// Expected format: "png", "jpg" or "jpeg".
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,

    /// Expected width in pixels; 0 disables.
    #[serde(skip_serializing_if = "is_zero")]
    pub width: u32,

    /// Expected height in pixels; 0 disables.
    #[serde(skip_serializing_if = "is_zero")]
    pub height: u32,

    /// Packed 12-bucket color histogram, hex encoded.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub color_hist: String,

    /// Block-mean-value fingerprint, hex encoded.
    #[serde(rename = "BMV", skip_serializing_if = "String::is_empty")]
    pub bmv: String,

    /// Maximal allowed normalized fingerprint distance.
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub threshold: f64,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn is_zero_f64(n: &f64) -> bool {
    *n == 0.0
}

fn decode_hex(s: &str) -> Result<Vec<u8>, CheckError> {
    if s.len() % 2 != 0 {
        return Err(CheckError::Malformed(format!("odd hex length in {:?}", s)));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| CheckError::Malformed(format!("bad hex digits in {:?}", s)))
        })
        .collect()
}

impl ImageCheck {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if !self.format.is_empty() {
            match self.format.as_str() {
                "png" | "jpg" | "jpeg" => {}
                other => {
                    return Err(CheckError::Malformed(format!(
                        "unsupported image format {:?}",
                        other
                    )))
                }
            }
        }
        if !self.color_hist.is_empty() && decode_hex(&self.color_hist)?.len() != HIST_BUCKETS {
            return Err(CheckError::Malformed(format!(
                "ColorHist must encode {} bytes",
                HIST_BUCKETS
            )));
        }
        if !self.bmv.is_empty() && decode_hex(&self.bmv)?.len() != 8 {
            return Err(CheckError::Malformed("BMV must encode 8 bytes".into()));
        }
        Ok(())
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;

        let format = image::guess_format(body)
            .map_err(|e| CheckError::Failed(format!("undecodable image: {}", e)))?;
        if !self.format.is_empty() {
            let matches = match format {
                image::ImageFormat::Png => self.format == "png",
                image::ImageFormat::Jpeg => self.format == "jpg" || self.format == "jpeg",
                _ => false,
            };
            if !matches {
                return Err(CheckError::Failed(format!(
                    "image format is {:?}, want {:?}",
                    format, self.format
                )));
            }
        }

        let img = image::load_from_memory(body)
            .map_err(|e| CheckError::Failed(format!("undecodable image: {}", e)))?;
        let (w, h) = img.dimensions();

        if self.width != 0 && w != self.width {
            return Err(CheckError::Failed(format!(
                "image width is {}, want {}",
                w, self.width
            )));
        }
        if self.height != 0 && h != self.height {
            return Err(CheckError::Failed(format!(
                "image height is {}, want {}",
                h, self.height
            )));
        }

        if !self.color_hist.is_empty() {
            let want = decode_hex(&self.color_hist)?;
            let got = color_histogram(&img);
            let dist = histogram_distance(&want, &got);
            if dist > self.threshold {
                return Err(CheckError::Failed(format!(
                    "color histogram distance {:.4} exceeds threshold {:.4}",
                    dist, self.threshold
                )));
            }
        }

        if !self.bmv.is_empty() {
            let want = decode_hex(&self.bmv)?;
            let got = block_mean_fingerprint(&img);
            let dist = hamming_distance(&want, &got);
            if dist > self.threshold {
                return Err(CheckError::Failed(format!(
                    "BMV distance {:.4} exceeds threshold {:.4}",
                    dist, self.threshold
                )));
            }
        }

        Ok(())
    }
}

/// 12-bucket color histogram: 2 levels of red, 2 of green, 3 of blue.
/// Each bucket is the pixel share scaled to 0..=255.
pub fn color_histogram(img: &image::DynamicImage) -> Vec<u8> {
    let rgb = img.to_rgb8();
    let mut counts = [0u64; HIST_BUCKETS];
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0;
        let ri = (r >= 128) as usize;
        let gi = (g >= 128) as usize;
        let bi = (b as usize * 3) / 256;
        counts[ri * 6 + gi * 3 + bi] += 1;
    }
    let total: u64 = counts.iter().sum::<u64>().max(1);
    counts
        .iter()
        .map(|&c| ((c * 255) / total) as u8)
        .collect()
}

/// Normalized L1 distance between two packed histograms.
pub fn histogram_distance(a: &[u8], b: &[u8]) -> f64 {
    let sum: u64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as i64 - y as i64).unsigned_abs())
        .sum();
    sum as f64 / (255.0 * a.len().max(1) as f64)
}

/// 64-bit block-mean-value fingerprint: the image is divided into an 8x8
/// grid; a bit is set when the block's mean luma is at or above the
/// global mean.
pub fn block_mean_fingerprint(img: &image::DynamicImage) -> Vec<u8> {
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    let mut block_sums = [0u64; (BMV_GRID * BMV_GRID) as usize];
    let mut block_counts = [0u64; (BMV_GRID * BMV_GRID) as usize];
    let mut total: u64 = 0;

    for (x, y, pixel) in gray.enumerate_pixels() {
        let bx = (x * BMV_GRID / w.max(1)).min(BMV_GRID - 1);
        let by = (y * BMV_GRID / h.max(1)).min(BMV_GRID - 1);
        let idx = (by * BMV_GRID + bx) as usize;
        block_sums[idx] += pixel.0[0] as u64;
        block_counts[idx] += 1;
        total += pixel.0[0] as u64;
    }

    let pixels = (w as u64 * h as u64).max(1);
    let global_mean = total / pixels;

    let mut bits = [0u8; 8];
    for idx in 0..(BMV_GRID * BMV_GRID) as usize {
        let mean = if block_counts[idx] == 0 {
            0
        } else {
            block_sums[idx] / block_counts[idx]
        };
        if mean >= global_mean {
            bits[idx / 8] |= 1 << (idx % 8);
        }
    }
    bits.to_vec()
}

/// Normalized Hamming distance between two bit strings.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> f64 {
    let differing: u32 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x ^ y).count_ones())
        .sum();
    differing as f64 / (8 * a.len().max(1)) as f64
}
