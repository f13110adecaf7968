//! 64-bit difference hash (dHash) used as the exact-duplicate key at ingestion.
//!
//! The image is resized to a 9×8 grid and each row contributes eight bits,
//! one per adjacent horizontal pixel pair.

use image::imageops::{self, FilterType};
use image::DynamicImage;
use thiserror::Error;

use crate::quality::luma8;

const DHASH_WIDTH: u32 = 9;
const DHASH_HEIGHT: u32 = 8;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("dhash: decode: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode image bytes and compute their 64-bit dHash.
pub fn dhash64(bytes: &[u8]) -> Result<u64, HashError> {
    decode_and_hash(bytes).map(|(_, hash)| hash)
}

/// Decode image bytes once, returning the image along with its dHash.
pub fn decode_and_hash(bytes: &[u8]) -> Result<(DynamicImage, u64), HashError> {
    let img = image::load_from_memory(bytes)?;
    let hash = dhash64_from_image(&img);
    Ok((img, hash))
}

/// Compute the 64-bit dHash of a decoded image.
///
/// Bit `row * 8 + col` (least significant first) is set when the luma of
/// pixel `col` is strictly greater than that of pixel `col + 1`.
pub fn dhash64_from_image(img: &DynamicImage) -> u64 {
    let rgba = img.to_rgba8();
    let grid = imageops::resize(&rgba, DHASH_WIDTH, DHASH_HEIGHT, FilterType::CatmullRom);

    let mut hash = 0u64;
    let mut bit = 0u32;
    for y in 0..DHASH_HEIGHT {
        let row: [u8; DHASH_WIDTH as usize] = std::array::from_fn(|x| {
            let [r, g, b, a] = grid.get_pixel(x as u32, y).0;
            // Composite onto black so transparent regions hash as dark.
            luma8(premultiply(r, a), premultiply(g, a), premultiply(b, a))
        });
        for x in 0..(DHASH_WIDTH as usize - 1) {
            if row[x] > row[x + 1] {
                hash |= 1 << bit;
            }
            bit += 1;
        }
    }
    hash
}

/// Number of differing bits between two hashes.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

fn premultiply(channel: u8, alpha: u8) -> u8 {
    ((channel as u32 * alpha as u32 + 127) / 255) as u8
}
