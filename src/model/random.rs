//! Random names, colors and the derived bin icon.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;

/// Characters used for bin names, request ids and secret keys.
pub const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Color channels are multiples of this step.
const COLOR_STEP: u8 = 5;

/// Lowest multiplier for a color channel (keeps icons away from black).
const COLOR_FLOOR: u8 = 5;

/// Number of distinct multipliers above the floor (255 / 5 - 5).
const COLOR_SPAN: u8 = 46;

/// GIF header and palette prefix of a solid 16x16 image.
const GIF_HEAD: &str = "data:image/gif;base64,R0lGODlhEAAQAIAA";

/// GIF image descriptor and pixel data following the palette.
const GIF_TAIL: &str = "ACH5BAQAAAAALAAAAAAQABAAAAIOhI+py+0Po5y02ouzPgUAOw==";

/// Generates `length` characters drawn uniformly from [`ALPHABET`].
pub fn random_string<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Generates a presentation color; each channel is in `25..=250` and a
/// multiple of 5.
pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> [u8; 3] {
    [channel(rng), channel(rng), channel(rng)]
}

fn channel<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    (rng.gen_range(0..COLOR_SPAN) + COLOR_FLOOR) * COLOR_STEP
}

/// Builds a data URI for a 16x16 GIF filled with `color`.
///
/// The palette is the only variable part of the image: two entries,
/// `color` followed by black, packed in front of the fixed image body.
pub fn solid_gif_data_uri(color: [u8; 3]) -> String {
    let palette = STANDARD.encode([0, color[0], color[1], color[2], 0, 0]);
    format!("{}{}{}", GIF_HEAD, palette, GIF_TAIL)
}
