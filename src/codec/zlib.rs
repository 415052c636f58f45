//! DEFLATE/zlib byte codec, backed by `flate2`.

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

use crate::error::GccResult;

pub fn compress(data: &[u8], level: u32) -> GccResult<Vec<u8>> {
    let mut enc = ZlibEncoder::new(data, Compression::new(level.min(9)));
    let mut out = Vec::new();
    enc.read_to_end(&mut out)?;
    Ok(out)
}

pub fn decompress(data: &[u8]) -> GccResult<Vec<u8>> {
    let mut dec = ZlibDecoder::new(data);
    let mut out = Vec::new();
    dec.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"hello hello hello world".repeat(10);
        let comp = compress(&data, 9).unwrap();
        assert_eq!(decompress(&comp).unwrap(), data);
    }
}
