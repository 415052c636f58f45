//! zstd byte codec. `tight` mode drops the content-size header and checksum
//! to shave a few bytes of frame overhead off small payloads.

use std::io::Write;

use crate::error::GccResult;

pub struct ZstdCodec {
    pub level: i32,
    pub tight: bool,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        ZstdCodec { level: 19, tight: false }
    }
}

impl ZstdCodec {
    pub fn compress(&self, data: &[u8]) -> GccResult<Vec<u8>> {
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), self.level)?;
        if self.tight {
            encoder.include_contentsize(false)?;
            encoder.include_checksum(false)?;
        }
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }
}

pub fn compress(data: &[u8], level: i32) -> GccResult<Vec<u8>> {
    ZstdCodec { level, tight: false }.compress(data)
}

pub fn compress_tight(data: &[u8], level: i32) -> GccResult<Vec<u8>> {
    ZstdCodec { level, tight: true }.compress(data)
}

pub fn decompress(data: &[u8], out_size_hint: Option<usize>) -> GccResult<Vec<u8>> {
    let capacity = out_size_hint.unwrap_or_else(|| data.len() * 3);
    let mut out = Vec::with_capacity(capacity);
    zstd::stream::copy_decode(data, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"the quick brown fox".repeat(20);
        let comp = compress(&data, 19).unwrap();
        assert_eq!(decompress(&comp, Some(data.len())).unwrap(), data);
    }

    #[test]
    fn tight_roundtrip() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let comp = compress_tight(&data, 19).unwrap();
        assert_eq!(decompress(&comp, Some(data.len())).unwrap(), data);
    }
}
