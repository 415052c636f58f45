//! ZRAW1: a fast-path single-stream shortcut that skips the ZBN2 bundle
//! wrapper entirely when there is exactly one bytes stream named "main".
//!
//! Layout: `"ZRAW1" + varint(uncompressed_len) + zstd(data)`.

use crate::codec::zstd::ZstdCodec;
use crate::error::{GccError, GccResult};
use crate::varint::{decode_varint, encode_varint};

pub const MAGIC: &[u8; 5] = b"ZRAW1";

pub fn pack(data: &[u8], codec: &ZstdCodec) -> GccResult<Vec<u8>> {
    let comp = codec.compress(data)?;
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    encode_varint(data.len() as u64, &mut out);
    out.extend_from_slice(&comp);
    Ok(out)
}

pub fn unpack(blob: &[u8]) -> GccResult<Vec<u8>> {
    if blob.len() < 5 || &blob[..5] != MAGIC {
        return Err(GccError::BadMagic("ZRAW1 magic non valido".into()));
    }
    let (n, idx) = decode_varint(blob, 5)?;
    let comp = &blob[idx..];
    let raw = crate::codec::zstd::decompress(comp, Some(n as usize))?;
    if raw.len() as u64 != n {
        return Err(GccError::HashMismatch("ZRAW1: uncompressed_len mismatch (file corrotto?)".into()));
    }
    Ok(raw)
}

pub fn is_zraw1(blob: &[u8]) -> bool {
    blob.len() >= 5 && &blob[..5] == MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(3);
        let codec = ZstdCodec::default();
        let packed = pack(&data, &codec).unwrap();
        assert!(is_zraw1(&packed));
        assert_eq!(unpack(&packed).unwrap(), data);
    }
}
