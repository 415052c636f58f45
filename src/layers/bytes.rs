//! Identity layer: symbols equal the input, no metadata.

use crate::error::GccResult;
use crate::layers::LayerSymbols;

pub fn encode(data: &[u8]) -> (LayerSymbols, Vec<u8>) {
    (LayerSymbols::Bytes(data.to_vec()), Vec::new())
}

pub fn decode(symbols: LayerSymbols, _meta_bytes: &[u8]) -> GccResult<Vec<u8>> {
    match symbols {
        LayerSymbols::Bytes(b) => Ok(b),
        _ => Err(crate::error::GccError::CorruptPayload("bytes layer: symbols non bytes".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"hello world".to_vec();
        let (symbols, meta) = encode(&data);
        assert!(meta.is_empty());
        assert_eq!(decode(symbols, &meta).unwrap(), data);
    }
}
