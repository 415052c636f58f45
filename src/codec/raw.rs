//! Identity codec. Useful for small streams (meta) and as a baseline/debug path.

use crate::error::{GccError, GccResult};

pub fn compress(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

pub fn decompress(data: &[u8], out_size: Option<usize>) -> GccResult<Vec<u8>> {
    if let Some(expected) = out_size {
        if data.len() != expected {
            return Err(GccError::CorruptPayload(format!(
                "raw: out_size mismatch: got={} expected={expected}",
                data.len()
            )));
        }
    }
    Ok(data.to_vec())
}
