//! Vowel/consonant split: three streams — a mask ('V'/'C'/'O' per byte),
//! the vowel bytes, and everything else (consonants plus non-letters).

use crate::error::{GccError, GccResult};
use crate::layers::LayerSymbols;

fn is_vowel(b: u8) -> bool {
    matches!(b, b'a' | b'e' | b'i' | b'o' | b'u' | b'A' | b'E' | b'I' | b'O' | b'U')
}

fn is_alpha(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

pub fn encode(data: &[u8]) -> (LayerSymbols, Vec<u8>) {
    let mut mask = Vec::with_capacity(data.len());
    let mut vowels = Vec::new();
    let mut cons = Vec::new();

    for &b in data {
        if is_vowel(b) {
            mask.push(b'V');
            vowels.push(b);
        } else if is_alpha(b) {
            mask.push(b'C');
            cons.push(b);
        } else {
            mask.push(b'O');
            cons.push(b);
        }
    }

    (
        LayerSymbols::MultiBytes(vec![("mask", mask), ("vowels", vowels), ("cons", cons)]),
        Vec::new(),
    )
}

pub fn decode(symbols: LayerSymbols, _meta_bytes: &[u8]) -> GccResult<Vec<u8>> {
    let streams = match symbols {
        LayerSymbols::MultiBytes(s) => s,
        _ => return Err(GccError::CorruptPayload("vc0: symbols non multi-bytes".into())),
    };
    let mut mask = None;
    let mut vowels = None;
    let mut cons = None;
    for (name, data) in streams {
        match name {
            "mask" => mask = Some(data),
            "vowels" => vowels = Some(data),
            "cons" => cons = Some(data),
            _ => {}
        }
    }
    let mask = mask.unwrap_or_default();
    let vowels = vowels.unwrap_or_default();
    let cons = cons.unwrap_or_default();

    let mut out = Vec::with_capacity(mask.len());
    let mut iv = 0;
    let mut ic = 0;
    for &m in &mask {
        if m == b'V' {
            out.push(*vowels.get(iv).ok_or_else(|| GccError::CorruptPayload("vc0: vowels stream troppo corto".into()))?);
            iv += 1;
        } else {
            out.push(*cons.get(ic).ok_or_else(|| GccError::CorruptPayload("vc0: cons stream troppo corto".into()))?);
            ic += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"Hello, World! 123".to_vec();
        let (symbols, meta) = encode(&data);
        assert_eq!(decode(symbols, &meta).unwrap(), data);
    }
}
