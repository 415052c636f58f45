//! Variant of `tpl_lines_v0` that can fill its template dictionary from a
//! bucket-level shared base, emitting only the delta templates a given file
//! adds on top of that base.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::{GccError, GccResult};
use crate::layers::tpl_lines_v0::{self, FMT_VERSION, TOK_RULES};
use crate::layers::LayerSymbols;
use crate::varint::{decode_varint, encode_varint};

const TPLD_MAGIC: &[u8; 4] = b"TPLD";
const TPLD_VER: u8 = 1;
const FLAG_EMPTY: u8 = 0x01;

pub fn tag8(blob: &[u8]) -> [u8; 8] {
    let digest = Sha256::digest(blob);
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&digest[..8]);
    tag
}

pub struct DictResource {
    pub meta_ver: u8,
    pub fmt: u8,
    pub tok: u8,
    pub k: usize,
    pub tag8_hex: String,
}

pub fn pack_tpl_dict_resource(templates: &[Vec<Vec<u8>>], fmt: u8, tok: u8) -> (Vec<u8>, DictResource) {
    let tpl_raw = tpl_lines_v0::pack_templates(templates);
    let mut blob = Vec::with_capacity(8 + tpl_raw.len());
    blob.extend_from_slice(TPLD_MAGIC);
    blob.push(TPLD_VER);
    blob.push(fmt);
    blob.push(tok);
    blob.push(0);
    blob.extend_from_slice(&tpl_raw);
    let tag = tag8(&blob);
    let meta = DictResource { meta_ver: 1, fmt, tok, k: templates.len(), tag8_hex: hex_encode(&tag) };
    (blob, meta)
}

pub fn unpack_tpl_dict_resource(blob: &[u8]) -> GccResult<(Vec<Vec<Vec<u8>>>, DictResource)> {
    if blob.len() < 8 {
        return Err(GccError::CorruptPayload("tpl_lines_shared_v0: dict resource troppo corta".into()));
    }
    if &blob[0..4] != TPLD_MAGIC {
        return Err(GccError::BadMagic(format!("tpl dict resource: atteso TPLD, trovato {:?}", &blob[0..4])));
    }
    let ver = blob[4];
    if ver != TPLD_VER {
        return Err(GccError::UnsupportedVersion(format!("tpl dict resource versione {ver}")));
    }
    let fmt = blob[5];
    let tok = blob[6];
    let templates = tpl_lines_v0::unpack_templates(&blob[8..])?;
    let tag = tag8(blob);
    let meta = DictResource { meta_ver: 1, fmt, tok, k: templates.len(), tag8_hex: hex_encode(&tag) };
    Ok((templates, meta))
}

fn hex_encode(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect()
}

#[derive(Default)]
pub struct SharedDict {
    pub templates: Vec<Vec<Vec<u8>>>,
    pub tag8: [u8; 8],
}

pub struct Meta {
    pub fmt: u8,
    pub tok: u8,
    pub flags: u8,
    pub base_n: u64,
    pub base_tag8: Option<[u8; 8]>,
    pub empty: bool,
}

impl Default for Meta {
    fn default() -> Self {
        Meta { fmt: FMT_VERSION, tok: TOK_RULES, flags: 0, base_n: 0, base_tag8: None, empty: false }
    }
}

pub fn encode(data: &[u8], shared: Option<&SharedDict>) -> (LayerSymbols, Meta) {
    let (symbols0, meta0) = tpl_lines_v0::encode(data);

    if meta0.empty {
        return (
            symbols0,
            Meta { fmt: FMT_VERSION, tok: TOK_RULES, flags: FLAG_EMPTY, base_n: 0, base_tag8: None, empty: true },
        );
    }

    let shared = match shared {
        Some(s) if !s.templates.is_empty() => s,
        _ => {
            return (
                symbols0,
                Meta { fmt: FMT_VERSION, tok: TOK_RULES, flags: 0, base_n: 0, base_tag8: None, empty: false },
            )
        }
    };

    let streams = match symbols0 {
        LayerSymbols::MultiBytes(s) => s,
        _ => unreachable!("tpl_lines_v0::encode always returns MultiBytes"),
    };
    let mut tpl_raw_full = Vec::new();
    let mut ids_raw_full = Vec::new();
    let mut nums_raw = Vec::new();
    for (name, d) in streams {
        match name {
            "tpl" => tpl_raw_full = d,
            "ids" => ids_raw_full = d,
            "nums" => nums_raw = d,
            _ => {}
        }
    }

    let full_templates = match tpl_lines_v0::unpack_templates(&tpl_raw_full) {
        Ok(t) => t,
        Err(_) => {
            return (
                LayerSymbols::MultiBytes(vec![("tpl", tpl_raw_full), ("ids", ids_raw_full), ("nums", nums_raw)]),
                Meta { fmt: FMT_VERSION, tok: TOK_RULES, flags: 0, base_n: 0, base_tag8: None, empty: false },
            )
        }
    };
    let full_ids = match crate::varint::decode_ints(&ids_raw_full) {
        Ok(v) => v,
        Err(_) => {
            return (
                LayerSymbols::MultiBytes(vec![("tpl", tpl_raw_full), ("ids", ids_raw_full), ("nums", nums_raw)]),
                Meta { fmt: FMT_VERSION, tok: TOK_RULES, flags: 0, base_n: 0, base_tag8: None, empty: false },
            )
        }
    };

    let mut base_index: HashMap<Vec<Vec<u8>>, usize> = HashMap::new();
    for (i, tpl) in shared.templates.iter().enumerate() {
        base_index.entry(tpl.clone()).or_insert(i);
    }
    let base_n = shared.templates.len();

    let mut delta: Vec<Vec<Vec<u8>>> = Vec::new();
    let mut delta_index: HashMap<Vec<Vec<u8>>, usize> = HashMap::new();
    let mut tid_map: HashMap<i64, i64> = HashMap::new();

    for (old_tid, tpl) in full_templates.iter().enumerate() {
        let new_tid = if let Some(&bi) = base_index.get(tpl) {
            bi as i64
        } else {
            let di = *delta_index.entry(tpl.clone()).or_insert_with(|| {
                delta.push(tpl.clone());
                delta.len() - 1
            });
            (base_n + di) as i64
        };
        tid_map.insert(old_tid as i64, new_tid);
    }

    let remapped_ids: Vec<i64> = full_ids.iter().map(|&old| *tid_map.get(&old).unwrap_or(&old)).collect();
    let ids_raw = crate::varint::encode_ints(&remapped_ids);
    let tpl_raw = tpl_lines_v0::pack_templates(&delta);

    (
        LayerSymbols::MultiBytes(vec![("tpl", tpl_raw), ("ids", ids_raw), ("nums", nums_raw)]),
        Meta {
            fmt: FMT_VERSION,
            tok: TOK_RULES,
            flags: 0,
            base_n: base_n as u64,
            base_tag8: Some(shared.tag8),
            empty: false,
        },
    )
}

pub fn decode(symbols: LayerSymbols, meta: &Meta, shared: Option<&SharedDict>) -> GccResult<Vec<u8>> {
    if meta.fmt != FMT_VERSION {
        return Err(GccError::CorruptPayload(format!("tpl_lines_shared_v0: fmt non supportato: {}", meta.fmt)));
    }

    if meta.base_n > 0 {
        let shared = shared.ok_or_else(|| GccError::MissingResource("tpl_lines_shared_v0: dizionario base mancante".into()))?;
        if shared.templates.len() as u64 != meta.base_n {
            return Err(GccError::CorruptPayload("tpl_lines_shared_v0: base_n mismatch".into()));
        }
        let expected_tag = meta.base_tag8.ok_or_else(|| GccError::CorruptPayload("tpl_lines_shared_v0: base_tag8 mancante".into()))?;
        if shared.tag8 != expected_tag {
            return Err(GccError::HashMismatch(format!(
                "tpl_lines_shared_v0: tag8 atteso {} trovato {}",
                hex_encode(&expected_tag),
                hex_encode(&shared.tag8)
            )));
        }

        let streams = match symbols {
            LayerSymbols::MultiBytes(s) => s,
            _ => return Err(GccError::CorruptPayload("tpl_lines_shared_v0: symbols non multi-bytes".into())),
        };
        let mut tpl_raw = Vec::new();
        let mut ids_raw = Vec::new();
        let mut nums_raw = Vec::new();
        for (name, d) in streams {
            match name {
                "tpl" => tpl_raw = d,
                "ids" => ids_raw = d,
                "nums" => nums_raw = d,
                _ => {}
            }
        }
        let delta = tpl_lines_v0::unpack_templates(&tpl_raw)?;
        let mut templates = shared.templates.clone();
        templates.extend(delta);

        decode_with_templates(ids_raw, nums_raw, &templates, meta.empty)
    } else {
        tpl_lines_v0::decode(
            symbols,
            &tpl_lines_v0::Meta { fmt: meta.fmt, tok: meta.tok, empty: meta.empty },
        )
    }
}

fn decode_with_templates(ids_raw: Vec<u8>, nums_raw: Vec<u8>, templates: &[Vec<Vec<u8>>], empty: bool) -> GccResult<Vec<u8>> {
    let symbols = LayerSymbols::MultiBytes(vec![
        ("tpl", tpl_lines_v0::pack_templates(templates)),
        ("ids", ids_raw),
        ("nums", nums_raw),
    ]);
    tpl_lines_v0::decode(symbols, &tpl_lines_v0::Meta { fmt: FMT_VERSION, tok: TOK_RULES, empty })
}

pub fn pack_meta(meta: &Meta) -> Vec<u8> {
    let mut out = vec![meta.fmt, meta.tok, meta.flags];
    encode_varint(meta.base_n, &mut out);
    if meta.base_n > 0 {
        if let Some(tag) = meta.base_tag8 {
            out.extend_from_slice(&tag);
        }
    }
    out
}

pub fn unpack_meta(meta_bytes: &[u8]) -> GccResult<Meta> {
    if meta_bytes.is_empty() {
        return Ok(Meta { fmt: 0, tok: 0, flags: 0, base_n: 0, base_tag8: None, empty: false });
    }
    if meta_bytes.len() < 3 {
        return Err(GccError::CorruptPayload("tpl_lines_shared_v0: meta troppo corta".into()));
    }
    let fmt = meta_bytes[0];
    let tok = meta_bytes[1];
    let flags = meta_bytes[2];
    let (base_n, mut idx) = decode_varint(meta_bytes, 3)?;
    let mut base_tag8 = None;
    if base_n > 0 {
        if idx + 8 > meta_bytes.len() {
            return Err(GccError::CorruptPayload("tpl_lines_shared_v0: base_tag8 troncato".into()));
        }
        let mut tag = [0u8; 8];
        tag.copy_from_slice(&meta_bytes[idx..idx + 8]);
        base_tag8 = Some(tag);
        idx += 8;
    }
    if idx != meta_bytes.len() {
        return Err(GccError::CorruptPayload("tpl_lines_shared_v0: byte residui nella meta".into()));
    }
    let empty = flags & FLAG_EMPTY != 0;
    Ok(Meta { fmt, tok, flags, base_n, base_tag8, empty })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_without_shared_dict() {
        let data = b"user 1 logged in\nuser 2 logged in\n".to_vec();
        let (symbols, meta) = encode(&data, None);
        assert_eq!(decode(symbols, &meta, None).unwrap(), data);
    }

    #[test]
    fn roundtrip_with_shared_dict() {
        let base_templates = vec![vec![b"user ".to_vec(), b" logged in\n".to_vec()]];
        let (_, base_resource_meta) = pack_tpl_dict_resource(&base_templates, FMT_VERSION, TOK_RULES);
        let (blob, _) = pack_tpl_dict_resource(&base_templates, FMT_VERSION, TOK_RULES);
        let (templates, resource) = unpack_tpl_dict_resource(&blob).unwrap();
        assert_eq!(resource.k, 1);
        assert_eq!(resource.tag8_hex, base_resource_meta.tag8_hex);

        let shared = SharedDict { templates, tag8: tag8(&blob) };

        let data = b"user 1 logged in\nuser 2 logged in\nerror: disk full\n".to_vec();
        let (symbols, meta) = encode(&data, Some(&shared));
        assert!(meta.base_n > 0);
        assert_eq!(decode(symbols, &meta, Some(&shared)).unwrap(), data);
    }

    #[test]
    fn empty_file_with_shared_dict_configured() {
        let base_templates = vec![vec![b"x".to_vec()]];
        let (blob, _) = pack_tpl_dict_resource(&base_templates, FMT_VERSION, TOK_RULES);
        let (templates, _) = unpack_tpl_dict_resource(&blob).unwrap();
        let shared = SharedDict { templates, tag8: tag8(&blob) };

        let data: Vec<u8> = Vec::new();
        let (symbols, meta) = encode(&data, Some(&shared));
        assert!(meta.empty);
        assert_eq!(decode(symbols, &meta, Some(&shared)).unwrap(), data);
    }
}
