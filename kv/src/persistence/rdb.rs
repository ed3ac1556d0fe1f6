//! RDB snapshot format: a magic header, a fixed-width entry count, then one
//! record per live key. Framing style uses length-prefixed fields and an
//! atomic write-then-rename.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CResult, Error};
use crate::value::{read_len_prefixed, write_len_prefixed, Value};

const MAGIC: &[u8; 9] = b"REDIS0009";
const VERSION: u64 = 9;

fn type_tag(value: &Value) -> u64 {
    match value {
        Value::Str(_) => 0,
        Value::Hash(_) => 1,
        Value::List(_) => 2,
        Value::Set(_) => 3,
        Value::ZSet(_) => 4,
        Value::Bitmap(_) => 5,
        Value::HyperLogLog(_) => 6,
    }
}

/// An entry queued for snapshotting: key, value, and its expiration
/// (absolute Unix seconds), if any.
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Value,
    pub expire_at: Option<u64>,
}

/// Writes entries to `path` via a temp file plus atomic rename.
pub fn save(path: &Path, entries: &[Entry]) -> CResult<()> {
    let tmp_path = path.with_extension("rdb.tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut w = BufWriter::new(file);
        w.write_all(MAGIC)?;
        w.write_u64::<LittleEndian>(VERSION)?;
        w.write_u64::<LittleEndian>(entries.len() as u64)?;

        for entry in entries {
            w.write_u64::<LittleEndian>(type_tag(&entry.value))?;
            write_len_prefixed(&mut w, &entry.key)?;
            match entry.expire_at {
                Some(at) => {
                    w.write_u64::<LittleEndian>(1)?;
                    w.write_u64::<LittleEndian>(at)?;
                }
                None => w.write_u64::<LittleEndian>(0)?,
            }
            let payload = entry.value.serialize()?;
            write_len_prefixed(&mut w, &payload)?;
        }
        w.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads back a snapshot written by `save`. The `type_tag` on disk is
/// informational only — `Value::deserialize` recovers the exact variant
/// from the payload's own encoding, so a tag/variant mismatch here signals
/// file corruption rather than schema drift.
pub fn load(path: &Path) -> CResult<Vec<Entry>> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 9];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::Parse("not an RDB file: bad magic".into()));
    }
    let version = r.read_u64::<LittleEndian>()?;
    if version != VERSION {
        return Err(Error::Parse(format!("unsupported RDB version {}", version)));
    }
    let count = r.read_u64::<LittleEndian>()?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let _type_tag = r.read_u64::<LittleEndian>()?;
        let key = read_len_prefixed(&mut r)?;
        let has_expiration = r.read_u64::<LittleEndian>()?;
        let expire_at = if has_expiration != 0 { Some(r.read_u64::<LittleEndian>()?) } else { None };
        let payload = read_len_prefixed(&mut r)?;
        let value = Value::deserialize(&payload)?;
        entries.push(Entry { key, value, expire_at });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn save_and_load_round_trips_entries() {
        let dir = tempdir::TempDir::new("rdb_test").unwrap();
        let path = dir.path().join("dump.rdb");

        let mut hash = HashMap::new();
        hash.insert(b"field".to_vec(), b"value".to_vec());

        let entries = vec![
            Entry { key: b"s".to_vec(), value: Value::Str(b"hello".to_vec()), expire_at: None },
            Entry { key: b"h".to_vec(), value: Value::Hash(hash), expire_at: Some(1_999_999_999) },
        ];

        save(&path, &entries).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].key, b"s");
        assert_eq!(loaded[0].value.as_str().unwrap(), b"hello");
        assert_eq!(loaded[1].expire_at, Some(1_999_999_999));
    }

    #[test]
    fn load_rejects_bad_magic() {
        let dir = tempdir::TempDir::new("rdb_test").unwrap();
        let path = dir.path().join("bad.rdb");
        std::fs::write(&path, b"not an rdb file at all").unwrap();
        assert!(load(&path).is_err());
    }
}
