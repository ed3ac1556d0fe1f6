#![allow(non_camel_case_types)]
#![feature(is_terminal)]
#![feature(const_trait_impl)]
#![feature(exact_size_is_empty)]
// just for cursor.is_empty()
#![feature(cursor_remaining)]

//! A distributed, Redis-protocol-compatible in-memory key-value store:
//! MVCC via per-key envelope + undo chain, RDB/AOF durability, Raft
//! replication, and consistent-hash sharding.
//!
//! ## Getting started
//!
//! ```rust
//! use kv_rs::engine::Database;
//! use kv_rs::eviction::EvictionPolicy;
//!
//! let db = Database::new(EvictionPolicy::AllKeysLru);
//! db.set(None, b"greeting", b"hello".to_vec(), None).unwrap();
//! assert_eq!(db.get(None, b"greeting").unwrap(), Some(b"hello".to_vec()));
//! ```

pub mod envelope;
pub mod error;
pub mod eviction;
pub mod mvcc;
pub mod value;

pub mod engine;
pub mod info;
pub mod persistence;
pub mod raft;
pub mod row;
pub mod shard;

#[cfg(test)]
mod test {
    use crate::engine::Database;
    use crate::eviction::EvictionPolicy;

    #[test]
    fn basic_lifecycle() {
        let db = Database::new(EvictionPolicy::NoEviction);
        db.set(None, b"a", b"1".to_vec(), None).unwrap();
        db.set(None, b"b", b"2".to_vec(), None).unwrap();
        assert_eq!(db.dbsize().unwrap(), 2);
        db.del(None, b"a").unwrap();
        assert_eq!(db.dbsize().unwrap(), 1);
        db.flushdb().unwrap();
        assert_eq!(db.dbsize().unwrap(), 0);
    }
}

