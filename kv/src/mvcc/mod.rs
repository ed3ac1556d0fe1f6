pub mod inner;
pub mod mvcc;
pub mod read_view;
pub mod scan;
pub mod transaction;
