mod rocksdb;
mod sqlite;

pub use rocksdb::{RocksDbConfig, RocksDbStore};
pub use sqlite::{SqliteConfig, SqliteStore};
