//! RocksDB backend
//!
//! One column family per [`Table`]. Batches map onto a single `WriteBatch`,
//! so a unit of work lands on disk completely or not at all.

use super::{Backend, Table, WriteOp};
use crate::{
    config::RocksDbConfig,
    error::{Error, Result},
};
use rocksdb::{
    BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction,
    IteratorMode, Options, WriteBatch, DB,
};
use std::path::Path;

/// Durable backend on RocksDB
pub struct RocksBackend {
    db: DB,
}

impl RocksBackend {
    /// Open or create the database under `path`
    pub fn open(path: &Path, config: &RocksDbConfig) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.max_background_jobs);
        if config.enable_statistics {
            db_opts.enable_statistics();
        }

        let descriptors = Table::ALL
            .iter()
            .map(|table| ColumnFamilyDescriptor::new(table.name(), Self::cf_options(*table)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, descriptors)?;

        tracing::info!(
            path = ?path,
            column_families = Table::ALL.len(),
            "Opened RocksDB"
        );

        Ok(Self { db })
    }

    fn cf_options(table: Table) -> Options {
        let mut opts = Options::default();
        match table {
            Table::Transactions | Table::LoanPayments | Table::SettlementPayments => {
                // Append-only history, rarely read
                opts.set_compression_type(DBCompressionType::Zstd);
            }
            Table::Indices => {
                opts.set_compression_type(DBCompressionType::Lz4);
                let mut block_opts = BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            _ => opts.set_compression_type(DBCompressionType::Lz4),
        }
        opts
    }

    fn cf(&self, table: Table) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(table.name())
            .ok_or_else(|| Error::Persistence(format!("Column family {} not found", table.name())))
    }
}

impl std::fmt::Debug for RocksBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksBackend")
            .field("path", &self.db.path())
            .finish()
    }
}

impl Backend for RocksBackend {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(table)?, key)?)
    }

    fn scan_prefix(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(table)?;
        let mut rows = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    fn write_batch(&self, batch: Vec<WriteOp>) -> Result<()> {
        let mut write = WriteBatch::default();
        for op in batch {
            write.put_cf(self.cf(op.table)?, &op.key, &op.value);
        }
        self.db.write(write)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rocksdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_batch_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = RocksDbConfig::default();
        {
            let backend = RocksBackend::open(dir.path(), &config).unwrap();
            backend
                .write_batch(vec![
                    WriteOp {
                        table: Table::Loans,
                        key: b"k1".to_vec(),
                        value: b"one".to_vec(),
                    },
                    WriteOp {
                        table: Table::Indices,
                        key: b"i-k1".to_vec(),
                        value: Vec::new(),
                    },
                ])
                .unwrap();
        }
        let backend = RocksBackend::open(dir.path(), &config).unwrap();
        assert_eq!(backend.get(Table::Loans, b"k1").unwrap(), Some(b"one".to_vec()));
        assert!(backend.get(Table::Members, b"k1").unwrap().is_none());
        assert_eq!(backend.scan_prefix(Table::Indices, b"i-").unwrap().len(), 1);
    }
}
