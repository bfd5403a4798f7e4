//! In-process backend

use super::{Backend, Table, WriteOp};
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Ordered map backend; state lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: RwLock<BTreeMap<(Table, Vec<u8>), Vec<u8>>>,
}

impl MemoryBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Total row count across all tables
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// True when nothing has been written
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.rows.read().get(&(table, key.to_vec())).cloned())
    }

    fn scan_prefix(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows = self.rows.read();
        Ok(rows
            .range((table, prefix.to_vec())..)
            .take_while(|((t, key), _)| *t == table && key.starts_with(prefix))
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&self, batch: Vec<WriteOp>) -> Result<()> {
        // One write guard for the whole batch
        let mut rows = self.rows.write();
        for op in batch {
            rows.insert((op.table, op.key), op.value);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(table: Table, key: &[u8]) -> WriteOp {
        WriteOp {
            table,
            key: key.to_vec(),
            value: b"v".to_vec(),
        }
    }

    #[test]
    fn test_prefix_scan_stays_in_table() {
        let backend = MemoryBackend::new();
        backend
            .write_batch(vec![
                op(Table::Loans, b"ab1"),
                op(Table::Loans, b"ab2"),
                op(Table::Loans, b"ac1"),
                op(Table::Members, b"ab3"),
            ])
            .unwrap();

        let rows = backend.scan_prefix(Table::Loans, b"ab").unwrap();
        let keys: Vec<_> = rows.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"ab1".to_vec(), b"ab2".to_vec()]);

        assert_eq!(backend.scan_prefix(Table::Loans, b"").unwrap().len(), 3);
        assert_eq!(backend.len(), 4);
    }
}
