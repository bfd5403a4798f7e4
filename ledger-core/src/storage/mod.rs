//! Storage layer
//!
//! # Tables
//!
//! One table per ledger entity, keyed by the entity's UUID bytes, plus an
//! `indices` table holding secondary indices and uniqueness claims:
//!
//! - `i | index tag | parent_id | child_id` → empty (one-to-many lookups)
//! - `u | constraint tag | key parts` → owning id (unique constraints)
//!
//! # Units of work
//!
//! Every mutating engine operation runs inside a [`UnitOfWork`]. Opening one
//! takes the single writer lock; reads go through the staged overlay so the
//! operation sees its own writes; [`UnitOfWork::commit`] hands the whole set
//! to the backend as one atomic batch. Dropping an uncommitted unit discards
//! it, so a failed validation never leaves partial state behind.

mod memory;
#[cfg(feature = "rocksdb")]
mod rocks;

pub use memory::MemoryBackend;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksBackend;

use crate::{
    config::StorageBackend,
    error::{Error, Result},
    Config,
};
use parking_lot::{Mutex, MutexGuard};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Durable tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Group memberships
    Members,
    /// Loans
    Loans,
    /// Loan charge schedule rows
    LoanCharges,
    /// Loan payment events
    LoanPayments,
    /// Savings accounts
    Savings,
    /// Ledger transactions
    Transactions,
    /// Penalties
    Penalties,
    /// Settlement periods
    SettlementPeriods,
    /// Per-member settlements
    Settlements,
    /// Settlement payment events
    SettlementPayments,
    /// Secondary indices and unique claims
    Indices,
}

impl Table {
    /// All tables, in column family order
    pub const ALL: [Table; 11] = [
        Table::Members,
        Table::Loans,
        Table::LoanCharges,
        Table::LoanPayments,
        Table::Savings,
        Table::Transactions,
        Table::Penalties,
        Table::SettlementPeriods,
        Table::Settlements,
        Table::SettlementPayments,
        Table::Indices,
    ];

    /// Table (column family) name
    pub fn name(&self) -> &'static str {
        match self {
            Table::Members => "members",
            Table::Loans => "loans",
            Table::LoanCharges => "loan_charges",
            Table::LoanPayments => "loan_payments",
            Table::Savings => "savings",
            Table::Transactions => "transactions",
            Table::Penalties => "penalties",
            Table::SettlementPeriods => "settlement_periods",
            Table::Settlements => "settlements",
            Table::SettlementPayments => "settlement_payments",
            Table::Indices => "indices",
        }
    }
}

/// A row stored in one of the entity tables
pub trait Record: Serialize + DeserializeOwned {
    /// Table the record lives in
    const TABLE: Table;

    /// Entity name used in errors and logs
    const ENTITY: &'static str;

    /// Surrogate key
    fn record_id(&self) -> Uuid;
}

/// One-to-many secondary index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Index {
    /// group → members
    GroupMembers = 1,
    /// member → loans
    MemberLoans = 2,
    /// group → loans
    GroupLoans = 3,
    /// loan → charges
    LoanCharges = 4,
    /// loan → payments
    LoanPayments = 5,
    /// member → transactions
    MemberTransactions = 6,
    /// referenced entity → transactions
    ReferenceTransactions = 7,
    /// member → penalties
    MemberPenalties = 8,
    /// loan → penalties
    LoanPenalties = 9,
    /// group → settlement periods
    GroupPeriods = 10,
    /// period → settlements
    PeriodSettlements = 11,
    /// member → settlements
    MemberSettlements = 12,
    /// settlement → payments
    SettlementPayments = 13,
    /// group → penalties
    GroupPenalties = 14,
}

impl Index {
    fn prefix(&self, parent: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(34);
        key.push(b'i');
        key.push(*self as u8);
        key.extend_from_slice(parent.as_bytes());
        key
    }

    fn entry(&self, parent: Uuid, child: Uuid) -> Vec<u8> {
        let mut key = self.prefix(parent);
        key.extend_from_slice(child.as_bytes());
        key
    }
}

/// Uniqueness constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueKey {
    /// One membership per (group, user)
    Membership {
        /// Group
        group: Uuid,
        /// User
        user: Uuid,
    },
    /// One savings account per (group, member)
    SavingsAccount {
        /// Group
        group: Uuid,
        /// Member
        member: Uuid,
    },
    /// One settlement per (period, member)
    MemberSettlement {
        /// Settlement period
        period: Uuid,
        /// Member
        member: Uuid,
    },
    /// One period per (group, name)
    PeriodName {
        /// Group
        group: Uuid,
        /// Period name
        name: String,
    },
}

impl UniqueKey {
    fn encode(&self) -> Vec<u8> {
        let mut key = vec![b'u'];
        match self {
            UniqueKey::Membership { group, user } => {
                key.push(1);
                key.extend_from_slice(group.as_bytes());
                key.extend_from_slice(user.as_bytes());
            }
            UniqueKey::SavingsAccount { group, member } => {
                key.push(2);
                key.extend_from_slice(group.as_bytes());
                key.extend_from_slice(member.as_bytes());
            }
            UniqueKey::MemberSettlement { period, member } => {
                key.push(3);
                key.extend_from_slice(period.as_bytes());
                key.extend_from_slice(member.as_bytes());
            }
            UniqueKey::PeriodName { group, name } => {
                key.push(4);
                key.extend_from_slice(group.as_bytes());
                key.extend_from_slice(name.as_bytes());
            }
        }
        key
    }

    /// Constrained entity name
    pub fn entity(&self) -> &'static str {
        match self {
            UniqueKey::Membership { .. } => "group member",
            UniqueKey::SavingsAccount { .. } => "savings account",
            UniqueKey::MemberSettlement { .. } => "settlement",
            UniqueKey::PeriodName { .. } => "settlement period",
        }
    }

    fn describe(&self) -> String {
        match self {
            UniqueKey::Membership { group, user } => format!("group {} user {}", group, user),
            UniqueKey::SavingsAccount { group, member } => {
                format!("group {} member {}", group, member)
            }
            UniqueKey::MemberSettlement { period, member } => {
                format!("period {} member {}", period, member)
            }
            UniqueKey::PeriodName { group, name } => format!("group {} name {:?}", group, name),
        }
    }
}

/// Single put in an atomic batch
#[derive(Debug, Clone)]
pub struct WriteOp {
    /// Target table
    pub table: Table,
    /// Row key
    pub key: Vec<u8>,
    /// Serialized row
    pub value: Vec<u8>,
}

/// Key-value engine underneath [`Storage`]
pub trait Backend: Send + Sync {
    /// Point lookup
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All rows whose key starts with `prefix`, in key order
    fn scan_prefix(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every op or none of them
    fn write_batch(&self, batch: Vec<WriteOp>) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Typed read access shared by [`Storage`] and [`UnitOfWork`]
pub trait Reader {
    /// Raw point lookup
    fn raw_get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Raw prefix scan
    fn raw_scan(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Load a record if present
    fn get<R: Record>(&self, id: Uuid) -> Result<Option<R>> {
        match self.raw_get(R::TABLE, id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a record, failing with `NotFound`
    fn fetch<R: Record>(&self, id: Uuid) -> Result<R> {
        self.get(id)?.ok_or(Error::NotFound {
            entity: R::ENTITY,
            id,
        })
    }

    /// Every record in a table
    fn scan<R: Record>(&self) -> Result<Vec<R>> {
        self.raw_scan(R::TABLE, &[])?
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(Error::from))
            .collect()
    }

    /// Records linked to `parent` through `index`, in id order
    fn children<R: Record>(&self, index: Index, parent: Uuid) -> Result<Vec<R>> {
        let prefix = index.prefix(parent);
        let mut records = Vec::new();
        for (key, _) in self.raw_scan(Table::Indices, &prefix)? {
            if key.len() < prefix.len() + 16 {
                continue;
            }
            let mut child = [0u8; 16];
            child.copy_from_slice(&key[prefix.len()..prefix.len() + 16]);
            records.push(self.fetch(Uuid::from_bytes(child))?);
        }
        Ok(records)
    }

    /// Owner of a unique key, if claimed
    fn find_unique(&self, key: &UniqueKey) -> Result<Option<Uuid>> {
        match self.raw_get(Table::Indices, &key.encode())? {
            Some(bytes) => {
                let id: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                    Error::Persistence(format!("corrupt unique entry for {}", key.describe()))
                })?;
                Ok(Some(Uuid::from_bytes(id)))
            }
            None => Ok(None),
        }
    }
}

/// Ledger storage: a backend plus the single writer lock
pub struct Storage {
    backend: Box<dyn Backend>,
    writer: Mutex<()>,
}

impl Storage {
    /// Open the backend selected by configuration
    pub fn open(config: &Config) -> Result<Self> {
        match config.storage {
            StorageBackend::Memory => Ok(Self::in_memory()),
            #[cfg(feature = "rocksdb")]
            StorageBackend::Rocksdb => {
                let backend = RocksBackend::open(&config.data_dir, &config.rocksdb)?;
                Ok(Self::with_backend(Box::new(backend)))
            }
            #[cfg(not(feature = "rocksdb"))]
            StorageBackend::Rocksdb => Err(Error::Config(
                "rocksdb storage requested but the `rocksdb` feature is disabled".to_string(),
            )),
        }
    }

    /// Volatile in-process storage
    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(MemoryBackend::new()))
    }

    /// Wrap an arbitrary backend
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        tracing::info!(backend = backend.name(), "Ledger storage opened");
        Self {
            backend,
            writer: Mutex::new(()),
        }
    }

    /// Start a unit of work, blocking until the writer lock is free
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            backend: self.backend.as_ref(),
            staged: BTreeMap::new(),
            _guard: self.writer.lock(),
        }
    }
}

impl Reader for Storage {
    fn raw_get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.backend.get(table, key)
    }

    fn raw_scan(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.backend.scan_prefix(table, prefix)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Staged writes committed atomically
pub struct UnitOfWork<'a> {
    backend: &'a dyn Backend,
    staged: BTreeMap<(Table, Vec<u8>), Vec<u8>>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> UnitOfWork<'a> {
    /// Stage an insert or update
    pub fn put<R: Record>(&mut self, record: &R) -> Result<()> {
        let value = bincode::serialize(record)?;
        self.staged
            .insert((R::TABLE, record.record_id().as_bytes().to_vec()), value);
        Ok(())
    }

    /// Stage an index entry
    pub fn link(&mut self, index: Index, parent: Uuid, child: Uuid) {
        self.staged
            .insert((Table::Indices, index.entry(parent, child)), Vec::new());
    }

    /// Claim a unique key for `owner`; `Duplicate` if someone holds it
    pub fn claim_unique(&mut self, key: &UniqueKey, owner: Uuid) -> Result<()> {
        if let Some(existing) = self.find_unique(key)? {
            if existing != owner {
                return Err(Error::Duplicate {
                    entity: key.entity(),
                    key: key.describe(),
                });
            }
            return Ok(());
        }
        self.staged
            .insert((Table::Indices, key.encode()), owner.as_bytes().to_vec());
        Ok(())
    }

    /// Number of staged puts
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Write everything in one batch
    pub fn commit(self) -> Result<usize> {
        let count = self.staged.len();
        if count == 0 {
            return Ok(0);
        }
        let batch = self
            .staged
            .into_iter()
            .map(|((table, key), value)| WriteOp { table, key, value })
            .collect();
        self.backend.write_batch(batch)?;
        tracing::debug!(writes = count, "Unit of work committed");
        Ok(count)
    }
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("backend", &self.backend.name())
            .field("staged", &self.staged.len())
            .finish()
    }
}

impl Reader for UnitOfWork<'_> {
    fn raw_get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.staged.get(&(table, key.to_vec())) {
            return Ok(Some(value.clone()));
        }
        self.backend.get(table, key)
    }

    fn raw_scan(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.backend.scan_prefix(table, prefix)?.into_iter().collect();
        for ((staged_table, key), value) in self.staged.range((table, prefix.to_vec())..) {
            if *staged_table != table || !key.starts_with(prefix) {
                break;
            }
            merged.insert(key.clone(), value.clone());
        }
        Ok(merged.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: Uuid,
        label: String,
    }

    impl Record for Row {
        const TABLE: Table = Table::Members;
        const ENTITY: &'static str = "row";

        fn record_id(&self) -> Uuid {
            self.id
        }
    }

    fn row(label: &str) -> Row {
        Row {
            id: Uuid::now_v7(),
            label: label.to_string(),
        }
    }

    /// Backend whose writes always fail
    struct FailingBackend(MemoryBackend);

    impl Backend for FailingBackend {
        fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.0.get(table, key)
        }

        fn scan_prefix(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
            self.0.scan_prefix(table, prefix)
        }

        fn write_batch(&self, _batch: Vec<WriteOp>) -> Result<()> {
            Err(Error::Persistence("disk full".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_commit_and_read_back() {
        let storage = Storage::in_memory();
        let parent = Uuid::now_v7();
        let a = row("a");
        let b = row("b");

        let mut uow = storage.begin();
        uow.put(&a).unwrap();
        uow.put(&b).unwrap();
        uow.link(Index::GroupMembers, parent, a.id);
        uow.link(Index::GroupMembers, parent, b.id);
        assert_eq!(uow.commit().unwrap(), 4);

        assert_eq!(storage.fetch::<Row>(a.id).unwrap(), a);
        let children: Vec<Row> = storage.children(Index::GroupMembers, parent).unwrap();
        assert_eq!(children, vec![a, b]);
    }

    #[test]
    fn test_uncommitted_work_is_discarded() {
        let storage = Storage::in_memory();
        let a = row("a");
        {
            let mut uow = storage.begin();
            uow.put(&a).unwrap();
            // visible inside the unit of work
            assert!(uow.get::<Row>(a.id).unwrap().is_some());
        }
        assert!(storage.get::<Row>(a.id).unwrap().is_none());
    }

    #[test]
    fn test_overlay_scan_merges_staged_children() {
        let storage = Storage::in_memory();
        let parent = Uuid::now_v7();
        let a = row("a");
        let mut uow = storage.begin();
        uow.put(&a).unwrap();
        uow.link(Index::LoanCharges, parent, a.id);
        uow.commit().unwrap();

        let b = row("b");
        let mut uow = storage.begin();
        uow.put(&b).unwrap();
        uow.link(Index::LoanCharges, parent, b.id);
        let seen: Vec<Row> = uow.children(Index::LoanCharges, parent).unwrap();
        assert_eq!(seen.len(), 2);
        // other indexes with the same parent are not mixed in
        let other: Vec<Row> = uow.children(Index::LoanPayments, parent).unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_unique_claims() {
        let storage = Storage::in_memory();
        let key = UniqueKey::PeriodName {
            group: Uuid::now_v7(),
            name: "Q1 2025".to_string(),
        };
        let owner = Uuid::now_v7();

        let mut uow = storage.begin();
        uow.claim_unique(&key, owner).unwrap();
        // re-claiming for the same owner is a no-op
        uow.claim_unique(&key, owner).unwrap();
        uow.commit().unwrap();
        assert_eq!(storage.find_unique(&key).unwrap(), Some(owner));

        let mut uow = storage.begin();
        let err = uow.claim_unique(&key, Uuid::now_v7()).unwrap_err();
        assert!(matches!(err, Error::Duplicate { entity: "settlement period", .. }));
    }

    #[test]
    fn test_failed_write_surfaces_persistence_error() {
        let storage = Storage::with_backend(Box::new(FailingBackend(MemoryBackend::new())));
        let a = row("a");
        let mut uow = storage.begin();
        uow.put(&a).unwrap();
        let err = uow.commit().unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert!(!err.is_domain());
        assert!(storage.get::<Row>(a.id).unwrap().is_none());
    }

    #[test]
    fn test_scan_whole_table() {
        let storage = Storage::in_memory();
        let mut uow = storage.begin();
        for label in ["x", "y", "z"] {
            uow.put(&row(label)).unwrap();
        }
        uow.commit().unwrap();
        let rows: Vec<Row> = storage.scan().unwrap();
        assert_eq!(rows.len(), 3);
    }
}
