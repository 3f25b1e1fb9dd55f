//! RocksDB-backed [`StreamLedger`].
//!
//! Two column families: `stream` holds the single [`StreamRecord`] under a
//! fixed key, `positions` holds one [`Position`] per owner keyed by the raw
//! 32-byte address. Values are bincode-encoded. [`StreamLedger::commit`]
//! writes the record and every touched position in one [`WriteBatch`].

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use tracing::debug;

use sluice_core::error::StoreError;
use sluice_core::traits::StreamLedger;
use sluice_core::types::{Address, Position, StreamRecord};

// --- Column family names ---

const CF_STREAM: &str = "stream";
const CF_POSITIONS: &str = "positions";

const ALL_CFS: &[&str] = &[CF_STREAM, CF_POSITIONS];

const RECORD_KEY: &[u8] = b"record";

/// Persistent ledger of one stream instance.
pub struct RocksLedger {
    db: DB,
}

impl RocksLedger {
    /// Open or create a ledger at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(path = %path.as_ref().display(), "stream ledger opened");
        Ok(Self { db })
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        for name in ALL_CFS {
            let cf = self.cf_handle(name)?;
            self.db
                .flush_cf(&cf)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    // --- Internal helpers ---

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))
    }

    fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
        let (value, _): (T, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(value)
    }

    fn decode_owner(bytes: &[u8]) -> Result<Address, StoreError> {
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StoreError::Codec(format!("invalid position key length: {}", bytes.len())))?;
        Ok(Address(raw))
    }
}

impl StreamLedger for RocksLedger {
    fn load_record(&self) -> Result<Option<StreamRecord>, StoreError> {
        let cf = self.cf_handle(CF_STREAM)?;
        match self
            .db
            .get_cf(&cf, RECORD_KEY)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_record(&mut self, record: &StreamRecord) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_STREAM)?;
        self.db
            .put_cf(&cf, RECORD_KEY, Self::encode(record)?)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn get_position(&self, owner: &Address) -> Result<Option<Position>, StoreError> {
        let cf = self.cf_handle(CF_POSITIONS)?;
        match self
            .db
            .get_cf(&cf, owner.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_position(&mut self, owner: &Address, position: &Position) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_POSITIONS)?;
        self.db
            .put_cf(&cf, owner.as_bytes(), Self::encode(position)?)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Positions in key order, which is owner address order.
    fn positions(&self) -> Result<Vec<(Address, Position)>, StoreError> {
        let cf = self.cf_handle(CF_POSITIONS)?;
        let mut positions = Vec::new();

        let iter = self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start);
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            positions.push((Self::decode_owner(&key)?, Self::decode(&value)?));
        }

        Ok(positions)
    }

    fn commit(
        &mut self,
        record: &StreamRecord,
        positions: &[(Address, Position)],
    ) -> Result<(), StoreError> {
        let cf_stream = self.cf_handle(CF_STREAM)?;
        let cf_positions = self.cf_handle(CF_POSITIONS)?;

        let mut batch = WriteBatch::default();
        for (owner, position) in positions {
            batch.put_cf(&cf_positions, owner.as_bytes(), Self::encode(position)?);
        }
        batch.put_cf(&cf_stream, RECORD_KEY, Self::encode(record)?);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(stream = record.id, positions = positions.len(), "ledger committed");
        Ok(())
    }

    fn restore(
        &mut self,
        record: Option<&StreamRecord>,
        positions: &[(Address, Option<Position>)],
    ) -> Result<(), StoreError> {
        let cf_stream = self.cf_handle(CF_STREAM)?;
        let cf_positions = self.cf_handle(CF_POSITIONS)?;

        let mut batch = WriteBatch::default();
        for (owner, position) in positions {
            match position {
                Some(position) => {
                    batch.put_cf(&cf_positions, owner.as_bytes(), Self::encode(position)?)
                }
                None => batch.delete_cf(&cf_positions, owner.as_bytes()),
            }
        }
        match record {
            Some(record) => batch.put_cf(&cf_stream, RECORD_KEY, Self::encode(record)?),
            None => batch.delete_cf(&cf_stream, RECORD_KEY),
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(positions = positions.len(), "ledger restored");
        Ok(())
    }
}
