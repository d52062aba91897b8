//! Persistent state storage
//!
//! The engine persists two kinds of records in an embedded key/value
//! store: the last-applied state of each entry (`entryState`) and the
//! execution marks of run-once scripts (`script`). The store opens with an
//! exclusive file lock; commands that may write state hold the lock for
//! their lifetime, dry-run commands open read-only.

use crate::error::{Error, Result};
use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, StorageError, TableDefinition};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

/// Bucket holding the last successfully applied state per destination path
pub const ENTRY_STATE_BUCKET: &str = "entryState";

/// Bucket holding run-once script execution marks
pub const SCRIPT_STATE_BUCKET: &str = "script";

/// Default time to wait for the exclusive state lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Trait for persistent state storage
///
/// Implementations are keyed by `(bucket, key)`. Iteration order within a
/// bucket is ascending by key bytes.
pub trait PersistentState {
    /// Get a value from a bucket
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Set a value in a bucket
    fn set(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key from a bucket
    fn delete(&self, bucket: &str, key: &[u8]) -> Result<()>;

    /// Iterate over all key-value pairs in a bucket
    fn for_each(
        &self,
        bucket: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()>;
}

impl<P: PersistentState + ?Sized> PersistentState for std::rc::Rc<P> {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(bucket, key)
    }

    fn set(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).set(bucket, key, value)
    }

    fn delete(&self, bucket: &str, key: &[u8]) -> Result<()> {
        (**self).delete(bucket, key)
    }

    fn for_each(
        &self,
        bucket: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        (**self).for_each(bucket, f)
    }
}

impl<P: PersistentState + ?Sized> PersistentState for &P {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(bucket, key)
    }

    fn set(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).set(bucket, key, value)
    }

    fn delete(&self, bucket: &str, key: &[u8]) -> Result<()> {
        (**self).delete(bucket, key)
    }

    fn for_each(
        &self,
        bucket: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        (**self).for_each(bucket, f)
    }
}

/// Persistent state implementation using redb
///
/// redb takes an exclusive file lock on open. [`RedbPersistentState::open`]
/// retries until the configured timeout and then fails with
/// [`Error::StateLocked`], so a second concurrent invocation reports a
/// clear error instead of hanging.
#[derive(Debug)]
pub struct RedbPersistentState {
    db: Database,
}

fn is_locked(err: &DatabaseError) -> bool {
    match err {
        DatabaseError::DatabaseAlreadyOpen => true,
        DatabaseError::Storage(StorageError::Io(e)) => {
            e.kind() == std::io::ErrorKind::WouldBlock
        }
        _ => false,
    }
}

impl RedbPersistentState {
    /// Create or open a persistent state database, waiting up to `timeout`
    /// for the exclusive lock
    pub fn open(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match Database::create(path) {
                Ok(db) => return Ok(Self { db }),
                Err(e) if is_locked(&e) => {
                    if Instant::now() >= deadline {
                        return Err(Error::StateLocked {
                            path: path.to_path_buf(),
                            timeout,
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(Error::State(format!("Failed to open database: {e}")));
                }
            }
        }
    }

    /// Open in read-only mode
    ///
    /// Used by dry-run commands so they never escalate to the write lock.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path)
            .map_err(|e| Error::State(format!("Failed to open database: {e}")))?;
        Ok(Self { db })
    }

    /// Close the database
    pub fn close(self) -> Result<()> {
        drop(self.db);
        Ok(())
    }

    /// Create table definition, avoiding an allocation for known buckets
    #[inline]
    fn table_def(bucket: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
        match bucket {
            ENTRY_STATE_BUCKET => TableDefinition::new(ENTRY_STATE_BUCKET),
            SCRIPT_STATE_BUCKET => TableDefinition::new(SCRIPT_STATE_BUCKET),
            // Unknown buckets leak a copy of the name to satisfy the
            // 'static lifetime redb requires.
            _ => TableDefinition::new(Box::leak(bucket.to_string().into_boxed_str())),
        }
    }
}

impl PersistentState for RedbPersistentState {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| Error::State(format!("Failed to begin read transaction: {e}")))?;
        let Ok(table) = read_txn.open_table(Self::table_def(bucket)) else {
            // Table does not exist yet.
            return Ok(None);
        };
        match table.get(key) {
            Ok(Some(value)) => Ok(Some(value.value().to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::State(format!("Failed to get value: {e}"))),
        }
    }

    fn set(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| Error::State(format!("Failed to begin write transaction: {e}")))?;
        {
            let mut table = write_txn
                .open_table(Self::table_def(bucket))
                .map_err(|e| Error::State(format!("Failed to open table: {e}")))?;
            table
                .insert(key, value)
                .map_err(|e| Error::State(format!("Failed to insert value: {e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| Error::State(format!("Failed to commit transaction: {e}")))?;
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| Error::State(format!("Failed to begin write transaction: {e}")))?;
        {
            let mut table = write_txn
                .open_table(Self::table_def(bucket))
                .map_err(|e| Error::State(format!("Failed to open table: {e}")))?;
            table
                .remove(key)
                .map_err(|e| Error::State(format!("Failed to remove value: {e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| Error::State(format!("Failed to commit transaction: {e}")))?;
        Ok(())
    }

    fn for_each(
        &self,
        bucket: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| Error::State(format!("Failed to begin read transaction: {e}")))?;
        let Ok(table) = read_txn.open_table(Self::table_def(bucket)) else {
            return Ok(());
        };
        let iter = table
            .iter()
            .map_err(|e| Error::State(format!("Failed to iterate table: {e}")))?;
        for item in iter {
            let (key, value) =
                item.map_err(|e| Error::State(format!("Failed to read item: {e}")))?;
            f(key.value(), value.value())?;
        }
        Ok(())
    }
}

/// Persistent state wrapper where reads pass through and writes are no-ops
pub struct DryRunPersistentState<'a> {
    inner: Box<dyn PersistentState + 'a>,
}

impl<'a> DryRunPersistentState<'a> {
    /// Wrap `inner`
    #[must_use]
    pub fn new(inner: Box<dyn PersistentState + 'a>) -> Self {
        Self { inner }
    }
}

impl PersistentState for DryRunPersistentState<'_> {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(bucket, key)
    }

    fn set(&self, _bucket: &str, _key: &[u8], _value: &[u8]) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _bucket: &str, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn for_each(
        &self,
        bucket: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        self.inner.for_each(bucket, f)
    }
}

/// Persistent state wrapper where writes fail with a permission error
pub struct ReadOnlyPersistentState<'a> {
    inner: Box<dyn PersistentState + 'a>,
}

impl<'a> ReadOnlyPersistentState<'a> {
    /// Wrap `inner`
    #[must_use]
    pub fn new(inner: Box<dyn PersistentState + 'a>) -> Self {
        Self { inner }
    }
}

impl PersistentState for ReadOnlyPersistentState<'_> {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(bucket, key)
    }

    fn set(&self, bucket: &str, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(Error::Permission {
            op: "set",
            path: bucket.into(),
        })
    }

    fn delete(&self, bucket: &str, _key: &[u8]) -> Result<()> {
        Err(Error::Permission {
            op: "delete",
            path: bucket.into(),
        })
    }

    fn for_each(
        &self,
        bucket: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        self.inner.for_each(bucket, f)
    }
}

/// Persistent state that stores nothing
///
/// Reads find nothing and writes succeed silently; used by the archive and
/// dump sinks whose output has no state.
#[derive(Debug, Default)]
pub struct NullPersistentState;

impl PersistentState for NullPersistentState {
    fn get(&self, _bucket: &str, _key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn set(&self, _bucket: &str, _key: &[u8], _value: &[u8]) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _bucket: &str, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn for_each(
        &self,
        _bucket: &str,
        _f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Persistent state wrapper that logs every call
pub struct DebugPersistentState<'a> {
    inner: Box<dyn PersistentState + 'a>,
}

impl<'a> DebugPersistentState<'a> {
    /// Wrap `inner`
    #[must_use]
    pub fn new(inner: Box<dyn PersistentState + 'a>) -> Self {
        Self { inner }
    }
}

impl PersistentState for DebugPersistentState<'_> {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let result = self.inner.get(bucket, key);
        tracing::debug!(
            bucket,
            key = %String::from_utf8_lossy(key),
            ok = result.is_ok(),
            "persistent_state.get"
        );
        result
    }

    fn set(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let result = self.inner.set(bucket, key, value);
        tracing::debug!(
            bucket,
            key = %String::from_utf8_lossy(key),
            value_len = value.len(),
            ok = result.is_ok(),
            "persistent_state.set"
        );
        result
    }

    fn delete(&self, bucket: &str, key: &[u8]) -> Result<()> {
        let result = self.inner.delete(bucket, key);
        tracing::debug!(
            bucket,
            key = %String::from_utf8_lossy(key),
            ok = result.is_ok(),
            "persistent_state.delete"
        );
        result
    }

    fn for_each(
        &self,
        bucket: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        tracing::debug!(bucket, "persistent_state.for_each");
        self.inner.for_each(bucket, f)
    }
}

type BucketData = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory persistent state for testing
#[derive(Debug, Default)]
pub struct MockPersistentState {
    data: RefCell<BTreeMap<String, BucketData>>,
}

impl MockPersistentState {
    /// Create a new empty mock store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentState for MockPersistentState {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .data
            .borrow()
            .get(bucket)
            .and_then(|b| b.get(key).cloned()))
    }

    fn set(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.data
            .borrow_mut()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &[u8]) -> Result<()> {
        if let Some(bucket_data) = self.data.borrow_mut().get_mut(bucket) {
            bucket_data.remove(key);
        }
        Ok(())
    }

    fn for_each(
        &self,
        bucket: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        if let Some(bucket_data) = self.data.borrow().get(bucket) {
            for (k, v) in bucket_data {
                f(k, v)?;
            }
        }
        Ok(())
    }
}
