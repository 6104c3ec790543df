use crate::domain::models::{CacheRecord, SyncResult};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{read_setting, write_setting};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const LAST_RESULT_KEY: &str = "ntp.lastResult";
pub const LAST_SYNC_TIME_KEY: &str = "ntp.lastSyncTime";

pub trait ResultCacheRepository: Send + Sync {
    fn load_captured_at(&self) -> Result<Option<i64>, InfraError>;
    fn load(&self) -> Result<Option<CacheRecord>, InfraError>;
    fn save(&self, record: &CacheRecord) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteResultCacheRepository {
    db_path: PathBuf,
}

impl SqliteResultCacheRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

fn parse_captured_at(raw: &str) -> Result<i64, InfraError> {
    raw.trim().parse::<i64>().map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {LAST_SYNC_TIME_KEY} '{raw}': {error}"))
    })
}

impl ResultCacheRepository for SqliteResultCacheRepository {
    fn load_captured_at(&self) -> Result<Option<i64>, InfraError> {
        let connection = self.connect()?;
        read_setting(&connection, LAST_SYNC_TIME_KEY)?
            .as_deref()
            .map(parse_captured_at)
            .transpose()
    }

    fn load(&self) -> Result<Option<CacheRecord>, InfraError> {
        let connection = self.connect()?;
        let Some(captured_at_raw) = read_setting(&connection, LAST_SYNC_TIME_KEY)? else {
            return Ok(None);
        };
        let Some(result_raw) = read_setting(&connection, LAST_RESULT_KEY)? else {
            return Ok(None);
        };

        let result: SyncResult = serde_json::from_str(&result_raw)?;
        Ok(Some(CacheRecord {
            result,
            captured_at_ms: parse_captured_at(&captured_at_raw)?,
        }))
    }

    fn save(&self, record: &CacheRecord) -> Result<(), InfraError> {
        let mut connection = self.connect()?;
        let result_json = serde_json::to_string(&record.result)?;
        let transaction = connection.transaction()?;
        write_setting(&transaction, LAST_RESULT_KEY, &result_json)?;
        write_setting(&transaction, LAST_SYNC_TIME_KEY, &record.captured_at_ms.to_string())?;
        transaction.commit()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryResultCacheRepository {
    record: Mutex<Option<CacheRecord>>,
}

impl InMemoryResultCacheRepository {
    pub fn with_record(record: CacheRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl ResultCacheRepository for InMemoryResultCacheRepository {
    fn load_captured_at(&self) -> Result<Option<i64>, InfraError> {
        Ok(self.load()?.map(|record| record.captured_at_ms))
    }

    fn load(&self) -> Result<Option<CacheRecord>, InfraError> {
        let record = self
            .record
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("result cache lock poisoned: {error}")))?;
        Ok(record.clone())
    }

    fn save(&self, record: &CacheRecord) -> Result<(), InfraError> {
        let mut stored = self
            .record
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("result cache lock poisoned: {error}")))?;
        *stored = Some(record.clone());
        Ok(())
    }
}
