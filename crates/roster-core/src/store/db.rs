//! Persistent repository backed by redb.
//!
//! # Table design
//!
//! ```text
//! members   external id (str)      -> JSON MemberRecord
//! requests  uuid bytes (16 bytes)  -> JSON WorkflowRequest
//! dedup     member/old/new key     -> JSON DedupEntry
//! ```
//!
//! Write transactions are serialized by redb, so the read-check-write in
//! `append_stage_events` and `record_dedup` is atomic.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use super::{check_append, Repository};
use crate::dedup::DedupEntry;
use crate::error::{Result, RosterError};
use crate::member::MemberRecord;
use crate::workflow::WorkflowRequest;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("members");
const REQUESTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("requests");
const DEDUP: TableDefinition<&str, &[u8]> = TableDefinition::new("dedup");

fn db_err(e: impl std::fmt::Display) -> RosterError {
    RosterError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// RedbRepository
// ---------------------------------------------------------------------------

pub struct RedbRepository {
    db: Database,
}

impl RedbRepository {
    /// Open or create the database at `path` and make sure every table
    /// exists before the first read.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(MEMBERS).map_err(db_err)?;
        wt.open_table(REQUESTS).map_err(db_err)?;
        wt.open_table(DEDUP).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn read_all<T, K>(&self, def: TableDefinition<K, &'static [u8]>) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
        K: redb::Key + 'static,
    {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(def).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }
}

impl Repository for RedbRepository {
    fn get_member(&self, id: &str) -> Result<Option<MemberRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(MEMBERS).map_err(db_err)?;
        match table.get(id).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn list_members(&self) -> Result<Vec<MemberRecord>> {
        // Key order is external id order.
        self.read_all(MEMBERS)
    }

    fn upsert_member(&self, member: &MemberRecord) -> Result<()> {
        let value = serde_json::to_vec(member)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(MEMBERS).map_err(db_err)?;
            table
                .insert(member.external_id.as_str(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn remove_member(&self, id: &str) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let removed = {
            let mut table = wt.open_table(MEMBERS).map_err(db_err)?;
            let removed = table.remove(id).map_err(db_err)?.is_some();
            removed
        };
        wt.commit().map_err(db_err)?;
        Ok(removed)
    }

    fn get_request(&self, id: Uuid) -> Result<Option<WorkflowRequest>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(REQUESTS).map_err(db_err)?;
        match table.get(id.as_bytes().as_slice()).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn list_requests(&self) -> Result<Vec<WorkflowRequest>> {
        let mut out: Vec<WorkflowRequest> = self.read_all(REQUESTS)?;
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn upsert_request(&self, request: &WorkflowRequest) -> Result<()> {
        let value = serde_json::to_vec(request)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(REQUESTS).map_err(db_err)?;
            table
                .insert(request.id.as_bytes().as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn append_stage_events(&self, request: &WorkflowRequest, expected_len: usize) -> Result<()> {
        let value = serde_json::to_vec(request)?;
        let key = request.id.as_bytes().as_slice();
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(REQUESTS).map_err(db_err)?;
            let stored: Option<WorkflowRequest> = match table.get(key).map_err(db_err)? {
                Some(v) => Some(serde_json::from_slice(v.value())?),
                None => None,
            };
            check_append(stored.as_ref(), request, expected_len)?;
            table.insert(key, value.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn record_dedup(&self, entry: &DedupEntry, window: Duration) -> Result<bool> {
        let key = entry.key();
        let wt = self.db.begin_write().map_err(db_err)?;
        let fresh = {
            let mut table = wt.open_table(DEDUP).map_err(db_err)?;
            let existing: Option<DedupEntry> = match table.get(key.as_str()).map_err(db_err)? {
                Some(v) => Some(serde_json::from_slice(v.value())?),
                None => None,
            };
            match existing {
                Some(e) if e.is_live(entry.created_at, window) => false,
                _ => {
                    let value = serde_json::to_vec(entry)?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(db_err)?;
                    true
                }
            }
        };
        if fresh {
            wt.commit().map_err(db_err)?;
        } else {
            wt.abort().map_err(db_err)?;
        }
        Ok(fresh)
    }

    fn prune_dedup(&self, before: DateTime<Utc>) -> Result<u32> {
        let entries: Vec<DedupEntry> = self.read_all(DEDUP)?;
        let expired: Vec<String> = entries
            .into_iter()
            .filter(|e| e.created_at <= before)
            .map(|e| e.key())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        let wt = self.db.begin_write().map_err(db_err)?;
        let mut count = 0u32;
        {
            let mut table = wt.open_table(DEDUP).map_err(db_err)?;
            for key in &expired {
                if table.remove(key.as_str()).map_err(db_err)?.is_some() {
                    count += 1;
                }
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
