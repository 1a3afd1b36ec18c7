//! Hot storage: the durable, transactional store co-located with one
//! stream's engine instance (spec §4.2). Backed by an embedded SQLite
//! database, one file (or `:memory:`) per stream.

use estuary_types::Offset;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stream not found")]
    NotFound,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct StreamMeta {
    pub content_type: String,
    pub closed: bool,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub tail_stream_seq: u64,
    pub tail_byte_offset: u64,
    pub reader_key: Option<String>,
}

impl StreamMeta {
    pub fn tail(&self) -> Offset {
        Offset::new(self.tail_stream_seq, self.tail_byte_offset)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|e| now_ms >= e)
    }
}

#[derive(Debug, Clone)]
pub struct NewStream {
    pub content_type: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub reader_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpRow {
    pub offset: Offset,
    pub payload: Vec<u8>,
    pub write_ts: i64,
    pub producer_id: Option<String>,
    pub producer_epoch: Option<i64>,
    pub producer_seq: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewOp {
    pub payload: Vec<u8>,
    pub write_ts: i64,
    pub producer_id: Option<String>,
    pub producer_epoch: Option<i64>,
    pub producer_seq: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SegmentRow {
    pub idx: i64,
    pub start_seq: u64,
    pub end_seq: u64,
    pub start_offset: Offset,
    pub end_offset: Offset,
    pub byte_len: u64,
    pub object_key: String,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct NewSegment {
    pub start_seq: u64,
    pub end_seq: u64,
    pub start_offset: Offset,
    pub end_offset: Offset,
    pub byte_len: u64,
    pub object_key: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ProducerState {
    pub epoch: i64,
    pub seq: i64,
    pub last_updated: i64,
}

/// An embedded relational store scoped to exactly one stream.
pub struct HotStore {
    conn: Connection,
}

impl HotStore {
    /// Open an in-memory store (tests, or ephemeral streams).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Open (creating if absent) a file-backed store at `path`.
    pub fn open_file(path: &std::path::Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn migrate(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS stream (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                content_type TEXT NOT NULL,
                closed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                tail_stream_seq INTEGER NOT NULL DEFAULT 0,
                tail_byte_offset INTEGER NOT NULL DEFAULT 0,
                reader_key TEXT
            );
            CREATE TABLE IF NOT EXISTS ops (
                stream_seq INTEGER NOT NULL,
                byte_offset INTEGER NOT NULL,
                payload BLOB NOT NULL,
                write_ts INTEGER NOT NULL,
                producer_id TEXT,
                producer_epoch INTEGER,
                producer_seq INTEGER,
                PRIMARY KEY (stream_seq, byte_offset)
            );
            CREATE TABLE IF NOT EXISTS segments (
                idx INTEGER PRIMARY KEY AUTOINCREMENT,
                start_seq INTEGER NOT NULL,
                end_seq INTEGER NOT NULL,
                start_stream_seq INTEGER NOT NULL,
                start_byte_offset INTEGER NOT NULL,
                end_stream_seq INTEGER NOT NULL,
                end_byte_offset INTEGER NOT NULL,
                byte_len INTEGER NOT NULL,
                object_key TEXT NOT NULL,
                content_type TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS producers (
                producer_id TEXT PRIMARY KEY,
                epoch INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                last_updated INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn create_stream(&self, new: NewStream) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO stream (id, content_type, closed, created_at, expires_at, reader_key)
             VALUES (0, ?1, 0, ?2, ?3, ?4)",
            params![new.content_type, new.created_at, new.expires_at, new.reader_key],
        )?;
        Ok(())
    }

    pub fn get_stream(&self) -> Result<Option<StreamMeta>, StoreError> {
        self.conn
            .query_row(
                "SELECT content_type, closed, created_at, expires_at, tail_stream_seq,
                        tail_byte_offset, reader_key FROM stream WHERE id = 0",
                [],
                |row| {
                    Ok(StreamMeta {
                        content_type: row.get(0)?,
                        closed: row.get::<_, i64>(1)? != 0,
                        created_at: row.get(2)?,
                        expires_at: row.get(3)?,
                        tail_stream_seq: row.get::<_, i64>(4)? as u64,
                        tail_byte_offset: row.get::<_, i64>(5)? as u64,
                        reader_key: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn set_closed(&self, closed: bool) -> Result<(), StoreError> {
        self.conn
            .execute("UPDATE stream SET closed = ?1 WHERE id = 0", params![closed as i64])?;
        Ok(())
    }

    pub fn get_producer(&self, producer_id: &str) -> Result<Option<ProducerState>, StoreError> {
        self.conn
            .query_row(
                "SELECT epoch, seq, last_updated FROM producers WHERE producer_id = ?1",
                params![producer_id],
                |row| {
                    Ok(ProducerState {
                        epoch: row.get(0)?,
                        seq: row.get(1)?,
                        last_updated: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Append one op, advance the tail, and upsert producer state, all in
    /// one transaction (spec §4.2 invariant).
    pub fn append(&mut self, op: NewOp, close_after: bool) -> Result<Offset, StoreError> {
        let tx = self.conn.transaction()?;

        let (stream_seq, byte_offset): (i64, i64) = tx.query_row(
            "SELECT tail_stream_seq, tail_byte_offset FROM stream WHERE id = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        tx.execute(
            "INSERT INTO ops (stream_seq, byte_offset, payload, write_ts, producer_id,
                               producer_epoch, producer_seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                stream_seq,
                byte_offset,
                op.payload,
                op.write_ts,
                op.producer_id,
                op.producer_epoch,
                op.producer_seq
            ],
        )?;

        let new_stream_seq = stream_seq + 1;
        let new_byte_offset = byte_offset + op.payload.len() as i64;

        tx.execute(
            "UPDATE stream SET tail_stream_seq = ?1, tail_byte_offset = ?2, closed = closed OR ?3
             WHERE id = 0",
            params![new_stream_seq, new_byte_offset, close_after as i64],
        )?;

        if let Some(pid) = &op.producer_id {
            tx.execute(
                "INSERT INTO producers (producer_id, epoch, seq, last_updated)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(producer_id) DO UPDATE SET epoch = excluded.epoch,
                    seq = excluded.seq, last_updated = excluded.last_updated",
                params![pid, op.producer_epoch, op.producer_seq, op.write_ts],
            )?;
        }

        tx.commit()?;

        Ok(Offset::new(stream_seq as u64, byte_offset as u64))
    }

    /// List ops with `offset >= from`, capped at `byte_cap` cumulative
    /// payload bytes (always includes at least one op if any match).
    pub fn list_ops_from(&self, from: Offset, byte_cap: usize) -> Result<Vec<OpRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT stream_seq, byte_offset, payload, write_ts, producer_id, producer_epoch,
                    producer_seq
             FROM ops
             WHERE stream_seq > ?1 OR (stream_seq = ?1 AND byte_offset >= ?2)
             ORDER BY stream_seq ASC, byte_offset ASC",
        )?;
        let rows = stmt.query_map(params![from.stream_seq as i64, from.byte_offset as i64], |row| {
            Ok(OpRow {
                offset: Offset::new(row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64),
                payload: row.get(2)?,
                write_ts: row.get(3)?,
                producer_id: row.get(4)?,
                producer_epoch: row.get(5)?,
                producer_seq: row.get(6)?,
            })
        })?;

        let mut out = Vec::new();
        let mut total = 0usize;
        for row in rows {
            let row = row?;
            if !out.is_empty() && total + row.payload.len() > byte_cap {
                break;
            }
            total += row.payload.len();
            out.push(row);
            if total >= byte_cap {
                break;
            }
        }
        Ok(out)
    }

    /// Count and total byte size of ops at/after `from`, for rotation
    /// threshold decisions.
    pub fn ops_stats_from(&self, from: Offset) -> Result<(u64, u64), StoreError> {
        self.conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) FROM ops
                 WHERE stream_seq > ?1 OR (stream_seq = ?1 AND byte_offset >= ?2)",
                params![from.stream_seq as i64, from.byte_offset as i64],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            )
            .map_err(StoreError::from)
    }

    /// Atomically insert a segment row and delete the ops it covers
    /// (spec §4.5 rotation step c).
    pub fn rotate_into_segment(&mut self, segment: NewSegment) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO segments (start_seq, end_seq, start_stream_seq, start_byte_offset,
                                    end_stream_seq, end_byte_offset, byte_len, object_key,
                                    content_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                segment.start_seq as i64,
                segment.end_seq as i64,
                segment.start_offset.stream_seq as i64,
                segment.start_offset.byte_offset as i64,
                segment.end_offset.stream_seq as i64,
                segment.end_offset.byte_offset as i64,
                segment.byte_len as i64,
                segment.object_key,
                segment.content_type,
            ],
        )?;

        tx.execute(
            "DELETE FROM ops WHERE stream_seq >= ?1 AND stream_seq <= ?2",
            params![segment.start_seq as i64, segment.end_seq as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn list_segments(&self) -> Result<Vec<SegmentRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT idx, start_seq, end_seq, start_stream_seq, start_byte_offset,
                    end_stream_seq, end_byte_offset, byte_len, object_key, content_type
             FROM segments ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SegmentRow {
                idx: row.get(0)?,
                start_seq: row.get::<_, i64>(1)? as u64,
                end_seq: row.get::<_, i64>(2)? as u64,
                start_offset: Offset::new(row.get::<_, i64>(3)? as u64, row.get::<_, i64>(4)? as u64),
                end_offset: Offset::new(row.get::<_, i64>(5)? as u64, row.get::<_, i64>(6)? as u64),
                byte_len: row.get::<_, i64>(7)? as u64,
                object_key: row.get(8)?,
                content_type: row.get(9)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// The segment, if any, whose `[start_seq, end_seq]` covers `seq`.
    pub fn segment_covering(&self, seq: u64) -> Result<Option<SegmentRow>, StoreError> {
        Ok(self
            .list_segments()?
            .into_iter()
            .find(|s| s.start_seq <= seq && seq <= s.end_seq))
    }

    /// Drop every row belonging to this stream, returning the cold-storage
    /// object keys the caller must also delete.
    pub fn delete_all(&mut self) -> Result<Vec<String>, StoreError> {
        let keys = self
            .list_segments()?
            .into_iter()
            .map(|s| s.object_key)
            .collect();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM ops", [])?;
        tx.execute("DELETE FROM segments", [])?;
        tx.execute("DELETE FROM producers", [])?;
        tx.execute("DELETE FROM stream", [])?;
        tx.commit()?;
        Ok(keys)
    }
}
