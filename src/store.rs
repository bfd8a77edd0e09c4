//! Spoiler record persistence.
//!
//! The store keeps one row per accepted spoiler: where it was found, when,
//! and the descriptor (with its strategy tag) so the window can be
//! rehydrated at startup without refetching a single image.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};

use crate::card::{CardImage, Descriptor, StrategyKind};
use crate::sources::SourceKind;
use crate::window::SpoiledRecord;

/// A persisted spoiler row.
#[derive(Clone, Debug)]
pub struct StoredSpoiler {
    pub found_at: u64,
    pub location: String,
    pub page_url: Option<String>,
    pub source: SourceKind,
    pub set_code: Option<String>,
    pub descriptor: Descriptor,
}

impl StoredSpoiler {
    pub fn into_record(self) -> SpoiledRecord {
        SpoiledRecord {
            image: CardImage::from_location(self.location).with_descriptor(self.descriptor),
            found_at: self.found_at,
            source: self.source,
            set_code: self.set_code,
            page_url: self.page_url,
        }
    }

    fn from_record(record: &SpoiledRecord) -> Result<Self> {
        let descriptor = record.image.descriptor().ok_or_else(|| {
            anyhow!(
                "record for {} has no descriptor to persist",
                record.image.location()
            )
        })?;
        Ok(Self {
            found_at: record.found_at,
            location: record.image.location().to_string(),
            page_url: record.page_url.clone(),
            source: record.source,
            set_code: record.set_code.clone(),
            descriptor: descriptor.clone(),
        })
    }
}

pub trait SpoilerStore {
    fn append(&mut self, record: &SpoiledRecord) -> Result<()>;

    /// Records strictly newer than `cutoff` (epoch seconds), oldest first.
    fn records_since(&mut self, cutoff: u64) -> Result<Vec<StoredSpoiler>>;
}

pub struct SqliteSpoilerStore {
    conn: Connection,
}

impl SqliteSpoilerStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS spoiler (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              found_at INTEGER NOT NULL,
              location TEXT NOT NULL,
              page_url TEXT,
              source TEXT NOT NULL,
              set_code TEXT,
              comparator TEXT NOT NULL,
              descriptor BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_spoiler_found ON spoiler(found_at);
            "#,
        )?;
        Ok(())
    }
}

impl SpoilerStore for SqliteSpoilerStore {
    fn append(&mut self, record: &SpoiledRecord) -> Result<()> {
        let stored = StoredSpoiler::from_record(record)?;
        let found_at =
            i64::try_from(stored.found_at).map_err(|_| anyhow!("found_at exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO spoiler(found_at, location, page_url, source, set_code, comparator, descriptor)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                found_at,
                stored.location,
                stored.page_url,
                stored.source.as_str(),
                stored.set_code,
                stored.descriptor.kind().as_str(),
                stored.descriptor.bytes(),
            ],
        )?;
        Ok(())
    }

    fn records_since(&mut self, cutoff: u64) -> Result<Vec<StoredSpoiler>> {
        let cutoff = i64::try_from(cutoff).map_err(|_| anyhow!("cutoff exceeds i64 range"))?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT found_at, location, page_url, source, set_code, comparator, descriptor
            FROM spoiler
            WHERE found_at > ?1
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Vec<u8>>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (found_at, location, page_url, source, set_code, comparator, descriptor) = row?;
            let found_at =
                u64::try_from(found_at).map_err(|_| anyhow!("negative found_at in store"))?;
            let source = SourceKind::parse(&source)
                .ok_or_else(|| anyhow!("unknown source '{}' in store", source))?;
            let kind = StrategyKind::parse(&comparator)
                .ok_or_else(|| anyhow!("unknown comparator '{}' in store", comparator))?;
            records.push(StoredSpoiler {
                found_at,
                location,
                page_url,
                source,
                set_code,
                descriptor: Descriptor::new(kind, descriptor),
            });
        }
        Ok(records)
    }
}

/// In-memory store for tests and dry runs.
pub struct InMemorySpoilerStore {
    rows: Vec<StoredSpoiler>,
}

impl InMemorySpoilerStore {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Default for InMemorySpoilerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SpoilerStore for InMemorySpoilerStore {
    fn append(&mut self, record: &SpoiledRecord) -> Result<()> {
        self.rows.push(StoredSpoiler::from_record(record)?);
        Ok(())
    }

    fn records_since(&mut self, cutoff: u64) -> Result<Vec<StoredSpoiler>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.found_at > cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::RecordMeta;

    fn record(location: &str, found_at: u64) -> SpoiledRecord {
        let meta = RecordMeta {
            source: SourceKind::ScrapeFeed,
            set_code: Some("xyz".to_string()),
            page_url: Some("https://spoilers.example/cards/xyz1.html".to_string()),
            found_at,
        };
        SpoiledRecord {
            image: CardImage::from_location(location)
                .with_descriptor(Descriptor::new(StrategyKind::Histogram, vec![7; 2048])),
            found_at: meta.found_at,
            source: meta.source,
            set_code: meta.set_code,
            page_url: meta.page_url,
        }
    }

    #[test]
    fn sqlite_roundtrips_a_record() {
        let mut store = SqliteSpoilerStore::open_in_memory().unwrap();
        store.append(&record("https://img.example/a.png", 5_000)).unwrap();

        let rows = store.records_since(0).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.found_at, 5_000);
        assert_eq!(row.location, "https://img.example/a.png");
        assert_eq!(row.source, SourceKind::ScrapeFeed);
        assert_eq!(row.set_code.as_deref(), Some("xyz"));
        assert_eq!(row.descriptor.kind(), StrategyKind::Histogram);
        assert_eq!(row.descriptor.bytes(), &[7; 2048][..]);
    }

    #[test]
    fn records_since_is_a_strict_cutoff() {
        let mut store = SqliteSpoilerStore::open_in_memory().unwrap();
        store.append(&record("https://img.example/a.png", 1_000)).unwrap();
        store.append(&record("https://img.example/b.png", 2_000)).unwrap();

        assert_eq!(store.records_since(1_000).unwrap().len(), 1);
        assert_eq!(store.records_since(999).unwrap().len(), 2);
        assert!(store.records_since(2_000).unwrap().is_empty());
    }

    #[test]
    fn append_requires_a_descriptor() {
        let mut store = InMemorySpoilerStore::new();
        let mut bad = record("https://img.example/a.png", 1_000);
        bad.image = CardImage::from_location("https://img.example/a.png");
        assert!(store.append(&bad).is_err());
    }

    #[test]
    fn rows_come_back_oldest_first() {
        let mut store = SqliteSpoilerStore::open_in_memory().unwrap();
        for (location, at) in [("mem:a", 3_000u64), ("mem:b", 1_000), ("mem:c", 2_000)] {
            store.append(&record(location, at)).unwrap();
        }
        let rows = store.records_since(0).unwrap();
        let locations: Vec<&str> = rows.iter().map(|r| r.location.as_str()).collect();
        // Insertion order, not timestamp order.
        assert_eq!(locations, ["mem:a", "mem:b", "mem:c"]);
    }
}
