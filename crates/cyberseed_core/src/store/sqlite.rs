use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{
    ContentStore, CyberwareRecord, ItemRecord, PageRow, SourceRecord, StoredPage,
    SubdistrictRecord, TABLE_NAMES, aliases_from_json, aliases_to_json,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site TEXT NOT NULL,
    url TEXT NOT NULL,
    license TEXT,
    notes TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sources_site_url ON sources(site, url);

CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    url TEXT NOT NULL,
    lang TEXT NOT NULL DEFAULT 'en',
    pageid INTEGER NOT NULL,
    revid INTEGER,
    last_seen_at TEXT NOT NULL,
    wikitext TEXT,
    summary TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_pageid ON pages(pageid);

CREATE TABLE IF NOT EXISTS subdistricts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    parent_district TEXT,
    description TEXT,
    aliases TEXT,
    page_id INTEGER NOT NULL REFERENCES pages(id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_subdistricts_page_id ON subdistricts(page_id);

CREATE TABLE IF NOT EXISTS cyberware (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    slot TEXT,
    manufacturer TEXT,
    rarity_min TEXT,
    rarity_max TEXT,
    description TEXT,
    page_id INTEGER NOT NULL REFERENCES pages(id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_cyberware_page_id ON cyberware(page_id);

CREATE TABLE IF NOT EXISTS cyberware_variants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cyberware_id INTEGER NOT NULL REFERENCES cyberware(id),
    rarity TEXT,
    effects_json TEXT,
    requirements_json TEXT,
    price INTEGER,
    page_id INTEGER REFERENCES pages(id)
);

CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    category TEXT,
    subcategory TEXT,
    description TEXT,
    page_id INTEGER NOT NULL REFERENCES pages(id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_items_page_id ON items(page_id);

CREATE TABLE IF NOT EXISTS item_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES items(id),
    stat_key TEXT NOT NULL,
    stat_value TEXT,
    unit TEXT,
    source_note TEXT
);
"#;

const PAGE_COLUMNS: &str =
    "id, source_id, title, slug, url, lang, pageid, revid, last_seen_at, wikitext, summary";

pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_parent_dir(path)?;
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign_keys pragma")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        connection
            .pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign_keys pragma")?;
        Ok(Self { connection })
    }
}

impl ContentStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn init_schema(&mut self) -> Result<()> {
        self.connection
            .execute_batch(SCHEMA_SQL)
            .context("failed to initialize sqlite schema")
    }

    fn ensure_source(&mut self, source: &SourceRecord) -> Result<i64> {
        let existing: Option<i64> = self
            .connection
            .query_row(
                "SELECT id FROM sources WHERE site = ?1 AND url = ?2 LIMIT 1",
                params![source.site, source.url],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to look up source {}", source.url))?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.connection
            .execute(
                "INSERT INTO sources (site, url, license, notes) VALUES (?1, ?2, ?3, ?4)",
                params![source.site, source.url, source.license, source.notes],
            )
            .with_context(|| format!("failed to insert source {}", source.url))?;
        Ok(self.connection.last_insert_rowid())
    }

    fn find_page(&mut self, pageid: i64) -> Result<Option<StoredPage>> {
        self.connection
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE pageid = ?1"),
                [pageid],
                decode_page,
            )
            .optional()
            .with_context(|| format!("failed to look up page {pageid}"))
    }

    fn insert_page(&mut self, row: &PageRow) -> Result<i64> {
        self.connection
            .execute(
                "INSERT INTO pages (
                    source_id, title, slug, url, lang, pageid, revid, last_seen_at, wikitext, summary
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.source_id,
                    row.title,
                    row.slug,
                    row.url,
                    row.lang,
                    row.pageid,
                    row.revid,
                    row.last_seen_at,
                    row.wikitext,
                    row.summary
                ],
            )
            .with_context(|| format!("failed to insert page {}", row.pageid))?;
        Ok(self.connection.last_insert_rowid())
    }

    fn update_page(&mut self, id: i64, row: &PageRow) -> Result<()> {
        self.connection
            .execute(
                "UPDATE pages SET
                    title = ?2, slug = ?3, url = ?4, lang = ?5, revid = ?6,
                    last_seen_at = ?7, wikitext = ?8, summary = ?9
                WHERE id = ?1",
                params![
                    id,
                    row.title,
                    row.slug,
                    row.url,
                    row.lang,
                    row.revid,
                    row.last_seen_at,
                    row.wikitext,
                    row.summary
                ],
            )
            .with_context(|| format!("failed to update page {}", row.pageid))?;
        Ok(())
    }

    fn touch_page(&mut self, id: i64, seen_at: &str) -> Result<()> {
        self.connection
            .execute(
                "UPDATE pages SET last_seen_at = ?2 WHERE id = ?1",
                params![id, seen_at],
            )
            .with_context(|| format!("failed to touch page row {id}"))?;
        Ok(())
    }

    fn upsert_subdistrict(&mut self, page_ref: i64, record: &SubdistrictRecord) -> Result<i64> {
        let aliases = aliases_to_json(record.aliases.as_deref())?;
        self.connection
            .query_row(
                "INSERT INTO subdistricts (name, parent_district, description, aliases, page_id)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(page_id) DO UPDATE SET
                    name = excluded.name,
                    parent_district = excluded.parent_district,
                    description = excluded.description
                RETURNING id",
                params![
                    record.name,
                    record.parent_district,
                    record.description,
                    aliases,
                    page_ref
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to upsert subdistrict {}", record.name))
    }

    fn upsert_cyberware(&mut self, page_ref: i64, record: &CyberwareRecord) -> Result<i64> {
        self.connection
            .query_row(
                "INSERT INTO cyberware (
                    name, slot, manufacturer, rarity_min, rarity_max, description, page_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(page_id) DO UPDATE SET
                    name = excluded.name,
                    slot = excluded.slot,
                    description = excluded.description
                RETURNING id",
                params![
                    record.name,
                    record.slot,
                    record.manufacturer,
                    record.rarity_min,
                    record.rarity_max,
                    record.description,
                    page_ref
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to upsert cyberware {}", record.name))
    }

    fn upsert_item(&mut self, page_ref: i64, record: &ItemRecord) -> Result<i64> {
        self.connection
            .query_row(
                "INSERT INTO items (name, category, subcategory, description, page_id)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(page_id) DO UPDATE SET
                    name = excluded.name,
                    category = excluded.category,
                    subcategory = excluded.subcategory,
                    description = excluded.description
                RETURNING id",
                params![
                    record.name,
                    record.category,
                    record.subcategory,
                    record.description,
                    page_ref
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to upsert item {}", record.name))
    }

    fn find_subdistrict(&mut self, page_ref: i64) -> Result<Option<SubdistrictRecord>> {
        let found = self
            .connection
            .query_row(
                "SELECT name, parent_district, description, aliases
                FROM subdistricts WHERE page_id = ?1",
                [page_ref],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to look up subdistrict for page row {page_ref}"))?;
        let Some((name, parent_district, description, aliases)) = found else {
            return Ok(None);
        };
        Ok(Some(SubdistrictRecord {
            name,
            parent_district,
            description,
            aliases: aliases_from_json(aliases)?,
        }))
    }

    fn find_cyberware(&mut self, page_ref: i64) -> Result<Option<CyberwareRecord>> {
        self.connection
            .query_row(
                "SELECT name, slot, manufacturer, rarity_min, rarity_max, description
                FROM cyberware WHERE page_id = ?1",
                [page_ref],
                |row| {
                    Ok(CyberwareRecord {
                        name: row.get(0)?,
                        slot: row.get(1)?,
                        manufacturer: row.get(2)?,
                        rarity_min: row.get(3)?,
                        rarity_max: row.get(4)?,
                        description: row.get(5)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to look up cyberware for page row {page_ref}"))
    }

    fn find_item(&mut self, page_ref: i64) -> Result<Option<ItemRecord>> {
        self.connection
            .query_row(
                "SELECT name, category, subcategory, description FROM items WHERE page_id = ?1",
                [page_ref],
                |row| {
                    Ok(ItemRecord {
                        name: row.get(0)?,
                        category: row.get(1)?,
                        subcategory: row.get(2)?,
                        description: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to look up item for page row {page_ref}"))
    }

    fn table_counts(&mut self) -> Result<BTreeMap<String, i64>> {
        let mut counts = BTreeMap::new();
        for table in TABLE_NAMES {
            let count: i64 = self
                .connection
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .with_context(|| format!("failed to count rows in {table}"))?;
            counts.insert(table.to_string(), count);
        }
        Ok(counts)
    }
}

fn decode_page(row: &Row<'_>) -> rusqlite::Result<StoredPage> {
    Ok(StoredPage {
        id: row.get(0)?,
        row: PageRow {
            source_id: row.get(1)?,
            title: row.get(2)?,
            slug: row.get(3)?,
            url: row.get(4)?,
            lang: row.get(5)?,
            pageid: row.get(6)?,
            revid: row.get(7)?,
            last_seen_at: row.get(8)?,
            wikitext: row.get(9)?,
            summary: row.get(10)?,
        },
    })
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create database parent directory {}",
            parent.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::SqliteStore;
    use crate::client::PageDetail;
    use crate::store::{
        ContentStore, CyberwareRecord, ItemRecord, SourceRecord, SubdistrictRecord,
        UpsertOutcome, upsert_page,
    };
    use crate::summarize::{Summarizer, SummarizerKind};

    fn kabuki(revision_id: i64, wikitext: &str) -> PageDetail {
        PageDetail {
            page_id: 501,
            title: "Kabuki (2077)".to_string(),
            revision_id: Some(revision_id),
            wikitext: Some(wikitext.to_string()),
            categories: vec!["Category:Watson subdistricts".to_string()],
            full_url: "https://cyberpunk.fandom.com/wiki/Kabuki_(2077)".to_string(),
        }
    }

    fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let temp = tempdir().expect("tempdir");
        let mut store = SqliteStore::open(&temp.path().join("db/seed.db")).expect("open");
        store.init_schema().expect("schema");
        (temp, store)
    }

    #[test]
    fn schema_init_is_idempotent_and_source_is_registered_once() {
        let (_temp, mut store) = open_store();
        store.init_schema().expect("second init");

        let first = store.ensure_source(&SourceRecord::fandom()).expect("source");
        let second = store.ensure_source(&SourceRecord::fandom()).expect("source");
        assert_eq!(first, second);

        let counts = store.table_counts().expect("counts");
        assert_eq!(counts.len(), 7);
        assert_eq!(counts["sources"], 1);
        assert_eq!(counts["pages"], 0);
    }

    #[test]
    fn unchanged_revision_only_advances_last_seen() {
        let (_temp, mut store) = open_store();
        let source_id = store.ensure_source(&SourceRecord::fandom()).expect("source");
        let summarizer = Summarizer::select(Some(SummarizerKind::Regex));

        let first = upsert_page(
            &mut store,
            source_id,
            &kabuki(10, "[[Kabuki]] is a market."),
            "2077-01-01T00:00:00+00:00",
            &summarizer,
        )
        .expect("insert");
        assert_eq!(first.outcome, UpsertOutcome::Inserted);
        assert_eq!(first.summary, "Kabuki is a market.");

        let second = upsert_page(
            &mut store,
            source_id,
            &kabuki(10, "ignored because the revision did not change"),
            "2077-01-02T00:00:00+00:00",
            &summarizer,
        )
        .expect("touch");
        assert_eq!(second.outcome, UpsertOutcome::Unchanged);
        assert_eq!(second.id, first.id);
        assert_eq!(second.summary, "Kabuki is a market.");

        let stored = store.find_page(501).expect("find").expect("page row");
        assert_eq!(stored.row.last_seen_at, "2077-01-02T00:00:00+00:00");
        assert_eq!(stored.row.wikitext.as_deref(), Some("[[Kabuki]] is a market."));
        assert_eq!(stored.row.slug, "kabuki-2077");
        assert_eq!(stored.row.lang, "en");
        assert_eq!(store.table_counts().expect("counts")["pages"], 1);
    }

    #[test]
    fn new_revision_replaces_page_content() {
        let (_temp, mut store) = open_store();
        let source_id = store.ensure_source(&SourceRecord::fandom()).expect("source");
        let summarizer = Summarizer::select(Some(SummarizerKind::Regex));

        upsert_page(
            &mut store,
            source_id,
            &kabuki(10, "Old text."),
            "2077-01-01T00:00:00+00:00",
            &summarizer,
        )
        .expect("insert");

        let mut renamed = kabuki(11, "New text about [[Watson]].");
        renamed.title = "Kabuki".to_string();
        let updated = upsert_page(
            &mut store,
            source_id,
            &renamed,
            "2077-01-03T00:00:00+00:00",
            &summarizer,
        )
        .expect("update");
        assert_eq!(updated.outcome, UpsertOutcome::Updated);

        let stored = store.find_page(501).expect("find").expect("page row");
        assert_eq!(stored.id, updated.id);
        assert_eq!(stored.row.title, "Kabuki");
        assert_eq!(stored.row.slug, "kabuki");
        assert_eq!(stored.row.revid, Some(11));
        assert_eq!(stored.row.summary.as_deref(), Some("New text about Watson."));
        assert_eq!(stored.row.last_seen_at, "2077-01-03T00:00:00+00:00");
    }

    #[test]
    fn domain_upserts_keep_one_row_per_page_and_preserve_aliases() {
        let (_temp, mut store) = open_store();
        let source_id = store.ensure_source(&SourceRecord::fandom()).expect("source");
        let summarizer = Summarizer::select(Some(SummarizerKind::Regex));
        let page = upsert_page(
            &mut store,
            source_id,
            &kabuki(10, "Text."),
            "2077-01-01T00:00:00+00:00",
            &summarizer,
        )
        .expect("insert");

        let first = store
            .upsert_subdistrict(
                page.id,
                &SubdistrictRecord {
                    name: "Kabuki".to_string(),
                    parent_district: Some("Watson".to_string()),
                    description: Some("Text.".to_string()),
                    aliases: Some(vec!["Kabuki Market".to_string()]),
                },
            )
            .expect("subdistrict");
        let second = store
            .upsert_subdistrict(
                page.id,
                &SubdistrictRecord {
                    name: "Kabuki".to_string(),
                    parent_district: None,
                    description: Some("Rewritten.".to_string()),
                    aliases: None,
                },
            )
            .expect("subdistrict again");
        assert_eq!(first, second);

        let stored = store
            .find_subdistrict(page.id)
            .expect("find")
            .expect("subdistrict row");
        assert_eq!(stored.parent_district, None);
        assert_eq!(stored.description.as_deref(), Some("Rewritten."));
        assert_eq!(stored.aliases, Some(vec!["Kabuki Market".to_string()]));

        let cyberware = CyberwareRecord {
            name: "Gorilla Arms".to_string(),
            slot: Some("Arms".to_string()),
            manufacturer: None,
            rarity_min: None,
            rarity_max: None,
            description: Some("Punch.".to_string()),
        };
        let cyberware_id = store.upsert_cyberware(page.id, &cyberware).expect("cyberware");
        assert_eq!(
            store.upsert_cyberware(page.id, &cyberware).expect("again"),
            cyberware_id
        );
        assert_eq!(
            store.find_cyberware(page.id).expect("find"),
            Some(cyberware)
        );

        let item = ItemRecord {
            name: "MaxDoc Mk.1".to_string(),
            category: Some("Consumable".to_string()),
            subcategory: None,
            description: None,
        };
        store.upsert_item(page.id, &item).expect("item");
        assert_eq!(store.find_item(page.id).expect("find"), Some(item));

        let counts = store.table_counts().expect("counts");
        assert_eq!(counts["subdistricts"], 1);
        assert_eq!(counts["cyberware"], 1);
        assert_eq!(counts["items"], 1);
        assert_eq!(counts["cyberware_variants"], 0);
    }

    #[test]
    fn in_memory_store_supports_full_cycle() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        store.init_schema().expect("schema");
        let source_id = store.ensure_source(&SourceRecord::fandom()).expect("source");
        let upsert = upsert_page(
            &mut store,
            source_id,
            &PageDetail {
                page_id: 9,
                title: "Bounce Back Mk.1".to_string(),
                ..PageDetail::default()
            },
            "2077-01-01T00:00:00+00:00",
            &Summarizer::default(),
        )
        .expect("insert");
        assert_eq!(upsert.outcome, UpsertOutcome::Inserted);
        assert_eq!(upsert.summary, "");
        assert!(store.find_page(10).expect("find").is_none());
    }
}
