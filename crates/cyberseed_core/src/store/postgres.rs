use std::collections::BTreeMap;

use ::postgres::{Client, NoTls, Row};
use anyhow::{Context, Result};

use super::{
    ContentStore, CyberwareRecord, ItemRecord, PageRow, SourceRecord, StoredPage,
    SubdistrictRecord, TABLE_NAMES, aliases_from_json, aliases_to_json,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id BIGSERIAL PRIMARY KEY,
    site TEXT NOT NULL,
    url TEXT NOT NULL,
    license TEXT,
    notes TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sources_site_url ON sources(site, url);

CREATE TABLE IF NOT EXISTS pages (
    id BIGSERIAL PRIMARY KEY,
    source_id BIGINT NOT NULL REFERENCES sources(id),
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    url TEXT NOT NULL,
    lang TEXT NOT NULL DEFAULT 'en',
    pageid BIGINT NOT NULL,
    revid BIGINT,
    last_seen_at TEXT NOT NULL,
    wikitext TEXT,
    summary TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_pageid ON pages(pageid);

CREATE TABLE IF NOT EXISTS subdistricts (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    parent_district TEXT,
    description TEXT,
    aliases TEXT,
    page_id BIGINT NOT NULL REFERENCES pages(id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_subdistricts_page_id ON subdistricts(page_id);

CREATE TABLE IF NOT EXISTS cyberware (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    slot TEXT,
    manufacturer TEXT,
    rarity_min TEXT,
    rarity_max TEXT,
    description TEXT,
    page_id BIGINT NOT NULL REFERENCES pages(id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_cyberware_page_id ON cyberware(page_id);

CREATE TABLE IF NOT EXISTS cyberware_variants (
    id BIGSERIAL PRIMARY KEY,
    cyberware_id BIGINT NOT NULL REFERENCES cyberware(id),
    rarity TEXT,
    effects_json TEXT,
    requirements_json TEXT,
    price BIGINT,
    page_id BIGINT REFERENCES pages(id)
);

CREATE TABLE IF NOT EXISTS items (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    category TEXT,
    subcategory TEXT,
    description TEXT,
    page_id BIGINT NOT NULL REFERENCES pages(id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_items_page_id ON items(page_id);

CREATE TABLE IF NOT EXISTS item_stats (
    id BIGSERIAL PRIMARY KEY,
    item_id BIGINT NOT NULL REFERENCES items(id),
    stat_key TEXT NOT NULL,
    stat_value TEXT,
    unit TEXT,
    source_note TEXT
);
"#;

const PAGE_COLUMNS: &str =
    "id, source_id, title, slug, url, lang, pageid, revid, last_seen_at, wikitext, summary";

/// Blocking PostgreSQL backend. Plain TCP only; TLS is left to the network.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::connect(url, NoTls).context("failed to connect to postgres")?;
        Ok(Self { client })
    }
}

impl ContentStore for PostgresStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn init_schema(&mut self) -> Result<()> {
        self.client
            .batch_execute(SCHEMA_SQL)
            .context("failed to initialize postgres schema")
    }

    fn ensure_source(&mut self, source: &SourceRecord) -> Result<i64> {
        let existing = self
            .client
            .query_opt(
                "SELECT id FROM sources WHERE site = $1 AND url = $2 LIMIT 1",
                &[&source.site, &source.url],
            )
            .with_context(|| format!("failed to look up source {}", source.url))?;
        if let Some(row) = existing {
            return Ok(row.try_get(0)?);
        }
        let row = self
            .client
            .query_one(
                "INSERT INTO sources (site, url, license, notes) VALUES ($1, $2, $3, $4)
                RETURNING id",
                &[&source.site, &source.url, &source.license, &source.notes],
            )
            .with_context(|| format!("failed to insert source {}", source.url))?;
        Ok(row.try_get(0)?)
    }

    fn find_page(&mut self, pageid: i64) -> Result<Option<StoredPage>> {
        let row = self
            .client
            .query_opt(
                format!("SELECT {PAGE_COLUMNS} FROM pages WHERE pageid = $1").as_str(),
                &[&pageid],
            )
            .with_context(|| format!("failed to look up page {pageid}"))?;
        row.as_ref().map(decode_page).transpose()
    }

    fn insert_page(&mut self, row: &PageRow) -> Result<i64> {
        let inserted = self
            .client
            .query_one(
                "INSERT INTO pages (
                    source_id, title, slug, url, lang, pageid, revid, last_seen_at, wikitext, summary
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING id",
                &[
                    &row.source_id,
                    &row.title,
                    &row.slug,
                    &row.url,
                    &row.lang,
                    &row.pageid,
                    &row.revid,
                    &row.last_seen_at,
                    &row.wikitext,
                    &row.summary,
                ],
            )
            .with_context(|| format!("failed to insert page {}", row.pageid))?;
        Ok(inserted.try_get(0)?)
    }

    fn update_page(&mut self, id: i64, row: &PageRow) -> Result<()> {
        self.client
            .execute(
                "UPDATE pages SET
                    title = $2, slug = $3, url = $4, lang = $5, revid = $6,
                    last_seen_at = $7, wikitext = $8, summary = $9
                WHERE id = $1",
                &[
                    &id,
                    &row.title,
                    &row.slug,
                    &row.url,
                    &row.lang,
                    &row.revid,
                    &row.last_seen_at,
                    &row.wikitext,
                    &row.summary,
                ],
            )
            .with_context(|| format!("failed to update page {}", row.pageid))?;
        Ok(())
    }

    fn touch_page(&mut self, id: i64, seen_at: &str) -> Result<()> {
        self.client
            .execute(
                "UPDATE pages SET last_seen_at = $2 WHERE id = $1",
                &[&id, &seen_at],
            )
            .with_context(|| format!("failed to touch page row {id}"))?;
        Ok(())
    }

    fn upsert_subdistrict(&mut self, page_ref: i64, record: &SubdistrictRecord) -> Result<i64> {
        let aliases = aliases_to_json(record.aliases.as_deref())?;
        let row = self
            .client
            .query_one(
                "INSERT INTO subdistricts (name, parent_district, description, aliases, page_id)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (page_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    parent_district = EXCLUDED.parent_district,
                    description = EXCLUDED.description
                RETURNING id",
                &[
                    &record.name,
                    &record.parent_district,
                    &record.description,
                    &aliases,
                    &page_ref,
                ],
            )
            .with_context(|| format!("failed to upsert subdistrict {}", record.name))?;
        Ok(row.try_get(0)?)
    }

    fn upsert_cyberware(&mut self, page_ref: i64, record: &CyberwareRecord) -> Result<i64> {
        let row = self
            .client
            .query_one(
                "INSERT INTO cyberware (
                    name, slot, manufacturer, rarity_min, rarity_max, description, page_id
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (page_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    slot = EXCLUDED.slot,
                    description = EXCLUDED.description
                RETURNING id",
                &[
                    &record.name,
                    &record.slot,
                    &record.manufacturer,
                    &record.rarity_min,
                    &record.rarity_max,
                    &record.description,
                    &page_ref,
                ],
            )
            .with_context(|| format!("failed to upsert cyberware {}", record.name))?;
        Ok(row.try_get(0)?)
    }

    fn upsert_item(&mut self, page_ref: i64, record: &ItemRecord) -> Result<i64> {
        let row = self
            .client
            .query_one(
                "INSERT INTO items (name, category, subcategory, description, page_id)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (page_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    category = EXCLUDED.category,
                    subcategory = EXCLUDED.subcategory,
                    description = EXCLUDED.description
                RETURNING id",
                &[
                    &record.name,
                    &record.category,
                    &record.subcategory,
                    &record.description,
                    &page_ref,
                ],
            )
            .with_context(|| format!("failed to upsert item {}", record.name))?;
        Ok(row.try_get(0)?)
    }

    fn find_subdistrict(&mut self, page_ref: i64) -> Result<Option<SubdistrictRecord>> {
        let Some(row) = self
            .client
            .query_opt(
                "SELECT name, parent_district, description, aliases
                FROM subdistricts WHERE page_id = $1",
                &[&page_ref],
            )
            .with_context(|| format!("failed to look up subdistrict for page row {page_ref}"))?
        else {
            return Ok(None);
        };
        Ok(Some(SubdistrictRecord {
            name: row.try_get(0)?,
            parent_district: row.try_get(1)?,
            description: row.try_get(2)?,
            aliases: aliases_from_json(row.try_get(3)?)?,
        }))
    }

    fn find_cyberware(&mut self, page_ref: i64) -> Result<Option<CyberwareRecord>> {
        let Some(row) = self
            .client
            .query_opt(
                "SELECT name, slot, manufacturer, rarity_min, rarity_max, description
                FROM cyberware WHERE page_id = $1",
                &[&page_ref],
            )
            .with_context(|| format!("failed to look up cyberware for page row {page_ref}"))?
        else {
            return Ok(None);
        };
        Ok(Some(CyberwareRecord {
            name: row.try_get(0)?,
            slot: row.try_get(1)?,
            manufacturer: row.try_get(2)?,
            rarity_min: row.try_get(3)?,
            rarity_max: row.try_get(4)?,
            description: row.try_get(5)?,
        }))
    }

    fn find_item(&mut self, page_ref: i64) -> Result<Option<ItemRecord>> {
        let Some(row) = self
            .client
            .query_opt(
                "SELECT name, category, subcategory, description FROM items WHERE page_id = $1",
                &[&page_ref],
            )
            .with_context(|| format!("failed to look up item for page row {page_ref}"))?
        else {
            return Ok(None);
        };
        Ok(Some(ItemRecord {
            name: row.try_get(0)?,
            category: row.try_get(1)?,
            subcategory: row.try_get(2)?,
            description: row.try_get(3)?,
        }))
    }

    fn table_counts(&mut self) -> Result<BTreeMap<String, i64>> {
        let mut counts = BTreeMap::new();
        for table in TABLE_NAMES {
            let row = self
                .client
                .query_one(format!("SELECT COUNT(*) FROM {table}").as_str(), &[])
                .with_context(|| format!("failed to count rows in {table}"))?;
            counts.insert(table.to_string(), row.try_get(0)?);
        }
        Ok(counts)
    }
}

fn decode_page(row: &Row) -> Result<StoredPage> {
    Ok(StoredPage {
        id: row.try_get(0)?,
        row: PageRow {
            source_id: row.try_get(1)?,
            title: row.try_get(2)?,
            slug: row.try_get(3)?,
            url: row.try_get(4)?,
            lang: row.try_get(5)?,
            pageid: row.try_get(6)?,
            revid: row.try_get(7)?,
            last_seen_at: row.try_get(8)?,
            wikitext: row.try_get(9)?,
            summary: row.try_get(10)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::PostgresStore;
    use crate::client::PageDetail;
    use crate::store::{ContentStore, SourceRecord, SubdistrictRecord, UpsertOutcome, upsert_page};
    use crate::summarize::{Summarizer, SummarizerKind};

    #[test]
    #[ignore] // Requires database: TEST_DATABASE_URL=postgres://... cargo test -- --ignored
    fn page_and_subdistrict_round_trip() {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            return;
        };
        let mut store = PostgresStore::connect(&url).expect("connect");
        store.init_schema().expect("schema");
        store.init_schema().expect("second init");

        let source_id = store.ensure_source(&SourceRecord::fandom()).expect("source");
        assert_eq!(
            store.ensure_source(&SourceRecord::fandom()).expect("source again"),
            source_id
        );

        let pageid = Utc::now().timestamp_micros();
        let summarizer = Summarizer::select(Some(SummarizerKind::Regex));
        let mut page = PageDetail {
            page_id: pageid,
            title: "Northside (2077)".to_string(),
            revision_id: Some(1),
            wikitext: Some("[[Northside]] is an industrial zone.".to_string()),
            categories: vec!["Category:Watson".to_string()],
            full_url: "https://cyberpunk.fandom.com/wiki/Northside_(2077)".to_string(),
        };

        let inserted = upsert_page(
            &mut store,
            source_id,
            &page,
            "2077-03-01T00:00:00+00:00",
            &summarizer,
        )
        .expect("insert");
        assert_eq!(inserted.outcome, UpsertOutcome::Inserted);

        let touched = upsert_page(
            &mut store,
            source_id,
            &page,
            "2077-03-02T00:00:00+00:00",
            &summarizer,
        )
        .expect("touch");
        assert_eq!(touched.outcome, UpsertOutcome::Unchanged);
        assert_eq!(touched.id, inserted.id);

        page.revision_id = Some(2);
        page.wikitext = Some("[[Northside]] is held by the [[Maelstrom]].".to_string());
        let updated = upsert_page(
            &mut store,
            source_id,
            &page,
            "2077-03-03T00:00:00+00:00",
            &summarizer,
        )
        .expect("update");
        assert_eq!(updated.outcome, UpsertOutcome::Updated);
        assert_eq!(updated.summary, "Northside is held by the Maelstrom.");

        let stored = store.find_page(pageid).expect("find").expect("page row");
        assert_eq!(stored.row.revid, Some(2));
        assert_eq!(stored.row.slug, "northside-2077");
        assert_eq!(stored.row.last_seen_at, "2077-03-03T00:00:00+00:00");

        let record = SubdistrictRecord {
            name: "Northside".to_string(),
            parent_district: Some("Watson".to_string()),
            description: Some(updated.summary.clone()),
            aliases: None,
        };
        let first = store.upsert_subdistrict(stored.id, &record).expect("subdistrict");
        let second = store.upsert_subdistrict(stored.id, &record).expect("subdistrict again");
        assert_eq!(first, second);
        assert_eq!(
            store.find_subdistrict(stored.id).expect("find subdistrict"),
            Some(record)
        );
        assert_eq!(store.table_counts().expect("counts").len(), 7);

        store
            .client
            .execute("DELETE FROM subdistricts WHERE page_id = $1", &[&stored.id])
            .expect("cleanup subdistrict");
        store
            .client
            .execute("DELETE FROM pages WHERE id = $1", &[&stored.id])
            .expect("cleanup page");
    }
}
