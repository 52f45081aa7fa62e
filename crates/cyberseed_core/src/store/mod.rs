//! Relational persistence for ingested wiki content.
//!
//! Every backend implements [`ContentStore`]; dialect details (surrogate keys,
//! placeholders, id retrieval) stay inside the backend module. The
//! revision-driven page upsert is written once, on top of the port.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::debug;

use crate::client::PageDetail;
use crate::config::DatabaseTarget;
use crate::naming::slugify;
use crate::summarize::Summarizer;

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

pub const PAGE_LANGUAGE: &str = "en";

pub const TABLE_NAMES: [&str; 7] = [
    "sources",
    "pages",
    "subdistricts",
    "cyberware",
    "cyberware_variants",
    "items",
    "item_stats",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub site: String,
    pub url: String,
    pub license: Option<String>,
    pub notes: Option<String>,
}

impl SourceRecord {
    /// The wiki this program ingests from.
    pub fn fandom() -> Self {
        Self {
            site: "Fandom".to_string(),
            url: "https://cyberpunk.fandom.com".to_string(),
            license: Some("CC BY-SA 3.0".to_string()),
            notes: Some("Data via MediaWiki API".to_string()),
        }
    }
}

/// Column values written for a page row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRow {
    pub source_id: i64,
    pub title: String,
    pub slug: String,
    pub url: String,
    pub lang: String,
    pub pageid: i64,
    pub revid: Option<i64>,
    pub last_seen_at: String,
    pub wikitext: Option<String>,
    pub summary: Option<String>,
}

impl PageRow {
    pub fn from_detail(
        source_id: i64,
        page: &PageDetail,
        seen_at: &str,
        summary: Option<String>,
    ) -> Self {
        Self {
            source_id,
            title: page.title.clone(),
            slug: slugify(&page.title),
            url: page.full_url.clone(),
            lang: PAGE_LANGUAGE.to_string(),
            pageid: page.page_id,
            revid: page.revision_id,
            last_seen_at: seen_at.to_string(),
            wikitext: page.wikitext.clone(),
            summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPage {
    pub id: i64,
    pub row: PageRow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdistrictRecord {
    pub name: String,
    pub parent_district: Option<String>,
    pub description: Option<String>,
    pub aliases: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyberwareRecord {
    pub name: String,
    pub slot: Option<String>,
    pub manufacturer: Option<String>,
    pub rarity_min: Option<String>,
    pub rarity_max: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    pub name: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
}

/// Storage port. One implementation per SQL backend.
pub trait ContentStore {
    fn backend_name(&self) -> &'static str;
    fn init_schema(&mut self) -> Result<()>;
    fn ensure_source(&mut self, source: &SourceRecord) -> Result<i64>;

    fn find_page(&mut self, pageid: i64) -> Result<Option<StoredPage>>;
    fn insert_page(&mut self, row: &PageRow) -> Result<i64>;
    /// Rewrites every content column of an existing page.
    fn update_page(&mut self, id: i64, row: &PageRow) -> Result<()>;
    /// Advances `last_seen_at` and nothing else.
    fn touch_page(&mut self, id: i64, seen_at: &str) -> Result<()>;

    fn upsert_subdistrict(&mut self, page_ref: i64, record: &SubdistrictRecord) -> Result<i64>;
    fn upsert_cyberware(&mut self, page_ref: i64, record: &CyberwareRecord) -> Result<i64>;
    fn upsert_item(&mut self, page_ref: i64, record: &ItemRecord) -> Result<i64>;

    fn find_subdistrict(&mut self, page_ref: i64) -> Result<Option<SubdistrictRecord>>;
    fn find_cyberware(&mut self, page_ref: i64) -> Result<Option<CyberwareRecord>>;
    fn find_item(&mut self, page_ref: i64) -> Result<Option<ItemRecord>>;

    /// Row count per table in [`TABLE_NAMES`].
    fn table_counts(&mut self) -> Result<BTreeMap<String, i64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUpsert {
    pub id: i64,
    pub outcome: UpsertOutcome,
    pub summary: String,
}

/// Inserts or refreshes the page row for `page`, keyed by remote page id.
///
/// Content columns are only rewritten when the revision id differs from the
/// stored one. An unchanged page keeps its stored summary and is not
/// re-summarized.
pub fn upsert_page<S: ContentStore + ?Sized>(
    store: &mut S,
    source_id: i64,
    page: &PageDetail,
    seen_at: &str,
    summarizer: &Summarizer,
) -> Result<PageUpsert> {
    let Some(existing) = store.find_page(page.page_id)? else {
        let summary = summarize_detail(page, summarizer);
        let row = PageRow::from_detail(source_id, page, seen_at, Some(summary.clone()));
        let id = store.insert_page(&row)?;
        debug!(pageid = page.page_id, id, "inserted page");
        return Ok(PageUpsert {
            id,
            outcome: UpsertOutcome::Inserted,
            summary,
        });
    };

    if existing.row.revid != page.revision_id {
        let summary = summarize_detail(page, summarizer);
        let mut row = PageRow::from_detail(source_id, page, seen_at, Some(summary.clone()));
        row.source_id = existing.row.source_id;
        store.update_page(existing.id, &row)?;
        debug!(
            pageid = page.page_id,
            old_revid = ?existing.row.revid,
            new_revid = ?page.revision_id,
            "updated page"
        );
        return Ok(PageUpsert {
            id: existing.id,
            outcome: UpsertOutcome::Updated,
            summary,
        });
    }

    store.touch_page(existing.id, seen_at)?;
    debug!(pageid = page.page_id, "page unchanged");
    Ok(PageUpsert {
        id: existing.id,
        outcome: UpsertOutcome::Unchanged,
        summary: existing.row.summary.unwrap_or_default(),
    })
}

fn summarize_detail(page: &PageDetail, summarizer: &Summarizer) -> String {
    summarizer.summarize(page.wikitext.as_deref().unwrap_or_default())
}

/// Opens the backend named by `target`.
pub fn open_store(target: &DatabaseTarget) -> Result<Box<dyn ContentStore>> {
    match target {
        DatabaseTarget::Sqlite(path) => Ok(Box::new(SqliteStore::open(path)?)),
        DatabaseTarget::SqliteMemory => Ok(Box::new(SqliteStore::open_in_memory()?)),
        DatabaseTarget::Postgres(url) => Ok(Box::new(PostgresStore::connect(url)?)),
    }
}

pub(crate) fn aliases_to_json(aliases: Option<&[String]>) -> Result<Option<String>> {
    aliases
        .map(serde_json::to_string)
        .transpose()
        .map_err(anyhow::Error::from)
}

pub(crate) fn aliases_from_json(raw: Option<String>) -> Result<Option<Vec<String>>> {
    raw.map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(anyhow::Error::from)
}
