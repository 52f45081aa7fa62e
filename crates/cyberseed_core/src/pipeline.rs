use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use crate::classify::{infer_item_category, infer_parent_district, infer_slot};
use crate::client::{PageDetail, WikiContentApi};
use crate::naming::{cyberware_name, item_name, subdistrict_name};
use crate::snapshot::{GroupSummary, Manifest, SnapshotEntry, write_manifest, write_snapshot};
use crate::store::{
    ContentStore, CyberwareRecord, ItemRecord, PageUpsert, SourceRecord, SubdistrictRecord,
    UpsertOutcome, upsert_page,
};
use crate::summarize::Summarizer;

/// One content group ingested by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Subdistricts,
    CyberwareOs,
    CyberwareArms,
    Consumables,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DomainKind {
    Subdistrict,
    Cyberware,
    Item,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Subdistricts,
        Stage::CyberwareOs,
        Stage::CyberwareArms,
        Stage::Consumables,
    ];

    pub fn categories(self) -> &'static [&'static str] {
        match self {
            Self::Subdistricts => &["Category:Cyberpunk_2077_Sub-districts"],
            Self::CyberwareOs => &[
                "Category:Cyberpunk_2077_Cyberware_-_Cyberdecks",
                "Category:Cyberpunk_2077_Cyberware_-_Sandevistan_Operating_system",
                "Category:Cyberpunk_2077_Cyberware_-_Berserk_Operating_system",
            ],
            Self::CyberwareArms => &["Category:Cyberpunk_2077_Cyberware_-_Arms"],
            Self::Consumables => &["Category:Cyberpunk_2077_Consumables"],
        }
    }

    pub fn snapshot_file(self) -> &'static str {
        match self {
            Self::Subdistricts => "subdistricts.json",
            Self::CyberwareOs => "cyberware_os.json",
            Self::CyberwareArms => "cyberware_arms.json",
            Self::Consumables => "consumables.json",
        }
    }

    pub fn manifest_key(self) -> &'static str {
        match self {
            Self::Subdistricts => "subdistricts",
            Self::CyberwareOs => "cyberware_os",
            Self::CyberwareArms => "cyberware_arms",
            Self::Consumables => "consumables",
        }
    }

    fn domain(self) -> DomainKind {
        match self {
            Self::Subdistricts => DomainKind::Subdistrict,
            Self::CyberwareOs | Self::CyberwareArms => DomainKind::Cyberware,
            Self::Consumables => DomainKind::Item,
        }
    }
}

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSelection {
    pub subdistricts: bool,
    pub cyberware_os: bool,
    pub cyberware_arms: bool,
    pub consumables: bool,
}

impl StageSelection {
    pub fn all() -> Self {
        Self {
            subdistricts: true,
            cyberware_os: true,
            cyberware_arms: true,
            consumables: true,
        }
    }

    pub fn only(stage: Stage) -> Self {
        let mut selection = Self::default();
        match stage {
            Stage::Subdistricts => selection.subdistricts = true,
            Stage::CyberwareOs => selection.cyberware_os = true,
            Stage::CyberwareArms => selection.cyberware_arms = true,
            Stage::Consumables => selection.consumables = true,
        }
        selection
    }

    pub fn contains(&self, stage: Stage) -> bool {
        match stage {
            Stage::Subdistricts => self.subdistricts,
            Stage::CyberwareOs => self.cyberware_os,
            Stage::CyberwareArms => self.cyberware_arms,
            Stage::Consumables => self.consumables,
        }
    }

    pub fn stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.contains(*stage))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub source: SourceRecord,
}

/// Runs the selected stages against one API and one store.
pub struct Pipeline<'a, A: WikiContentApi, S: ContentStore + ?Sized> {
    api: &'a mut A,
    store: &'a mut S,
    summarizer: &'a Summarizer,
    settings: PipelineSettings,
}

impl<'a, A: WikiContentApi, S: ContentStore + ?Sized> Pipeline<'a, A, S> {
    pub fn new(
        api: &'a mut A,
        store: &'a mut S,
        summarizer: &'a Summarizer,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            api,
            store,
            summarizer,
            settings,
        }
    }

    /// Executes `selection` and writes snapshots plus the manifest.
    ///
    /// Any error aborts the run before the manifest is written.
    pub fn run(&mut self, selection: &StageSelection) -> Result<Manifest> {
        let output_dir = self.settings.output_dir.clone();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;

        self.store.init_schema()?;
        let source_id = self.store.ensure_source(&self.settings.source)?;
        info!(
            backend = self.store.backend_name(),
            strategy = self.summarizer.strategy(),
            source_id,
            "store ready"
        );

        let mut groups = Vec::new();
        for stage in selection.stages() {
            let (entries, summary) = self
                .run_stage(stage, source_id)
                .with_context(|| format!("stage {} failed", stage.manifest_key()))?;
            let path = write_snapshot(&output_dir, stage.snapshot_file(), &entries)?;
            info!(
                stage = stage.manifest_key(),
                count = summary.count,
                created = summary.created,
                updated = summary.updated,
                unchanged = summary.unchanged,
                "wrote {}",
                path.display()
            );
            groups.push((stage.manifest_key().to_string(), summary));
        }

        let mut manifest = Manifest::new(now_rfc3339());
        manifest.groups.extend(groups);
        write_manifest(&output_dir, &manifest)?;
        info!(
            requests = self.api.request_count(),
            groups = manifest.groups.len(),
            "run complete"
        );
        Ok(manifest)
    }

    fn run_stage(
        &mut self,
        stage: Stage,
        source_id: i64,
    ) -> Result<(Vec<SnapshotEntry>, GroupSummary)> {
        let page_ids = self.collect_member_ids(stage.categories())?;
        info!(
            stage = stage.manifest_key(),
            pages = page_ids.len(),
            "fetching page details"
        );
        let details = self.api.get_pages_by_ids(&page_ids)?;

        let mut entries = Vec::with_capacity(details.len());
        let mut summary = GroupSummary::default();
        for page in details.values() {
            let seen_at = now_rfc3339();
            let upsert = upsert_page(&mut *self.store, source_id, page, &seen_at, self.summarizer)
                .with_context(|| format!("failed to store page {}", page.title))?;
            self.upsert_domain(stage.domain(), page, &upsert)?;

            match upsert.outcome {
                UpsertOutcome::Inserted => summary.created += 1,
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Unchanged => summary.unchanged += 1,
            }
            entries.push(SnapshotEntry::from(page));
        }
        summary.count = entries.len();
        Ok((entries, summary))
    }

    /// Union of member page ids over `categories`, first-seen order.
    fn collect_member_ids(&mut self, categories: &[&str]) -> Result<Vec<i64>> {
        let mut seen = BTreeSet::new();
        let mut page_ids = Vec::new();
        for category in categories {
            let members = self.api.list_category_members(category)?;
            debug!(category, members = members.len(), "listed category");
            for member in members {
                if seen.insert(member.page_id) {
                    page_ids.push(member.page_id);
                }
            }
        }
        Ok(page_ids)
    }

    fn upsert_domain(
        &mut self,
        domain: DomainKind,
        page: &PageDetail,
        upsert: &PageUpsert,
    ) -> Result<i64> {
        let description = Some(upsert.summary.clone());
        let id = match domain {
            DomainKind::Subdistrict => self.store.upsert_subdistrict(
                upsert.id,
                &SubdistrictRecord {
                    name: subdistrict_name(&page.title),
                    parent_district: infer_parent_district(&page.categories).map(str::to_string),
                    description,
                    aliases: None,
                },
            )?,
            DomainKind::Cyberware => self.store.upsert_cyberware(
                upsert.id,
                &CyberwareRecord {
                    name: cyberware_name(&page.title),
                    slot: infer_slot(&page.categories).map(str::to_string),
                    manufacturer: None,
                    rarity_min: None,
                    rarity_max: None,
                    description,
                },
            )?,
            DomainKind::Item => self.store.upsert_item(
                upsert.id,
                &ItemRecord {
                    name: item_name(&page.title),
                    category: infer_item_category(&page.categories).map(str::to_string),
                    subcategory: None,
                    description,
                },
            )?,
        };
        debug!(pageid = page.page_id, ?domain, id, "upserted domain row");
        Ok(id)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
