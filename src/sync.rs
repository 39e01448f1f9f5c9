use crate::SyncContext;
use crate::config::ItemErrorPolicy;
use crate::error::SyncError;
use crate::fetch::{DocumentSource, INDEX_NAME};
use crate::git::{ChangePublisher, PublishOutcome, VersionControl};
use crate::id::{ItemId, extract_item_id};
use crate::store::LocalStore;
use crate::transform::{DocumentKind, Transformer};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Field of an index record holding the URL with the item id.
pub const MATCH_LINK_FIELD: &str = "match_link";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStage {
    Fetching,
    Transforming,
    Writing,
    Pruning,
    CheckingDiff,
    Publishing,
    Done,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Fetching => "fetching",
            SyncStage::Transforming => "transforming",
            SyncStage::Writing => "writing",
            SyncStage::Pruning => "pruning",
            SyncStage::CheckingDiff => "checking for changes",
            SyncStage::Publishing => "publishing",
            SyncStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    /// Ids whose documents were written, in index order.
    pub written: Vec<ItemId>,
    /// Index records without a usable id, before or after rewriting.
    pub skipped_records: usize,
    /// Ids whose fetch failed under [`ItemErrorPolicy::Skip`].
    pub failed: Vec<ItemId>,
    pub removed: Vec<PathBuf>,
    pub has_changes: bool,
    /// `None` when publishing was disabled.
    pub publish: Option<PublishOutcome>,
}

/// Ids referenced by an index document.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexEntries {
    pub ids: Vec<ItemId>,
    pub skipped: usize,
}

/// Reads the item ids out of an index document, skipping records without one.
pub fn collect_ids(index: &Value) -> Result<IndexEntries, SyncError> {
    let Value::Array(records) = index else {
        return Err(SyncError::Parse("expected a JSON array of records".to_string()));
    };

    let mut seen = HashSet::new();
    let mut entries = IndexEntries::default();
    for (position, record) in records.iter().enumerate() {
        let Value::Object(record) = record else {
            return Err(SyncError::Parse(format!("record {position} is not an object")));
        };
        let link = record
            .get(MATCH_LINK_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default();
        match extract_item_id(link) {
            Ok(id) => {
                if seen.insert(id.clone()) {
                    entries.ids.push(id);
                } else {
                    debug!("Record {position} repeats id {id}");
                }
            }
            Err(error) => {
                warn!("Skipping record {position} ({link:?}): {error}");
                entries.skipped += 1;
            }
        }
    }
    Ok(entries)
}

/// An item as named by the remote API and as named in the store. They differ
/// when the vendor token appears in the id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemName {
    pub remote: ItemId,
    pub local: ItemId,
}

pub struct SyncPipeline<'a> {
    context: SyncContext,
    source: &'a dyn DocumentSource,
    vcs: &'a dyn VersionControl,
    transformer: Transformer,
    store: LocalStore,
}

impl<'a> SyncPipeline<'a> {
    pub fn new(
        context: SyncContext,
        source: &'a dyn DocumentSource,
        vcs: &'a dyn VersionControl,
    ) -> Self {
        let transformer = Transformer::new(context.config.rewrite.clone());
        let store = LocalStore::new(&context.store_dir);
        Self {
            context,
            source,
            vcs,
            transformer,
            store,
        }
    }

    pub fn run(&self) -> Result<SyncReport, SyncError> {
        let mut stage = SyncStage::Fetching;
        self.run_stages(&mut stage)
            .inspect_err(|err| error!("Sync failed while {stage}: {err}"))
    }

    fn run_stages(&self, stage: &mut SyncStage) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        enter(stage, SyncStage::Fetching);
        let index = self.source.fetch_index()?;
        let entries = collect_ids(&index)?;
        report.skipped_records = entries.skipped;
        let names = self.local_names(entries.ids, &mut report);
        let items = self.fetch_items(&names, &mut report)?;

        enter(stage, SyncStage::Transforming);
        let index = self.transformer.transform(&index, DocumentKind::Index);
        let items: Vec<(ItemId, Value)> = items
            .into_iter()
            .map(|(id, item)| {
                let item = self.transformer.transform(&item, DocumentKind::Item);
                (id, item)
            })
            .collect();

        enter(stage, SyncStage::Writing);
        self.store.write_document(INDEX_NAME, &index)?;
        for (id, item) in &items {
            let path = self.store.write_document(id.as_str(), item)?;
            info!("Wrote {}", path.display());
            report.written.push(id.clone());
        }

        enter(stage, SyncStage::Pruning);
        let valid: HashSet<ItemId> = names.into_iter().map(|name| name.local).collect();
        report.removed = self.store.prune_except(&valid)?;

        enter(stage, SyncStage::CheckingDiff);
        let publisher = ChangePublisher::new(self.vcs, &self.context.config.commit_message);
        report.has_changes = publisher
            .has_changes(&self.store)
            .map_err(SyncError::Publish)?;

        if self.context.publish {
            enter(stage, SyncStage::Publishing);
            let outcome = publisher
                .publish(report.has_changes)
                .map_err(SyncError::Publish)?;
            report.publish = Some(outcome);
        } else {
            info!("Publishing disabled, changes pending: {}", report.has_changes);
        }

        enter(stage, SyncStage::Done);
        Ok(report)
    }

    /// Names each item in the store after its rewritten id, so the files match
    /// the links in the rewritten index.
    fn local_names(&self, ids: Vec<ItemId>, report: &mut SyncReport) -> Vec<ItemName> {
        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(ids.len());
        for remote in ids {
            let rewritten = self
                .transformer
                .rewrite_string(remote.as_str(), DocumentKind::Index);
            let local = match ItemId::parse(&rewritten) {
                Ok(local) => local,
                Err(error) => {
                    warn!("Skipping {remote}, rewritten id {rewritten:?} is unusable: {error}");
                    report.skipped_records += 1;
                    continue;
                }
            };
            if seen.insert(local.clone()) {
                names.push(ItemName { remote, local });
            } else {
                debug!("{remote} repeats stored id {local}");
            }
        }
        names
    }

    fn fetch_items(
        &self,
        names: &[ItemName],
        report: &mut SyncReport,
    ) -> Result<Vec<(ItemId, Value)>, SyncError> {
        let mut items = Vec::with_capacity(names.len());
        for ItemName { remote, local } in names {
            debug!("Fetching {remote}");
            match self.source.fetch_item(remote) {
                Ok(item) => items.push((local.clone(), item)),
                Err(err) if self.context.config.on_item_error == ItemErrorPolicy::Skip => {
                    warn!(
                        "Keeping previous {local}.json: {:#}",
                        anyhow::Error::from(err)
                    );
                    report.failed.push(local.clone());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(items)
    }
}

fn enter(stage: &mut SyncStage, next: SyncStage) {
    *stage = next;
    info!("Stage: {next}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::error::FetchFailure;
    use crate::git::tests::FakeVcs;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct StaticSource {
        index: Value,
        items: HashMap<String, Value>,
    }

    impl DocumentSource for StaticSource {
        fn fetch_index(&self) -> Result<Value, SyncError> {
            Ok(self.index.clone())
        }

        fn fetch_item(&self, id: &ItemId) -> Result<Value, SyncError> {
            self.items
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| SyncError::Fetch {
                    url: format!("static://{id}.json"),
                    source: FetchFailure::Request(ureq::Error::StatusCode(404)),
                })
        }
    }

    fn context(dir: &std::path::Path, config: SyncConfig) -> SyncContext {
        SyncContext {
            config,
            store_dir: dir.to_path_buf(),
            publish: true,
        }
    }

    fn source() -> StaticSource {
        StaticSource {
            index: json!([
                {"title": "newsecrettips A", "match_link": "https://h/m?id=a"},
                {"title": "no id", "match_link": "https://h/m?lang=en"},
                {"title": "no link"},
                {"title": "B", "match_link": "https://h/m?id=b"},
                {"title": "B again", "match_link": "https://h/m?id=b"}
            ]),
            items: HashMap::from([
                ("a".to_string(), json!({"telecast_links": [{"name": "x", "url": "u"}]})),
                ("b".to_string(), json!({"title": "newsecrettips"})),
            ]),
        }
    }

    #[test]
    fn collect_ids_skips_records_without_id() {
        let entries = collect_ids(&source().index).unwrap();
        let ids: Vec<&str> = entries.ids.iter().map(ItemId::as_str).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(entries.skipped, 2);
    }

    #[test]
    fn collect_ids_rejects_malformed_index() {
        assert!(matches!(collect_ids(&json!({})), Err(SyncError::Parse(_))));
        assert!(matches!(collect_ids(&json!([1])), Err(SyncError::Parse(_))));
    }

    #[test]
    fn run_writes_prunes_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stale.json"), "{}").unwrap();
        let vcs = FakeVcs {
            status: " M api.json".to_string(),
            head: Some("abc".to_string()),
            ..FakeVcs::default()
        };
        let source = source();
        let pipeline = SyncPipeline::new(context(dir.path(), SyncConfig::default()), &source, &vcs);

        let report = pipeline.run().unwrap();
        let written: Vec<&str> = report.written.iter().map(ItemId::as_str).collect();
        assert_eq!(written, ["a", "b"]);
        assert_eq!(report.skipped_records, 2);
        assert_eq!(report.removed, vec![dir.path().join("stale.json")]);
        assert_eq!(report.publish, Some(PublishOutcome::Published));
        assert_eq!(
            vcs.calls(),
            ["status", "add", "commit sync(api): refresh match jsons", "push"]
        );

        let index: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("api.json")).unwrap())
                .unwrap();
        assert_eq!(index[0]["title"], "yonotvs A");
        let a: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("a.json")).unwrap())
                .unwrap();
        assert_eq!(a, json!({"info_sources": [{"name": "Link 1", "url": "u"}]}));
    }

    #[test]
    fn unchanged_tree_is_not_published() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = FakeVcs::default();
        let source = source();
        let report = SyncPipeline::new(context(dir.path(), SyncConfig::default()), &source, &vcs)
            .run()
            .unwrap();
        assert!(!report.has_changes);
        assert_eq!(report.publish, Some(PublishOutcome::NothingToPublish));
        assert_eq!(vcs.calls(), ["status"]);
    }

    #[test]
    fn vendor_token_in_id_names_the_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = FakeVcs::default();
        let source = StaticSource {
            index: json!([
                {"match_link": "https://h/m?id=newsecrettips7"},
                {"match_link": "https://h/m?id=yonotvs7"}
            ]),
            items: HashMap::from([("newsecrettips7".to_string(), json!({"n": 7}))]),
        };
        let mut context = context(dir.path(), SyncConfig::default());
        context.publish = false;

        let report = SyncPipeline::new(context, &source, &vcs).run().unwrap();
        let written: Vec<&str> = report.written.iter().map(ItemId::as_str).collect();
        assert_eq!(written, ["yonotvs7"]);
        assert!(dir.path().join("yonotvs7.json").exists());
        assert!(!dir.path().join("newsecrettips7.json").exists());

        let index: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("api.json")).unwrap())
                .unwrap();
        assert_eq!(index[0]["match_link"], "https://h/m?id=yonotvs7");
    }

    #[test]
    fn unusable_rewritten_id_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = FakeVcs::default();
        let source = StaticSource {
            index: json!([{"match_link": "https://h/m?id=tok"}]),
            items: HashMap::from([("tok".to_string(), json!({}))]),
        };
        let mut config = SyncConfig::default();
        config.rewrite.vendor_token = "tok".to_string();
        config.rewrite.vendor_replacement = "a/b".to_string();

        let report = SyncPipeline::new(context(dir.path(), config), &source, &vcs)
            .run()
            .unwrap();
        assert!(report.written.is_empty());
        assert_eq!(report.skipped_records, 1);
    }

    #[test]
    fn item_fetch_failure_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = FakeVcs::default();
        let mut source = source();
        source.items.remove("b");
        let result =
            SyncPipeline::new(context(dir.path(), SyncConfig::default()), &source, &vcs).run();
        assert!(matches!(result, Err(SyncError::Fetch { .. })));
        assert!(!dir.path().join("api.json").exists());
        assert!(vcs.calls().is_empty());
    }

    #[test]
    fn skip_policy_keeps_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{\"old\": true}").unwrap();
        let vcs = FakeVcs::default();
        let mut source = source();
        source.items.remove("b");
        let config = SyncConfig {
            on_item_error: ItemErrorPolicy::Skip,
            ..SyncConfig::default()
        };

        let report = SyncPipeline::new(context(dir.path(), config), &source, &vcs)
            .run()
            .unwrap();
        assert_eq!(report.failed, vec![ItemId::parse("b").unwrap()]);
        assert!(report.removed.is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.json")).unwrap(),
            "{\"old\": true}"
        );
    }

    #[test]
    fn publishing_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = FakeVcs {
            status: "?? a.json".to_string(),
            ..FakeVcs::default()
        };
        let source = source();
        let mut context = context(dir.path(), SyncConfig::default());
        context.publish = false;

        let report = SyncPipeline::new(context, &source, &vcs).run().unwrap();
        assert!(report.has_changes);
        assert_eq!(report.publish, None);
        assert_eq!(vcs.calls(), ["status"]);
    }
}
