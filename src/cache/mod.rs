// Incremental cache manager: fingerprint, extract, merge, re-resolve

pub mod cancel;

#[cfg(test)]
mod tests;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AdapterUnavailableError, ParseError, SyncError};
use crate::index::db::GraphStore;
use crate::index::{fingerprint, name_key, ExtractedFile, Language, SourceFile};
use crate::indexer::Adapter;
use crate::resolver::{resolve_all, ResolutionScope, ResolutionSummary, SymbolIndex};

pub use cancel::SyncCancellation;

/// A file as found by the repository walk. `path` is relative to the repository root.
///
/// `content` carries the read error when the file exists but could not be read.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub path: String,
    pub content: Result<Vec<u8>, String>,
}

impl SourceInput {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: Ok(content.into()),
        }
    }

    pub fn unreadable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Err(message.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub languages: Vec<Language>,
    pub workers: usize,
    pub timeout: Duration,
    pub full_resolution_ratio: f64,
    pub force_full: bool,
    pub show_progress: bool,
    #[cfg(test)]
    pub(crate) extract_delay: Option<Duration>,
    #[cfg(test)]
    pub(crate) force_unavailable: Vec<Language>,
    #[cfg(test)]
    pub(crate) crash_on: Vec<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            languages: config.enabled_languages(),
            workers: config.sync.workers.max(1),
            timeout: Duration::from_secs(config.sync.timeout_secs),
            full_resolution_ratio: config.sync.full_resolution_ratio,
            force_full: false,
            show_progress: false,
            #[cfg(test)]
            extract_delay: None,
            #[cfg(test)]
            force_unavailable: Vec::new(),
            #[cfg(test)]
            crash_on: Vec::new(),
        }
    }
}

/// Outcome of one `sync`
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub revision: u64,
    pub analyzed: usize,
    pub skipped: usize,
    pub removed: usize,
    pub failed: Vec<ParseError>,
    pub unsupported: usize,
    pub unavailable: Vec<AdapterUnavailableError>,
    /// Files left untouched because their language was unavailable
    pub deferred: usize,
    /// Files that could not be read; their previous contribution is kept
    pub unreadable: usize,
    pub resolution: ResolutionSummary,
}

enum Extraction {
    Done {
        file: ExtractedFile,
        fingerprint: String,
    },
    Failed(ParseError),
    Cancelled,
}

struct Queued {
    path: String,
    content: Vec<u8>,
    language: Language,
    fingerprint: String,
}

/// Keeps one repository's graph in step with its files
pub struct CacheManager {
    store: GraphStore,
}

impl CacheManager {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    fn check_language(&self, language: Language, options: &SyncOptions) -> Result<(), AdapterUnavailableError> {
        if forced_unavailable(options, language) {
            return Err(AdapterUnavailableError {
                language,
                reason: "disabled for test".to_string(),
            });
        }
        Adapter::for_language(language).check_available()
    }

    /// Bring the stored graph for `root` in line with `files`.
    ///
    /// `files` is the complete current file set: stored files missing from it are removed,
    /// whatever their language. Nothing is written unless the whole run completes.
    pub async fn sync(
        &self,
        root: &str,
        files: Vec<SourceInput>,
        cancel: &SyncCancellation,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let repo = self.store.ensure_repository(root)?;
        self.store.verify_repository(repo.id)?;

        let stored: HashMap<String, SourceFile> = self
            .store
            .source_files(repo.id)?
            .into_iter()
            .map(|f| (f.path.clone(), f))
            .collect();

        let mut unavailable = Vec::new();
        let mut active: HashSet<Language> = HashSet::new();
        for &language in &options.languages {
            match self.check_language(language, options) {
                Ok(()) => {
                    active.insert(language);
                }
                Err(e) => {
                    warn!("{}; keeping previously analyzed {} files as they are", e, language);
                    unavailable.push(e);
                }
            }
        }

        // Every path present on disk counts as seen, analyzed or not.
        let mut seen: HashSet<String> = HashSet::new();
        let mut queued = Vec::new();
        let mut unreadable = Vec::new();
        let mut skipped = 0;
        let mut unsupported = 0;
        let mut deferred = 0;

        for input in files {
            if !seen.insert(input.path.clone()) {
                debug!("Ignoring duplicate input {}", input.path);
                continue;
            }
            let language = match Language::from_path(&input.path) {
                Some(language) if options.languages.contains(&language) => language,
                _ => {
                    unsupported += 1;
                    continue;
                }
            };
            if !active.contains(&language) {
                deferred += 1;
                continue;
            }
            let content = match input.content {
                Ok(content) => content,
                Err(message) => {
                    unreadable.push(ParseError::Unreadable {
                        path: input.path,
                        message,
                    });
                    continue;
                }
            };
            let fingerprint = fingerprint(&content);
            if stored
                .get(&input.path)
                .is_some_and(|f| f.fingerprint == fingerprint)
            {
                skipped += 1;
                continue;
            }
            queued.push(Queued {
                path: input.path,
                content,
                language,
                fingerprint,
            });
        }

        let mut missing: Vec<String> = stored
            .values()
            .filter(|f| !seen.contains(&f.path))
            .map(|f| f.path.clone())
            .collect();
        missing.sort();

        info!(
            "Sync {}: {} to analyze, {} unchanged, {} missing",
            root,
            queued.len(),
            skipped,
            missing.len()
        );

        let outcomes = self.extract_all(queued, cancel, options).await;
        if cancel.is_cancelled() || outcomes.iter().any(|o| matches!(o, Extraction::Cancelled)) {
            info!("Sync {} cancelled before writing", root);
            return Err(SyncError::Cancelled);
        }

        let mut extracted = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Extraction::Done { file, fingerprint } => extracted.push((file, fingerprint)),
                Extraction::Failed(e) => {
                    warn!("Skipping file: {}", e);
                    failed.push(e);
                }
                Extraction::Cancelled => {}
            }
        }
        extracted.sort_by(|a, b| a.0.path.cmp(&b.0.path));
        for e in &unreadable {
            warn!("Keeping previous analysis: {}", e);
        }

        let first_sync = repo.revision == 0;
        let tracked = stored.len()
            + extracted
                .iter()
                .filter(|(f, _)| !stored.contains_key(&f.path))
                .count();
        let changes = extracted.len() + failed.len() + missing.len();
        let full = first_sync
            || options.force_full
            || changes as f64 > options.full_resolution_ratio * tracked.max(1) as f64;

        let (revision, resolution) = self.store.write(repo.id, |w| {
            let revision = w.bump_revision()?;
            let mut changed_files = BTreeSet::new();
            let mut keys = BTreeSet::new();

            for (file, fingerprint) in &extracted {
                for name in w.remove_file(&file.path)? {
                    keys.insert(name_key(&name).to_string());
                }
                w.insert_file(file, fingerprint, revision)?;
                for symbol in &file.symbols {
                    keys.insert(name_key(&symbol.qualified_name).to_string());
                }
                changed_files.insert(file.path.clone());
                debug!(
                    "Stored {} ({} symbols, {} references)",
                    file.path,
                    file.symbols.len(),
                    file.stubs.len()
                );
            }

            let gone = failed
                .iter()
                .map(|e| e.path())
                .filter(|p| stored.contains_key(*p))
                .chain(missing.iter().map(String::as_str));
            for path in gone {
                for name in w.remove_file(path)? {
                    keys.insert(name_key(&name).to_string());
                }
            }

            let index = SymbolIndex::new(w.symbol_index()?);
            let (scope, pending) = if full {
                (ResolutionScope::Full, w.all_relationships()?)
            } else {
                (
                    ResolutionScope::Incremental,
                    w.relationships_affected_by(&changed_files, &keys)?,
                )
            };
            let (resolved, summary) = resolve_all(&index, pending, scope);
            w.set_targets(&resolved)?;

            Ok((revision, summary))
        })?;

        let unreadable_count = unreadable.len();
        failed.extend(unreadable);
        failed.sort_by(|a, b| a.path().cmp(b.path()));

        let report = SyncReport {
            revision,
            analyzed: extracted.len(),
            skipped,
            removed: missing.len(),
            failed,
            unsupported,
            unavailable,
            deferred,
            unreadable: unreadable_count,
            resolution,
        };

        info!(
            "Sync {} at revision {}: {} analyzed, {} skipped, {} removed, {} failed, {:?} resolution of {} references",
            root,
            report.revision,
            report.analyzed,
            report.skipped,
            report.removed,
            report.failed.len(),
            report.resolution.scope,
            report.resolution.considered
        );

        Ok(report)
    }

    /// Run every queued file through its adapter on a bounded pool of blocking tasks.
    async fn extract_all(
        &self,
        queued: Vec<Queued>,
        cancel: &SyncCancellation,
        options: &SyncOptions,
    ) -> Vec<Extraction> {
        let progress = if options.show_progress && !queued.is_empty() {
            let bar = ProgressBar::new(queued.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let timeout = options.timeout;
        let delay = extract_delay(options);

        let results: Vec<Extraction> = stream::iter(queued)
            .map(|item| {
                let crash = crash_on(options, &item.path);
                extract_one(item, cancel.clone(), timeout, delay, crash)
            })
            .buffer_unordered(options.workers.max(1))
            .inspect(|_| progress.inc(1))
            .collect()
            .await;

        progress.finish_and_clear();
        results
    }
}

async fn extract_one(
    item: Queued,
    cancel: SyncCancellation,
    timeout: Duration,
    delay: Option<Duration>,
    crash: bool,
) -> Extraction {
    if cancel.is_cancelled() {
        return Extraction::Cancelled;
    }

    let Queued {
        path,
        content,
        language,
        fingerprint,
    } = item;
    let adapter = Adapter::for_language(language);

    let task_path = path.clone();
    let handle = tokio::task::spawn_blocking(move || {
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if crash {
            panic!("adapter crashed on {}", task_path);
        }
        adapter.extract_within(&task_path, &content, Some(timeout))
    });

    // tree-sitter stops itself at the deadline; the outer bound covers the passes after parsing.
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(file))) => Extraction::Done { file, fingerprint },
        Ok(Ok(Err(e))) => Extraction::Failed(e),
        Ok(Err(join_error)) => Extraction::Failed(ParseError::Crashed {
            message: panic_message(join_error),
            path,
        }),
        Err(_) => Extraction::Failed(ParseError::Timeout {
            path,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap_or_else(|| "adapter panicked".to_string()),
        Err(error) => error.to_string(),
    }
}

#[cfg(test)]
fn forced_unavailable(options: &SyncOptions, language: Language) -> bool {
    options.force_unavailable.contains(&language)
}

#[cfg(not(test))]
fn forced_unavailable(_options: &SyncOptions, _language: Language) -> bool {
    false
}

#[cfg(test)]
fn crash_on(options: &SyncOptions, path: &str) -> bool {
    options.crash_on.iter().any(|p| p == path)
}

#[cfg(not(test))]
fn crash_on(_options: &SyncOptions, _path: &str) -> bool {
    false
}

#[cfg(test)]
fn extract_delay(options: &SyncOptions) -> Option<Duration> {
    options.extract_delay
}

#[cfg(not(test))]
fn extract_delay(_options: &SyncOptions) -> Option<Duration> {
    None
}
