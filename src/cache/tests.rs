use super::*;
use crate::error::StoreError;
use crate::index::db::GraphStore;
use crate::query::{MapQuery, QueryEngine, StructuralReport};
use tempfile::tempdir;

const ROOT: &str = "/repo";

const MODELS: &str = "from lib.base import Base\n\nclass User(Base):\n    def save(self):\n        self.validate()\n\n    def validate(self):\n        pass\n";
const BASE: &str = "class Base:\n    pass\n";
const VIEW: &str = "import { User } from './user';\n\nexport function render(u: User): void {\n  draw(u);\n}\n\nexport function draw(u: User): void {}\n";
const USER_TS: &str = "export class User {\n  name(): string {\n    return '';\n  }\n}\n";

fn fixture() -> Vec<SourceInput> {
    vec![
        SourceInput::new("app/models.py", MODELS),
        SourceInput::new("lib/base.py", BASE),
        SourceInput::new("web/view.ts", VIEW),
        SourceInput::new("web/user.ts", USER_TS),
    ]
}

fn open_manager() -> (tempfile::TempDir, CacheManager) {
    let dir = tempdir().unwrap();
    let store = GraphStore::open(dir.path().join("graph.db")).unwrap();
    (dir, CacheManager::new(store))
}

async fn sync(manager: &CacheManager, files: Vec<SourceInput>) -> SyncReport {
    manager
        .sync(ROOT, files, &SyncCancellation::new(), &SyncOptions::default())
        .await
        .unwrap()
}

fn map(manager: &CacheManager) -> StructuralReport {
    QueryEngine::new(manager.store().clone())
        .map(ROOT, &MapQuery::repository())
        .unwrap()
}

fn edge<'a>(report: &'a StructuralReport, source: &str, target_name: &str) -> &'a crate::query::RelationshipView {
    report
        .entries
        .iter()
        .find(|e| e.symbol.qualified_name == source)
        .and_then(|e| e.relationships.iter().find(|r| r.target_name == target_name))
        .unwrap_or_else(|| panic!("no edge {} -> {}", source, target_name))
}

#[tokio::test]
async fn test_first_sync_analyzes_everything() {
    let (_dir, manager) = open_manager();
    let mut files = fixture();
    files.push(SourceInput::new("README.md", "# readme"));

    let report = sync(&manager, files).await;
    assert_eq!(report.analyzed, 4);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.unsupported, 1);
    assert!(report.failed.is_empty());
    assert_eq!(report.revision, 1);
    assert_eq!(report.resolution.scope, ResolutionScope::Full);

    let graph = map(&manager);
    assert_eq!(edge(&graph, "User", "Base").target_file.as_deref(), Some("lib/base.py"));
    assert_eq!(edge(&graph, "render", "User").target_file.as_deref(), Some("web/user.ts"));
    assert_eq!(edge(&graph, "render", "draw").target_file.as_deref(), Some("web/view.ts"));
}

#[tokio::test]
async fn test_second_sync_is_idempotent() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;
    let before = map(&manager);

    let report = sync(&manager, fixture()).await;
    assert_eq!(report.analyzed, 0);
    assert_eq!(report.skipped, 4);
    assert_eq!(report.removed, 0);
    assert_eq!(report.resolution.scope, ResolutionScope::Incremental);
    assert_eq!(report.resolution.considered, 0);

    assert_eq!(map(&manager), before);
}

#[tokio::test]
async fn test_changed_file_is_reanalyzed() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;

    let mut files = fixture();
    files[1] = SourceInput::new("lib/base.py", "class Base:\n    def hook(self):\n        pass\n");
    let report = sync(&manager, files).await;
    assert_eq!(report.analyzed, 1);
    assert_eq!(report.skipped, 3);

    let graph = map(&manager);
    assert!(graph.entries.iter().any(|e| e.symbol.qualified_name == "Base.hook"));
    assert!(edge(&graph, "User", "Base").resolved);
    manager.store().verify_repository(1).unwrap();
}

#[tokio::test]
async fn test_deleted_file_leaves_unresolved_references() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;

    let files: Vec<_> = fixture()
        .into_iter()
        .filter(|f| f.path != "lib/base.py")
        .collect();
    let report = sync(&manager, files).await;
    assert_eq!(report.removed, 1);

    let graph = map(&manager);
    assert!(graph.entries.iter().all(|e| e.file != "lib/base.py"));
    let inherits = edge(&graph, "User", "Base");
    assert!(!inherits.resolved);
    assert_eq!(inherits.target_id, None);
    assert_eq!(inherits.module_hint.as_deref(), Some("lib/base"));

    let repo = manager.store().repository(ROOT).unwrap().unwrap();
    manager.store().verify_repository(repo.id).unwrap();
}

#[tokio::test]
async fn test_resolution_does_not_depend_on_arrival_order() {
    let (_a, all_at_once) = open_manager();
    sync(&all_at_once, fixture()).await;

    let (_b, reversed) = open_manager();
    let mut files = fixture();
    files.reverse();
    sync(&reversed, files).await;

    let (_c, piecemeal) = open_manager();
    sync(&piecemeal, vec![SourceInput::new("app/models.py", MODELS)]).await;
    assert!(!edge(&map(&piecemeal), "User", "Base").resolved);
    let report = sync(&piecemeal, fixture()).await;
    assert_eq!(report.resolution.scope, ResolutionScope::Full);

    assert_eq!(map(&reversed), map(&all_at_once));
    assert_eq!(map(&piecemeal), map(&all_at_once));
}

#[tokio::test]
async fn test_incremental_resolution_links_new_target() {
    let (_dir, manager) = open_manager();
    let mut files = fixture();
    files.retain(|f| f.path != "lib/base.py");
    sync(&manager, files).await;

    let report = sync(&manager, fixture()).await;
    assert_eq!(report.analyzed, 1);
    assert_eq!(report.resolution.scope, ResolutionScope::Incremental);
    assert!(edge(&map(&manager), "User", "Base").resolved);

    let (_fresh_dir, fresh) = open_manager();
    sync(&fresh, fixture()).await;
    assert_eq!(map(&manager), map(&fresh));
}

#[tokio::test]
async fn test_python_change_leaves_typescript_untouched() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;
    let ts_before: Vec<_> = map(&manager)
        .entries
        .into_iter()
        .filter(|e| e.file.ends_with(".ts"))
        .collect();

    let mut files = fixture();
    files[0] = SourceInput::new("app/models.py", "class Admin:\n    pass\n");
    sync(&manager, files).await;

    let ts_after: Vec<_> = map(&manager)
        .entries
        .into_iter()
        .filter(|e| e.file.ends_with(".ts"))
        .collect();
    assert_eq!(ts_before, ts_after);

    let repo = manager.store().repository(ROOT).unwrap().unwrap();
    for file in manager.store().source_files(repo.id).unwrap() {
        let expected = if file.path == "app/models.py" { 2 } else { 1 };
        assert_eq!(file.revision, expected, "{}", file.path);
    }
}

#[tokio::test]
async fn test_drop_then_repopulate() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;
    let original = map(&manager);

    assert!(manager.store().drop_repository(ROOT).unwrap());
    assert!(map(&manager).is_empty());

    let report = sync(&manager, fixture()).await;
    assert_eq!(report.analyzed, 4);
    assert_eq!(map(&manager), original);
}

#[tokio::test]
async fn test_cancelled_sync_writes_nothing() {
    let (_dir, manager) = open_manager();
    let cancel = SyncCancellation::new();
    cancel.cancel();

    let result = manager
        .sync(ROOT, fixture(), &cancel, &SyncOptions::default())
        .await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(map(&manager).is_empty());

    let repo = manager.store().repository(ROOT).unwrap().unwrap();
    assert_eq!(repo.revision, 0);
}

#[tokio::test]
async fn test_timeout_is_a_file_failure() {
    let (_dir, manager) = open_manager();
    let options = SyncOptions {
        timeout: Duration::from_millis(20),
        extract_delay: Some(Duration::from_millis(300)),
        ..SyncOptions::default()
    };

    let report = manager
        .sync(ROOT, vec![SourceInput::new("lib/base.py", BASE)], &SyncCancellation::new(), &options)
        .await
        .unwrap();
    assert_eq!(report.analyzed, 0);
    assert_eq!(
        report.failed,
        vec![ParseError::Timeout {
            path: "lib/base.py".to_string(),
            timeout_ms: 20,
        }]
    );
    assert!(map(&manager).is_empty());
}

#[tokio::test]
async fn test_syntax_error_removes_previous_contribution() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;

    let mut files = fixture();
    files[1] = SourceInput::new("lib/base.py", "class Base(:\n");
    let report = sync(&manager, files).await;
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0], ParseError::Syntax { .. }));

    let graph = map(&manager);
    assert!(graph.entries.iter().all(|e| e.file != "lib/base.py"));
    assert!(!edge(&graph, "User", "Base").resolved);

    let report = sync(&manager, fixture()).await;
    assert_eq!(report.analyzed, 1);
    assert!(edge(&map(&manager), "User", "Base").resolved);
}

#[tokio::test]
async fn test_unavailable_language_keeps_present_files_and_drops_deleted_ones() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;
    let view_symbols = map(&manager)
        .entries
        .iter()
        .filter(|e| e.file == "web/view.ts")
        .count();

    let options = SyncOptions {
        force_unavailable: vec![Language::TypeScript],
        ..SyncOptions::default()
    };
    let files: Vec<_> = fixture()
        .into_iter()
        .filter(|f| f.path != "web/user.ts")
        .collect();
    let report = manager
        .sync(ROOT, files, &SyncCancellation::new(), &options)
        .await
        .unwrap();

    assert_eq!(report.unavailable.len(), 1);
    assert_eq!(report.unavailable[0].language, Language::TypeScript);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.removed, 1);

    let graph = map(&manager);
    assert!(graph.entries.iter().all(|e| e.file != "web/user.ts"));
    assert_eq!(
        graph.entries.iter().filter(|e| e.file == "web/view.ts").count(),
        view_symbols
    );
    assert!(!edge(&graph, "render", "User").resolved);

    let repo = manager.store().repository(ROOT).unwrap().unwrap();
    manager.store().verify_repository(repo.id).unwrap();
}

#[tokio::test]
async fn test_disabled_language_keeps_present_files_and_drops_deleted_ones() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;

    let python_only = SyncOptions {
        languages: vec![Language::Python],
        ..SyncOptions::default()
    };
    let files: Vec<_> = fixture()
        .into_iter()
        .filter(|f| f.path != "web/user.ts")
        .collect();
    let report = manager
        .sync(ROOT, files, &SyncCancellation::new(), &python_only)
        .await
        .unwrap();

    assert_eq!(report.unsupported, 1);
    assert_eq!(report.removed, 1);
    let graph = map(&manager);
    assert!(graph.entries.iter().all(|e| e.file != "web/user.ts"));
    assert!(graph.entries.iter().any(|e| e.file == "web/view.ts"));
}

#[tokio::test]
async fn test_unreadable_file_keeps_previous_contribution() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;
    let before = map(&manager);

    let mut files = fixture();
    files[1] = SourceInput::unreadable("lib/base.py", "permission denied");
    let report = sync(&manager, files).await;

    assert_eq!(report.removed, 0);
    assert_eq!(report.unreadable, 1);
    assert_eq!(
        report.failed,
        vec![ParseError::Unreadable {
            path: "lib/base.py".to_string(),
            message: "permission denied".to_string(),
        }]
    );
    assert_eq!(map(&manager), before);
    assert!(edge(&map(&manager), "User", "Base").resolved);
}

#[tokio::test]
async fn test_broken_python_does_not_block_typescript() {
    let (_dir, manager) = open_manager();
    let files = vec![
        SourceInput::new("app/broken.py", "def broken(:
"),
        SourceInput::new("web/view.ts", VIEW),
    ];

    let report = sync(&manager, files).await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path(), "app/broken.py");
    assert!(matches!(report.failed[0], ParseError::Syntax { .. }));
    assert_eq!(report.analyzed, 1);

    let graph = map(&manager);
    assert!(graph.entries.iter().all(|e| e.file == "web/view.ts"));
    assert!(graph.entries.iter().any(|e| e.symbol.qualified_name == "render"));
    assert!(graph.entries.iter().any(|e| e.symbol.qualified_name == "draw"));
    assert_eq!(edge(&graph, "render", "draw").target_file.as_deref(), Some("web/view.ts"));
    assert!(!edge(&graph, "render", "User").resolved);
}

#[tokio::test]
async fn test_adapter_panic_is_a_file_failure() {
    let (_dir, manager) = open_manager();
    let options = SyncOptions {
        crash_on: vec!["lib/base.py".to_string()],
        ..SyncOptions::default()
    };

    let report = manager
        .sync(ROOT, fixture(), &SyncCancellation::new(), &options)
        .await
        .unwrap();
    assert_eq!(report.analyzed, 3);
    assert_eq!(
        report.failed,
        vec![ParseError::Crashed {
            path: "lib/base.py".to_string(),
            message: "adapter crashed on lib/base.py".to_string(),
        }]
    );

    let graph = map(&manager);
    assert!(graph.entries.iter().all(|e| e.file != "lib/base.py"));
    assert!(!edge(&graph, "User", "Base").resolved);
    assert!(edge(&graph, "render", "User").resolved);
}

#[tokio::test]
async fn test_disabled_language_is_unsupported() {
    let (_dir, manager) = open_manager();
    let options = SyncOptions {
        languages: vec![Language::Python],
        ..SyncOptions::default()
    };
    let report = manager
        .sync(ROOT, fixture(), &SyncCancellation::new(), &options)
        .await
        .unwrap();
    assert_eq!(report.analyzed, 2);
    assert_eq!(report.unsupported, 2);
    assert!(map(&manager).entries.iter().all(|e| e.file.ends_with(".py")));
}

#[tokio::test]
async fn test_corrupted_store_aborts_sync() {
    let (_dir, manager) = open_manager();
    sync(&manager, fixture()).await;

    {
        let conn = manager.store().get_conn().unwrap();
        conn.execute("DELETE FROM cache_entries WHERE path = 'lib/base.py'", [])
            .unwrap();
    }

    let err = manager
        .sync(ROOT, fixture(), &SyncCancellation::new(), &SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Store(ref e) if e.is_corruption()), "{}", err);

    manager.store().drop_all().unwrap();
    let report = sync(&manager, fixture()).await;
    assert_eq!(report.analyzed, 4);
}

#[tokio::test]
async fn test_parallel_workers_match_single_worker() {
    let files: Vec<SourceInput> = (0..12)
        .map(|i| {
            SourceInput::new(
                format!("pkg/mod{}.py", i),
                format!("from pkg.mod0 import Root\n\nclass Leaf{}(Root):\n    pass\n", i),
            )
        })
        .chain(std::iter::once(SourceInput::new("pkg/mod0.py", "class Root:\n    pass\n")))
        .filter(|f| f.path != "pkg/mod0.py" || f.content.as_ref().is_ok_and(|c| c.starts_with(b"class Root")))
        .collect();

    let (_a, single) = open_manager();
    let serial = SyncOptions {
        workers: 1,
        ..SyncOptions::default()
    };
    single
        .sync(ROOT, files.clone(), &SyncCancellation::new(), &serial)
        .await
        .unwrap();

    let (_b, parallel) = open_manager();
    let wide = SyncOptions {
        workers: 8,
        ..SyncOptions::default()
    };
    parallel
        .sync(ROOT, files, &SyncCancellation::new(), &wide)
        .await
        .unwrap();

    let report = map(&parallel);
    assert_eq!(report, map(&single));
    assert_eq!(report.len(), 12);
    assert!(report
        .entries
        .iter()
        .flat_map(|e| &e.relationships)
        .all(|r| r.target_file.as_deref() == Some("pkg/mod0.py")));
}

#[test]
fn test_store_error_converts_into_sync_error() {
    let err: SyncError = StoreError::corruption("x").into();
    assert!(matches!(err, SyncError::Store(_)));
}
