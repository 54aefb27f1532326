/// End-to-end tests for the save pipeline on a real file system
/// Tests session → buffer → engine → store flow
use canvas_common::{DocumentStore, FsDocumentStore};
use canvas_editor::{CanvasDocument, CanvasNode, ConflictChoice, ConflictResolver, DocumentPhase};
use canvas_workspace::{
    CanvasWorkspace, FileWatcher, SaveHost, SaveOutcome, SavePolicy, SaveSettings, SaveTrigger,
    ShutdownChoice, ShutdownOutcome,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

const BOARD: &str = r#"{
	"nodes":[
		{"id":"n1","type":"text","text":"a","x":0,"y":0,"width":250,"height":60},
		{"id":"n2","type":"link","url":"https://example.com","x":300,"y":0,"width":400,"height":400}
	],
	"edges":[
		{"id":"e1","fromNode":"n1","fromSide":"right","toNode":"n2","toSide":"left"}
	]
}"#;

struct Vault {
    _dir: tempfile::TempDir,
    root: PathBuf,
    store: Arc<FsDocumentStore>,
}

fn vault() -> Vault {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    std::fs::write(root.join("board.canvas"), BOARD).unwrap();
    let store = Arc::new(FsDocumentStore::new(&root));
    Vault {
        _dir: dir,
        root,
        store,
    }
}

fn board() -> &'static Path {
    Path::new("board.canvas")
}

fn with_text(node: &CanvasNode, text: &str) -> CanvasNode {
    let mut node = node.clone();
    node.set_text(text);
    node
}

/// Rewrite the file behind the workspace's back
fn external_edit(vault: &Vault, edit: impl FnOnce(&mut CanvasDocument)) {
    let mut doc = vault.store.read(board()).unwrap();
    edit(&mut doc);
    vault.store.write(board(), &doc).unwrap();
}

#[tokio::test]
async fn test_edit_then_manual_save_round_trip() {
    init_tracing();
    let vault = vault();
    let mut ws = CanvasWorkspace::new(vault.store.clone(), SaveSettings::default());
    let doc = ws.open(board()).unwrap();

    let n1 = doc.snapshot().node("n1").cloned().unwrap();
    assert!(doc.start_editing("n1", n1.clone()).is_some());
    assert!(doc.update_content("n1", with_text(&n1, "b")));
    assert!(doc.has_unsaved_changes());
    assert!(doc.stop_editing("n1", true));
    assert_eq!(doc.snapshot().node("n1").unwrap().text_content(), Some("b"));

    let outcome = doc.save(SaveTrigger::ManualSave).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved);
    assert!(!doc.has_unsaved_changes());

    let on_disk = std::fs::read_to_string(vault.root.join("board.canvas")).unwrap();
    assert!(on_disk.contains("\"text\": \"b\""));
    assert!(on_disk.contains("\"fromNode\": \"n1\""));
    assert!(on_disk.starts_with("{\n\t\"nodes\""));

    let reopened = vault.store.read(board()).unwrap();
    assert_eq!(reopened, doc.snapshot());
}

#[tokio::test]
async fn test_external_edit_on_same_node_reaches_prompt() {
    init_tracing();
    let vault = vault();
    let prompted = Arc::new(Mutex::new(0usize));

    struct CountingPrompt(Arc<Mutex<usize>>);
    impl canvas_editor::ConflictPrompt for CountingPrompt {
        fn choose<'a>(
            &'a self,
            info: &'a canvas_editor::ConflictInfo,
        ) -> BoxFuture<'a, Result<ConflictChoice, canvas_editor::EditorError>> {
            *self.0.lock().unwrap() += 1;
            assert!(info.has_active_editors);
            assert_ne!(info.local_hash, info.remote_hash);
            async { Ok(ConflictChoice::KeepLocal) }.boxed()
        }
    }

    let mut ws = CanvasWorkspace::new(vault.store.clone(), SaveSettings::default())
        .with_resolver(ConflictResolver::new(Arc::new(CountingPrompt(prompted.clone()))));
    let doc = ws.open(board()).unwrap();

    let n1 = doc.snapshot().node("n1").cloned().unwrap();
    doc.start_editing("n1", n1.clone());
    doc.update_content("n1", with_text(&n1, "b"));
    doc.stop_editing("n1", true);
    let n2 = doc.snapshot().node("n2").cloned().unwrap();
    doc.start_editing("n2", n2);

    external_edit(&vault, |d| {
        d.node_mut("n1").unwrap().set_text("c");
    });
    assert!(ws.handle_external_change(board()).unwrap());

    let outcome = doc.save(SaveTrigger::ManualSave).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved);
    assert_eq!(*prompted.lock().unwrap(), 1);

    let on_disk = vault.store.read(board()).unwrap();
    assert_eq!(on_disk.node("n1").unwrap().text_content(), Some("b"));
}

#[tokio::test]
async fn test_additive_external_edit_merges_without_prompt() {
    init_tracing();
    let vault = vault();
    let mut ws = CanvasWorkspace::new(vault.store.clone(), SaveSettings::default());
    let doc = ws.open(board()).unwrap();

    let n1 = doc.snapshot().node("n1").cloned().unwrap();
    doc.start_editing("n1", n1);
    doc.apply_change(canvas_editor::ChangeOperation::create(
        CanvasNode::text("local", "added here").at(0.0, 200.0),
    ));

    external_edit(&vault, |d| {
        d.upsert_node(CanvasNode::text("remote", "added elsewhere").at(0.0, 400.0));
    });
    assert!(ws.handle_external_change(board()).unwrap());

    let outcome = doc.save(SaveTrigger::ManualSave).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Merged);

    let on_disk = vault.store.read(board()).unwrap();
    for id in ["n1", "n2", "local", "remote"] {
        assert!(on_disk.contains_node(id), "missing {}", id);
    }
    assert!(on_disk.contains_edge("e1"));
}

#[tokio::test]
async fn test_watcher_routes_external_change() {
    init_tracing();
    let vault = vault();
    let mut ws = CanvasWorkspace::new(vault.store.clone(), SaveSettings::default());
    let doc = ws.open(board()).unwrap();
    let watcher = FileWatcher::new(vault.root.clone()).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    external_edit(&vault, |d| {
        d.upsert_node(CanvasNode::text("n3", "synced"));
    });

    let mut updated = Vec::new();
    for _ in 0..50 {
        updated = ws.poll_watcher(&watcher).unwrap();
        if !updated.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(updated, vec![PathBuf::from("board.canvas")]);
    assert!(doc.snapshot().contains_node("n3"));
    assert_eq!(doc.phase(), DocumentPhase::Clean);
}

#[tokio::test(start_paused = true)]
async fn test_auto_save_writes_after_typing_pauses() {
    init_tracing();
    let vault = vault();
    let settings = SaveSettings {
        policy: SavePolicy {
            auto_save: true,
            ..SavePolicy::default()
        },
        auto_save_delay_ms: 2000,
        ..SaveSettings::default()
    };
    let mut ws = CanvasWorkspace::new(vault.store.clone(), settings);
    let doc = ws.open(board()).unwrap();

    let n1 = doc.snapshot().node("n1").cloned().unwrap();
    doc.start_editing("n1", n1.clone());
    let mut typed = String::new();
    for ch in "hello".chars() {
        typed.push(ch);
        doc.update_content("n1", with_text(&n1, &typed));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    doc.stop_editing("n1", true);
    assert!(doc.engine().auto_save_pending());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!doc.has_unsaved_changes());
    let on_disk = vault.store.read(board()).unwrap();
    assert_eq!(on_disk.node("n1").unwrap().text_content(), Some("hello"));
}

#[tokio::test]
async fn test_shutdown_blocked_by_host_keeps_documents_open() {
    init_tracing();

    struct Blocking;
    impl SaveHost for Blocking {
        fn on_use_remote(&self, _path: &Path, _remote: &CanvasDocument) {}

        fn confirm_shutdown<'a>(&'a self, _path: &'a Path) -> BoxFuture<'a, ShutdownChoice> {
            async { ShutdownChoice::Block }.boxed()
        }
    }

    let vault = vault();
    let mut ws = CanvasWorkspace::new(vault.store.clone(), SaveSettings::default())
        .with_host(Arc::new(Blocking));
    let doc = ws.open(board()).unwrap();
    doc.apply_change(canvas_editor::ChangeOperation::delete(
        doc.snapshot().node("n2").cloned().unwrap(),
    ));
    assert!(!doc.snapshot().contains_edge("e1"));

    assert_eq!(ws.shutdown().await.unwrap(), ShutdownOutcome::Blocked);
    assert!(ws.is_open(board()));
    assert!(doc.has_unsaved_changes());

    let on_disk = vault.store.read(board()).unwrap();
    assert!(on_disk.contains_node("n2"));
}
