//! Connection lifecycle and on-disk durability.

use recdb_core::{
    Config, ConnectionManager, LocalStore, Mode, NewTreeNode, Payload, Record, StoreError,
    TableName, Value,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn manager(path: &Path) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(Config::at(path)).unwrap())
}

#[tokio::test]
async fn concurrent_first_requests_open_once() {
    let tmp = tempdir().unwrap();
    let manager = manager(tmp.path());

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_connection().await })
        })
        .collect();

    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.unwrap().unwrap());
    }
    assert_eq!(manager.open_attempts(), 1);
    assert!(connections.iter().all(|c| c.ptr_eq(&connections[0])));
}

#[tokio::test]
async fn records_survive_reopen() {
    let tmp = tempdir().unwrap();
    let (tree_key, data_key) = {
        let manager = manager(tmp.path());
        let store = LocalStore::new(Arc::clone(&manager));
        let node = store
            .create_data_node("take 1", None, vec![1u8, 2, 3])
            .await
            .unwrap();
        store
            .update(TableName::Tree, node.id, Record::new().with("name", "take 1 (edited)"))
            .await
            .unwrap();
        manager.close();
        (node.id, node.data_key.unwrap())
    };

    let manager = manager(tmp.path());
    let store = LocalStore::new(Arc::clone(&manager));
    let node = store.read_tree_node(tree_key).await.unwrap().unwrap();
    assert_eq!(node.name, "take 1 (edited)");
    assert_eq!(node.data_key, Some(data_key));
    assert_eq!(
        store.read(TableName::Data, data_key).await.unwrap(),
        Some(Payload::from(vec![1u8, 2, 3]))
    );

    // The key generator picks up where it left off.
    let next = store.create(TableName::Data, "more").await.unwrap();
    assert!(next > data_key);
}

#[tokio::test]
async fn fractional_gain_survives_reopen() {
    let tmp = tempdir().unwrap();
    let key = {
        let manager = manager(tmp.path());
        let store = LocalStore::new(Arc::clone(&manager));
        let gain = Record::new().with("factor", 0.5).with("maxFactor", 2.0);
        let key = store.create(TableName::Data, gain).await.unwrap();
        manager.close();
        key
    };

    let store = LocalStore::new(manager(tmp.path()));
    let Some(Payload::Structured(gain)) = store.read(TableName::Data, key).await.unwrap() else {
        panic!("gain record missing");
    };
    assert_eq!(gain.get("factor"), Some(&Value::Float(0.5)));
    assert_eq!(gain.get("maxFactor").and_then(Value::as_f64), Some(2.0));

    store
        .update(TableName::Data, key, Record::new().with("factor", 1.25))
        .await
        .unwrap();
    let Some(Payload::Structured(gain)) = store.read(TableName::Data, key).await.unwrap() else {
        panic!("gain record missing");
    };
    assert_eq!(gain.get("factor"), Some(&Value::Float(1.25)));
}

#[tokio::test]
async fn unique_index_is_rebuilt_on_reopen() {
    let tmp = tempdir().unwrap();
    {
        let manager = manager(tmp.path());
        let store = LocalStore::new(Arc::clone(&manager));
        store
            .create_tree_node(NewTreeNode::folder("a", None, 100))
            .await
            .unwrap();
        manager.close();
    }

    let store = LocalStore::new(manager(tmp.path()));
    assert!(matches!(
        store
            .create_tree_node(NewTreeNode::folder("b", None, 100))
            .await,
        Err(StoreError::AddRequest { .. })
    ));
}

#[tokio::test]
async fn cleared_tables_stay_cleared() {
    let tmp = tempdir().unwrap();
    let key = {
        let manager = manager(tmp.path());
        let store = LocalStore::new(Arc::clone(&manager));
        let key = store.create(TableName::Data, "x").await.unwrap();
        assert_eq!(store.clear_all().await.unwrap(), 2);
        manager.close();
        key
    };

    let store = LocalStore::new(manager(tmp.path()));
    assert_eq!(store.read(TableName::Data, key).await.unwrap(), None);
    assert_eq!(store.count(TableName::Data).await.unwrap(), 0);
}

#[tokio::test]
async fn abandoned_delete_agrees_with_the_log() {
    let tmp = tempdir().unwrap();
    let manager = manager(tmp.path());
    let store = LocalStore::new(Arc::clone(&manager));
    let key = store.create(TableName::Data, "x").await.unwrap();

    tokio::select! {
        biased;
        _ = store.delete(TableName::Data, key) => {}
        () = std::future::ready(()) => {}
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let live = store.read(TableName::Data, key).await.unwrap();
    manager.close();
    let reopened = store.read(TableName::Data, key).await.unwrap();
    assert_eq!(live, reopened);
}

#[tokio::test]
async fn clear_all_keeps_the_data_clear_when_the_tree_clear_fails() {
    let tmp = tempdir().unwrap();
    let manager = manager(tmp.path());
    let store = LocalStore::new(Arc::clone(&manager));
    store.create(TableName::Data, "take").await.unwrap();
    store
        .create_tree_node(NewTreeNode::folder("Unfiled", None, 1))
        .await
        .unwrap();

    // Hold the tree table so the second clear has to wait, then pull the
    // connection out from under it.
    let conn = manager.get_connection().await.unwrap();
    let reader = conn.scope(TableName::Tree, Mode::ReadOnly).await.unwrap();
    let clearing = tokio::spawn({
        let store = store.clone();
        async move { store.clear_all().await }
    });
    while store.count(TableName::Data).await.unwrap() > 0 {
        tokio::task::yield_now().await;
    }
    conn.close();
    drop(reader);

    let err = clearing.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        StoreError::ClearRequest {
            table: TableName::Tree,
            cleared: 1,
            ..
        }
    ));

    manager.close();
    assert_eq!(store.count(TableName::Data).await.unwrap(), 0);
    assert_eq!(store.count(TableName::Tree).await.unwrap(), 1);
}

#[tokio::test]
async fn second_manager_is_blocked() {
    let tmp = tempdir().unwrap();
    let first = manager(tmp.path());
    first.init().await.unwrap();

    let second = LocalStore::new(manager(tmp.path()));
    assert!(matches!(
        second.read(TableName::Tree, 1).await,
        Err(StoreError::OpenBlocked { .. })
    ));

    first.close();
    second.manager().close();
    assert_eq!(second.read(TableName::Tree, 1).await.unwrap(), None);
}

#[tokio::test]
async fn schema_version_bump_keeps_data() {
    let tmp = tempdir().unwrap();
    let key = {
        let manager = manager(tmp.path());
        let store = LocalStore::new(Arc::clone(&manager));
        let key = store.create(TableName::Data, 5i64).await.unwrap();
        manager.close();
        key
    };

    let upgraded = ConnectionManager::new(Config::at(tmp.path()).schema_version(2)).unwrap();
    let conn = upgraded.get_connection().await.unwrap();
    assert_eq!(conn.schema_version(), 2);
    let scope = conn.scope(TableName::Data, Mode::ReadOnly).await.unwrap();
    assert_eq!(
        scope.get(key).map(|stored| stored.into_payload()),
        Some(Payload::from(5i64))
    );
    drop(scope);
    upgraded.close();

    // Going back down is refused.
    let downgraded = ConnectionManager::new(Config::at(tmp.path()).schema_version(1)).unwrap();
    assert!(matches!(
        downgraded.get_connection().await,
        Err(StoreError::OpenFailed { .. })
    ));
}

#[tokio::test]
async fn torn_log_tail_is_discarded() {
    let tmp = tempdir().unwrap();
    let key = {
        let manager = manager(tmp.path());
        let store = LocalStore::new(Arc::clone(&manager));
        let key = store.create(TableName::Data, "kept").await.unwrap();
        manager.close();
        key
    };

    // Half a frame, as left behind by a crash mid-append.
    let mut file = OpenOptions::new()
        .append(true)
        .open(tmp.path().join("recdb.log"))
        .unwrap();
    file.write_all(b"RLOG\x01\x00\xff\x00\x00\x00partial").unwrap();
    drop(file);

    let store = LocalStore::new(manager(tmp.path()));
    assert_eq!(
        store.read(TableName::Data, key).await.unwrap(),
        Some(Payload::from("kept"))
    );
    let next = store.create(TableName::Data, "after").await.unwrap();
    assert_eq!(
        store.read(TableName::Data, next).await.unwrap(),
        Some(Payload::from("after"))
    );
}

#[test]
fn file_in_place_of_directory_is_unsupported() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("not-a-dir");
    std::fs::write(&path, b"").unwrap();
    assert!(matches!(
        ConnectionManager::new(Config::at(&path)),
        Err(StoreError::UnsupportedEnvironment { .. })
    ));
}
