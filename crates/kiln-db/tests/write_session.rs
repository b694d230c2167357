//! Transactions through the store's write session.

use kiln_core::EntityType;
use kiln_db::repos::{entities, staging};
use kiln_db::{ImportStore, NewEntity};
use pretty_assertions::assert_eq;

fn item(external_id: u64) -> NewEntity {
    NewEntity {
        external_id: Some(external_id),
        name: Some(format!("Item {external_id}")),
        ..NewEntity::new(EntityType::Item)
    }
}

#[tokio::test]
async fn committed_writes_are_visible() {
    let store = ImportStore::open_in_memory().await.unwrap();
    {
        let session = store.write_session().await;
        let tx = session.transaction().await.unwrap();
        entities::insert(&tx, &item(1)).await.unwrap();
        tx.commit().await.unwrap();
    }
    assert!(store.entity_by_external_id(EntityType::Item, 1).await.unwrap().is_some());
}

#[tokio::test]
async fn rolled_back_writes_leave_no_trace() {
    let store = ImportStore::open_in_memory().await.unwrap();
    {
        let session = store.write_session().await;
        let tx = session.transaction().await.unwrap();
        entities::insert(&tx, &item(1)).await.unwrap();
        entities::insert(&tx, &item(2)).await.unwrap();
        tx.rollback().await.unwrap();
    }
    assert_eq!(store.count_entities(None).await.unwrap(), 0);
}

#[tokio::test]
async fn file_backed_store_persists_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiln.db");
    let path = path.to_str().unwrap();
    {
        let store = ImportStore::open(path).await.unwrap();
        let session = store.write_session().await;
        entities::insert(session.conn(), &item(7)).await.unwrap();
    }
    let store = ImportStore::open(path).await.unwrap();
    let entity = store
        .entity_by_external_id(EntityType::Item, 7)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entity.name.as_deref(), Some("Item 7"));
}

#[tokio::test]
async fn second_open_keeps_claims_of_a_running_importer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiln.db");
    let path = path.to_str().unwrap();

    let running = ImportStore::open(path).await.unwrap();
    let session = running.write_session().await;
    assert!(
        staging::claim(session.conn(), EntityType::Monster, "bouftou")
            .await
            .unwrap()
    );

    let other = ImportStore::open(path).await.unwrap();
    assert_eq!(staging::count(other.db().conn()).await.unwrap(), 1);
    let other_session = other.write_session().await;
    assert!(
        !staging::claim(other_session.conn(), EntityType::Monster, "bouftou")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn read_only_store_reads_but_never_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiln.db");
    let path = path.to_str().unwrap();
    {
        let store = ImportStore::open(path).await.unwrap();
        let session = store.write_session().await;
        entities::insert(session.conn(), &item(3)).await.unwrap();
        staging::claim(session.conn(), EntityType::Item, "item 3")
            .await
            .unwrap();
        drop(session);
        store
            .record_category_sighting(EntityType::Item, 82)
            .await
            .unwrap();
    }

    let store = ImportStore::open_read_only(path).await.unwrap();
    assert!(store.db().is_read_only());
    assert_eq!(store.count_entities(None).await.unwrap(), 1);
    assert_eq!(store.type_decision(82).await.unwrap().unwrap().seen_count, 1);
    assert_eq!(staging::count(store.db().conn()).await.unwrap(), 1);
    assert!(
        store
            .record_category_sighting(EntityType::Item, 82)
            .await
            .is_err()
    );
    assert_eq!(store.type_decision(82).await.unwrap().unwrap().seen_count, 1);
}

#[tokio::test]
async fn read_only_open_of_a_missing_file_fails_without_creating_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.db");
    assert!(ImportStore::open_read_only(path.to_str().unwrap()).await.is_err());
    assert!(!path.exists());
}
