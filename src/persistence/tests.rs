use super::{StoredEntry, StreamStore};
use crate::broker::group::ConsumerGroup;
use tempfile::tempdir;

fn entry(payload: &str, appended_at: i64) -> StoredEntry {
    StoredEntry {
        payload: payload.to_string(),
        appended_at,
    }
}

#[test]
fn test_store_and_load_entries_in_id_order() {
    let dir = tempdir().unwrap();
    let store = StreamStore::open(dir.path().to_str().unwrap()).unwrap();

    store.append_entry("requests", 2, &entry("b", 20)).unwrap();
    store.append_entry("requests", 1, &entry("a", 10)).unwrap();
    store.save_stream("requests", 2).unwrap();

    let streams = store.load().unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].name, "requests");
    assert_eq!(streams[0].last_id, 2);
    let ids: Vec<_> = streams[0].entries.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(streams[0].entries[0].1.payload, "a");
}

#[test]
fn test_groups_are_scoped_to_their_stream() {
    let dir = tempdir().unwrap();
    let store = StreamStore::open(dir.path().to_str().unwrap()).unwrap();

    store.save_stream("requests", 0).unwrap();
    store.save_stream("requests_archive", 0).unwrap();

    let mut group = ConsumerGroup::new("workers", 0);
    group.deliver(1, "consumer-a", 100);
    store.save_group("requests", &group).unwrap();
    store
        .save_group("requests_archive", &ConsumerGroup::new("auditors", 0))
        .unwrap();

    let streams = store.load().unwrap();
    let requests = streams.iter().find(|s| s.name == "requests").unwrap();
    assert_eq!(requests.groups, vec![group]);
    let archive = streams
        .iter()
        .find(|s| s.name == "requests_archive")
        .unwrap();
    assert_eq!(archive.groups.len(), 1);
    assert_eq!(archive.groups[0].name, "auditors");
}

#[test]
fn test_remove_entries() {
    let dir = tempdir().unwrap();
    let store = StreamStore::open(dir.path().to_str().unwrap()).unwrap();

    for id in 1..=3 {
        store
            .append_entry("replies", id, &entry(&format!("msg{id}"), 0))
            .unwrap();
    }
    store.remove_entries("replies", &[1, 2]).unwrap();

    let streams = store.load().unwrap();
    assert_eq!(streams[0].entries.len(), 1);
    assert_eq!(streams[0].entries[0].0, 3);
    assert_eq!(streams[0].last_id, 3);
}

#[test]
fn test_empty_store_loads_nothing() {
    let dir = tempdir().unwrap();
    let store = StreamStore::open(dir.path().to_str().unwrap()).unwrap();
    assert!(store.load().unwrap().is_empty());
}
