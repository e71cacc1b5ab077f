// Integration tests for Mongolite Core
use bson::doc;
use mongolite_core::{Database, DatabaseConfig, IndexOptions, MongoliteError};
use std::collections::HashSet;
use tempfile::TempDir;

// Helper to create a test database with a small map
fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(
        temp_dir.path().join("test.mglt"),
        DatabaseConfig {
            max_bytes: 8 << 20,
            ..DatabaseConfig::default()
        },
    )
    .unwrap();
    (temp_dir, db)
}

#[test]
fn test_insert_then_find_by_id() {
    let (_temp, db) = create_test_db();
    db.create_collection("users", None).unwrap();

    let id = db
        .insert_one("users", doc! {"name": "Alice", "age": 30})
        .unwrap();
    let found = db
        .find_one("users", &doc! {"_id": id}, None)
        .unwrap()
        .expect("document should be found by _id");

    assert_eq!(found.get_str("name").unwrap(), "Alice");
    assert_eq!(found.get_i32("age").unwrap(), 30);
    assert_eq!(db.count("users", None).unwrap(), 1);
    assert_eq!(db.last_insert_id(), Some(id));
    assert_eq!(db.changes(), 1);
}

#[test]
fn test_duplicate_id_rejected() {
    let (_temp, db) = create_test_db();
    db.create_collection("users", None).unwrap();

    let id = bson::oid::ObjectId::new();
    db.insert_one("users", doc! {"_id": id, "n": 1}).unwrap();
    let err = db
        .insert_one("users", doc! {"_id": id, "n": 2})
        .unwrap_err();
    assert!(matches!(err, MongoliteError::AlreadyExists(_)));
    assert_eq!(db.count("users", None).unwrap(), 1);
}

#[test]
fn test_range_query() {
    let (_temp, db) = create_test_db();
    db.create_collection("employees", None).unwrap();

    for age in [30, 25, 35, 28, 40, 32, 27, 45] {
        db.insert_one("employees", doc! {"age": age}).unwrap();
    }

    let mut cursor = db
        .find("employees", &doc! {"age": {"$gte": 25, "$lte": 35}})
        .unwrap();
    let mut seen = 0;
    while let Some(found) = cursor.next().unwrap() {
        let age = found.get_i32("age").unwrap();
        assert!((25..=35).contains(&age));
        seen += 1;
    }
    assert_eq!(seen, 6);
    assert!(!cursor.more());
}

#[test]
fn test_delete_many_by_category() {
    let (_temp, db) = create_test_db();
    db.create_collection("items", None).unwrap();

    for i in 0..10 {
        db.insert_one("items", doc! {"category": i % 10}).unwrap();
    }

    let deleted = db.delete_many("items", &doc! {"category": 5}).unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(db.count("items", None).unwrap(), 9);
    assert!(db
        .find_one("items", &doc! {"category": 5}, None)
        .unwrap()
        .is_none());
}

#[test]
fn test_rollback_restores_dropped_collection() {
    let (_temp, db) = create_test_db();
    db.create_collection("txn_test", None).unwrap();

    db.begin().unwrap();
    db.drop_collection("txn_test").unwrap();
    db.rollback().unwrap();

    assert!(db.collection_exists("txn_test").unwrap());
}

#[test]
fn test_reopen_lists_collections() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("reopen.mglt");
    {
        let db = Database::open_default(&path).unwrap();
        db.create_collection("persistent1", None).unwrap();
        db.create_collection("persistent2", None).unwrap();
        db.close().unwrap();
    }

    let db = Database::open_default(&path).unwrap();
    let names: HashSet<String> = db.list_collections().unwrap().into_iter().collect();
    assert_eq!(
        names,
        HashSet::from(["persistent1".to_string(), "persistent2".to_string()])
    );
}

#[test]
fn test_unique_index_rejects_duplicate() {
    let (_temp, db) = create_test_db();
    db.create_collection("u", None).unwrap();
    db.create_index(
        "u",
        &doc! {"email": 1},
        IndexOptions {
            unique: true,
            ..IndexOptions::default()
        },
    )
    .unwrap();

    db.insert_one("u", doc! {"email": "a@x"}).unwrap();
    let err = db.insert_one("u", doc! {"email": "a@x"}).unwrap_err();
    assert!(matches!(err, MongoliteError::Index(_)));
    assert_eq!(db.count("u", None).unwrap(), 1);
}

#[test]
fn test_skip_and_limit() {
    let (_temp, db) = create_test_db();
    db.create_collection("c", None).unwrap();

    for i in 0..10 {
        db.insert_one("c", doc! {"index": i}).unwrap();
    }

    let mut cursor = db.find("c", &doc! {}).unwrap();
    cursor.set_skip(3).unwrap();
    cursor.set_limit(4).unwrap();

    let mut emitted = 0;
    while let Some(_doc) = cursor.next().unwrap() {
        emitted += 1;
    }
    assert_eq!(emitted, 4);
}

#[test]
fn test_skip_limit_composition_on_sorted_field() {
    let (_temp, db) = create_test_db();
    db.create_collection("c", None).unwrap();
    for i in 0..10 {
        db.insert_one("c", doc! {"i": i}).unwrap();
    }

    let mut cursor = db.find("c", &doc! {}).unwrap();
    cursor.set_sort(&doc! {"i": 1}).unwrap();
    cursor.set_skip(2).unwrap();
    cursor.set_limit(3).unwrap();

    let mut got = Vec::new();
    while let Some(found) = cursor.next().unwrap() {
        got.push(found.get_i32("i").unwrap());
    }
    assert_eq!(got, vec![2, 3, 4]);
}

#[test]
fn test_sort_descending() {
    let (_temp, db) = create_test_db();
    db.create_collection("s", None).unwrap();
    for age in [31, 29, 35, 22] {
        db.insert_one("s", doc! {"age": age}).unwrap();
    }

    let mut cursor = db.find("s", &doc! {}).unwrap();
    cursor.set_sort(&doc! {"age": -1}).unwrap();
    let mut ages = Vec::new();
    while let Some(found) = cursor.next().unwrap() {
        ages.push(found.get_i32("age").unwrap());
    }
    assert_eq!(ages, vec![35, 31, 29, 22]);
}

#[test]
fn test_projection_via_cursor_and_find_one() {
    let (_temp, db) = create_test_db();
    db.create_collection("p", None).unwrap();
    db.insert_one("p", doc! {"name": "Alice", "age": 30, "city": "Pécs"})
        .unwrap();

    let found = db
        .find_one("p", &doc! {}, Some(&doc! {"name": 1}))
        .unwrap()
        .unwrap();
    assert!(found.get("name").is_some());
    assert!(found.get("_id").is_some());
    assert!(found.get("age").is_none());

    let mut cursor = db.find("p", &doc! {}).unwrap();
    cursor.set_projection(&doc! {"city": 0, "_id": 0}).unwrap();
    let found = cursor.next().unwrap().unwrap();
    assert!(found.get("city").is_none());
    assert!(found.get("_id").is_none());
    assert!(found.get("name").is_some());
}

#[test]
fn test_find_with_options() {
    use mongolite_core::FindOptions;

    let (_temp, db) = create_test_db();
    db.create_collection("fo", None).unwrap();
    for i in 0..8 {
        db.insert_one("fo", doc! {"i": i, "extra": "x"}).unwrap();
    }

    let options = FindOptions::new()
        .with_sort(vec![("i".to_string(), -1)])
        .with_skip(1)
        .with_limit(3)
        .with_projection(doc! {"i": 1, "_id": 0});
    let mut cursor = db.find_with_options("fo", &doc! {}, options).unwrap();

    let mut got = Vec::new();
    while let Some(found) = cursor.next().unwrap() {
        assert!(found.get("_id").is_none());
        assert!(found.get("extra").is_none());
        got.push(found.get_i32("i").unwrap());
    }
    assert_eq!(got, vec![6, 5, 4]);
}

#[test]
fn test_cursor_setters_rejected_after_first_next() {
    let (_temp, db) = create_test_db();
    db.create_collection("c", None).unwrap();
    db.insert_one("c", doc! {"x": 1}).unwrap();
    db.insert_one("c", doc! {"x": 2}).unwrap();

    let mut cursor = db.find("c", &doc! {}).unwrap();
    assert!(cursor.next().unwrap().is_some());
    assert!(matches!(
        cursor.set_skip(1),
        Err(MongoliteError::InvalidArgument(_))
    ));
    assert!(matches!(
        cursor.set_limit(1),
        Err(MongoliteError::InvalidArgument(_))
    ));
    assert!(matches!(
        cursor.set_sort(&doc! {"x": 1}),
        Err(MongoliteError::InvalidArgument(_))
    ));
    // Iteration still works after the rejected setters.
    assert!(cursor.next().unwrap().is_some());
    assert!(cursor.next().unwrap().is_none());
    assert!(!cursor.more());
}

#[test]
fn test_empty_collection_behaviors() {
    let (_temp, db) = create_test_db();
    db.create_collection("empty", None).unwrap();

    assert!(db.find_one("empty", &doc! {}, None).unwrap().is_none());
    assert_eq!(db.count("empty", None).unwrap(), 0);
    let mut cursor = db.find("empty", &doc! {}).unwrap();
    assert!(cursor.next().unwrap().is_none());
}

#[test]
fn test_missing_collection_behaviors() {
    let (_temp, db) = create_test_db();

    assert!(matches!(
        db.insert_one("ghosts", doc! {"x": 1}),
        Err(MongoliteError::NotFound(_))
    ));
    assert!(matches!(
        db.delete_one("ghosts", &doc! {}),
        Err(MongoliteError::NotFound(_))
    ));
    assert!(matches!(
        db.find("ghosts", &doc! {}),
        Err(MongoliteError::NotFound(_))
    ));
    assert!(db.list_collections().unwrap().is_empty());
}

#[test]
fn test_delete_one_fast_path_and_miss() {
    let (_temp, db) = create_test_db();
    db.create_collection("d", None).unwrap();
    let id = db.insert_one("d", doc! {"x": 1}).unwrap();

    // Miss: deleting a non-matching filter is success with 0 removed.
    assert_eq!(
        db.delete_one("d", &doc! {"_id": bson::oid::ObjectId::new()})
            .unwrap(),
        0
    );
    assert_eq!(db.delete_one("d", &doc! {"_id": id}).unwrap(), 1);
    assert_eq!(db.count("d", None).unwrap(), 0);
    // Idempotent second delete.
    assert_eq!(db.delete_one("d", &doc! {"_id": id}).unwrap(), 0);
}

#[test]
fn test_text_round_trip() {
    let (_temp, db) = create_test_db();
    db.create_collection("t", None).unwrap();

    let id = db
        .insert_one_text("t", r#"{"name": "Ágnes", "score": 9.5, "tags": ["a", "b"]}"#)
        .unwrap();

    let filter = format!(r#"{{"_id": {{"$oid": "{}"}}}}"#, id.to_hex());
    let rendered = db.find_one_text("t", &filter).unwrap().unwrap();

    // The rendered text re-parses to a semantically equal document.
    let reparsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(reparsed["name"], "Ágnes");
    assert_eq!(reparsed["score"], 9.5);
    assert_eq!(reparsed["tags"], serde_json::json!(["a", "b"]));
}

#[test]
fn test_extended_json_types_round_trip() {
    let (_temp, db) = create_test_db();
    db.create_collection("ext_json", None).unwrap();

    // Extended JSON in, typed BSON stored.
    let id = bson::oid::ObjectId::new();
    let json = format!(
        r#"{{"_id": {{"$oid": "{}"}}, "born": {{"$date": "2020-05-01T12:00:00Z"}}, "big": {{"$numberLong": "9007199254740993"}}}}"#,
        id.to_hex()
    );
    db.insert_one_text("ext_json", &json).unwrap();

    let found = db
        .find_one("ext_json", &doc! {"_id": id}, None)
        .unwrap()
        .unwrap();
    assert_eq!(found.get_object_id("_id").unwrap(), id);
    assert!(found.get_datetime("born").is_ok());
    assert_eq!(found.get_i64("big").unwrap(), 9_007_199_254_740_993);
}

#[test]
fn test_insert_many_text() {
    let (_temp, db) = create_test_db();
    db.create_collection("jt", None).unwrap();

    let result = db
        .insert_many_text(
            "jt",
            &[r#"{"n": 1}"#, r#"{"n": 2}"#, r#"{"n": 3}"#],
        )
        .unwrap();
    assert_eq!(result.inserted_ids.len(), 3);
    assert_eq!(db.count("jt", None).unwrap(), 3);

    // A malformed element fails the whole batch before anything is written.
    let err = db
        .insert_many_text("jt", &[r#"{"n": 4}"#, "not json"])
        .unwrap_err();
    assert!(matches!(err, MongoliteError::Validation(_)));
    assert_eq!(db.count("jt", None).unwrap(), 3);
}

#[test]
fn test_insert_many_all_or_nothing() {
    let (_temp, db) = create_test_db();
    db.create_collection("batch", None).unwrap();

    let shared = bson::oid::ObjectId::new();
    let result = db.insert_many(
        "batch",
        vec![
            doc! {"n": 0},
            doc! {"_id": shared, "n": 1},
            doc! {"_id": shared, "n": 2}, // duplicate _id fails the batch
        ],
    );
    let err = result.unwrap_err();
    assert!(matches!(err, MongoliteError::AlreadyExists(_)));
    assert!(err.to_string().contains("index 2"));
    assert_eq!(db.count("batch", None).unwrap(), 0);

    let result = db
        .insert_many("batch", vec![doc! {"n": 1}, doc! {"n": 2}])
        .unwrap();
    assert_eq!(result.inserted_ids.len(), 2);
    assert_eq!(db.count("batch", None).unwrap(), 2);
    assert_eq!(db.changes(), 2);
}

#[test]
fn test_explicit_transaction_batches_inserts() {
    let (_temp, db) = create_test_db();
    db.create_collection("txn", None).unwrap();

    db.begin().unwrap();
    db.insert_one("txn", doc! {"n": 1}).unwrap();
    db.insert_one("txn", doc! {"n": 2}).unwrap();
    // Uncommitted writes are visible inside the transaction.
    assert_eq!(db.count("txn", None).unwrap(), 2);
    db.commit().unwrap();
    assert_eq!(db.count("txn", None).unwrap(), 2);

    db.begin().unwrap();
    db.insert_one("txn", doc! {"n": 3}).unwrap();
    db.rollback().unwrap();
    assert_eq!(db.count("txn", None).unwrap(), 2);
}

#[test]
fn test_durability_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("durable.mglt");
    let id;
    {
        let db = Database::open_default(&path).unwrap();
        db.create_collection("users", None).unwrap();
        id = db.insert_one("users", doc! {"name": "Alice"}).unwrap();

        // An uncommitted transaction must not survive.
        db.begin().unwrap();
        db.insert_one("users", doc! {"name": "ghost"}).unwrap();
        drop(db); // close with the transaction still open
    }

    let db = Database::open_default(&path).unwrap();
    assert_eq!(db.count("users", None).unwrap(), 1);
    let found = db.find_one("users", &doc! {"_id": id}, None).unwrap();
    assert_eq!(found.unwrap().get_str("name").unwrap(), "Alice");
    assert!(db
        .find_one("users", &doc! {"name": "ghost"}, None)
        .unwrap()
        .is_none());
}

#[test]
fn test_update_one_with_operators() {
    let (_temp, db) = create_test_db();
    db.create_collection("u", None).unwrap();
    let id = db
        .insert_one("u", doc! {"name": "Alice", "visits": 1})
        .unwrap();

    let modified = db
        .update_one(
            "u",
            &doc! {"_id": id},
            &doc! {"$set": {"name": "Alfréd"}, "$inc": {"visits": 2}},
        )
        .unwrap();
    assert_eq!(modified, 1);

    let found = db.find_one("u", &doc! {"_id": id}, None).unwrap().unwrap();
    assert_eq!(found.get_str("name").unwrap(), "Alfréd");
    assert_eq!(found.get_i64("visits").unwrap(), 3);
    assert_eq!(db.count("u", None).unwrap(), 1);

    // No match leaves everything untouched.
    assert_eq!(
        db.update_one("u", &doc! {"name": "nobody"}, &doc! {"$set": {"x": 1}})
            .unwrap(),
        0
    );
}

#[test]
fn test_update_many() {
    let (_temp, db) = create_test_db();
    db.create_collection("um", None).unwrap();
    for i in 0..10 {
        db.insert_one("um", doc! {"group": i % 2, "hits": 0})
            .unwrap();
    }

    let modified = db
        .update_many("um", &doc! {"group": 1}, &doc! {"$inc": {"hits": 1}})
        .unwrap();
    assert_eq!(modified, 5);
    assert_eq!(db.count("um", Some(&doc! {"hits": 1})).unwrap(), 5);
    assert_eq!(db.count("um", Some(&doc! {"hits": 0})).unwrap(), 5);

    // No matches touches nothing.
    assert_eq!(
        db.update_many("um", &doc! {"group": 9}, &doc! {"$set": {"x": 1}})
            .unwrap(),
        0
    );
}

#[test]
fn test_non_objectid_user_id_preserved() {
    let (_temp, db) = create_test_db();
    db.create_collection("ext", None).unwrap();

    db.insert_one("ext", doc! {"_id": "user-42", "name": "X"})
        .unwrap();
    // Findable through the matcher path even though the key is a surrogate.
    let found = db
        .find_one("ext", &doc! {"_id": "user-42"}, None)
        .unwrap()
        .unwrap();
    assert_eq!(found.get_str("name").unwrap(), "X");
    assert_eq!(found.get_str("_id").unwrap(), "user-42");
    assert_eq!(db.count("ext", None).unwrap(), 1);
}

#[test]
fn test_cursor_snapshot_isolated_from_later_writes() {
    let (_temp, db) = create_test_db();
    db.create_collection("snap", None).unwrap();
    for i in 0..5 {
        db.insert_one("snap", doc! {"i": i}).unwrap();
    }

    let mut cursor = db.find("snap", &doc! {}).unwrap();
    assert!(cursor.next().unwrap().is_some());

    // Writes after the cursor opened are invisible to it.
    for i in 5..10 {
        db.insert_one("snap", doc! {"i": i}).unwrap();
    }
    let mut remaining = 0;
    while cursor.next().unwrap().is_some() {
        remaining += 1;
    }
    assert_eq!(remaining, 4);
    assert_eq!(db.count("snap", None).unwrap(), 10);
}

#[test]
fn test_resize_past_initial_map() {
    let temp_dir = TempDir::new().unwrap();
    // Deliberately tiny map: half a megabyte.
    let db = Database::open(
        temp_dir.path().join("tiny.mglt"),
        DatabaseConfig {
            max_bytes: 512 * 1024,
            ..DatabaseConfig::default()
        },
    )
    .unwrap();
    db.create_collection("big", None).unwrap();

    let payload = "x".repeat(8 * 1024);
    for i in 0..128 {
        db.insert_one("big", doc! {"i": i, "payload": payload.as_str()})
            .unwrap();
    }
    assert_eq!(db.count("big", None).unwrap(), 128);

    // Every earlier document is still readable after the auto-resizes.
    let found = db.find_one("big", &doc! {"i": 0}, None).unwrap().unwrap();
    assert_eq!(found.get_str("payload").unwrap().len(), 8 * 1024);
}

#[test]
fn test_threaded_inserts_serialize() {
    use std::sync::Arc;

    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(
        Database::open(
            temp_dir.path().join("mt.mglt"),
            DatabaseConfig {
                max_bytes: 8 << 20,
                ..DatabaseConfig::default()
            },
        )
        .unwrap(),
    );
    db.create_collection("mt", None).unwrap();

    let mut handles = Vec::new();
    for t in 0..4 {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            for i in 0..25 {
                db.insert_one("mt", doc! {"thread": t, "i": i}).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.count("mt", None).unwrap(), 100);
    let mut cursor = db.find("mt", &doc! {}).unwrap();
    let mut ids: HashSet<String> = HashSet::new();
    while let Some(found) = cursor.next().unwrap() {
        ids.insert(found.get_object_id("_id").unwrap().to_hex());
    }
    assert_eq!(ids.len(), 100);
}
