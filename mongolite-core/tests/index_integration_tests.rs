// Index integration tests: soundness of maintenance across mutations,
// sparse and multikey behavior, and plan/scan result equivalence.
use bson::doc;
use mongolite_core::{Database, DatabaseConfig, IndexOptions, MongoliteError, QueryPlan, QueryPlanner};
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(
        temp_dir.path().join("index.mglt"),
        DatabaseConfig {
            max_bytes: 8 << 20,
            ..DatabaseConfig::default()
        },
    )
    .unwrap();
    (temp_dir, db)
}

fn collect_field(db: &Database, coll: &str, filter: bson::Document, field: &str) -> Vec<i32> {
    let mut cursor = db.find(coll, &filter).unwrap();
    let mut values = Vec::new();
    while let Some(found) = cursor.next().unwrap() {
        values.push(found.get_i32(field).unwrap());
    }
    values.sort_unstable();
    values
}

#[test]
fn test_index_used_for_equality_and_results_match_scan() {
    let (_temp, db) = create_test_db();
    db.create_collection("users", None).unwrap();

    for i in 0..50 {
        db.insert_one("users", doc! {"city": format!("city{}", i % 5), "i": i})
            .unwrap();
    }

    // Scan results before the index exists.
    let before = collect_field(&db, "users", doc! {"city": "city3"}, "i");
    assert_eq!(before.len(), 10);

    db.create_index("users", &doc! {"city": 1}, IndexOptions::default())
        .unwrap();

    // The planner now picks the index for this filter.
    let indexes = db.list_indexes("users").unwrap();
    assert!(matches!(
        QueryPlanner::plan(&doc! {"city": "city3"}, &indexes),
        QueryPlan::IndexScan { .. }
    ));

    // Identical results with the index present.
    let after = collect_field(&db, "users", doc! {"city": "city3"}, "i");
    assert_eq!(before, after);
}

#[test]
fn test_index_build_on_populated_collection() {
    let (_temp, db) = create_test_db();
    db.create_collection("pre", None).unwrap();
    for i in 0..20 {
        db.insert_one("pre", doc! {"score": i}).unwrap();
    }

    db.create_index("pre", &doc! {"score": 1}, IndexOptions::default())
        .unwrap();
    let found = db
        .find_one("pre", &doc! {"score": 13}, None)
        .unwrap()
        .unwrap();
    assert_eq!(found.get_i32("score").unwrap(), 13);
}

#[test]
fn test_unique_build_fails_on_existing_duplicates() {
    let (_temp, db) = create_test_db();
    db.create_collection("dups", None).unwrap();
    db.insert_one("dups", doc! {"email": "same@x"}).unwrap();
    db.insert_one("dups", doc! {"email": "same@x"}).unwrap();

    let err = db
        .create_index(
            "dups",
            &doc! {"email": 1},
            IndexOptions {
                unique: true,
                ..IndexOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, MongoliteError::Index(_)));
    // The failed build leaves no index behind.
    assert!(db.list_indexes("dups").unwrap().is_empty());
}

#[test]
fn test_index_maintained_across_update_and_delete() {
    let (_temp, db) = create_test_db();
    db.create_collection("m", None).unwrap();
    db.create_index("m", &doc! {"tag": 1}, IndexOptions::default())
        .unwrap();

    let id = db.insert_one("m", doc! {"tag": "old", "k": 1}).unwrap();
    db.insert_one("m", doc! {"tag": "other", "k": 2}).unwrap();

    // Update moves the document from one index key to another.
    db.update_one("m", &doc! {"_id": id}, &doc! {"$set": {"tag": "new"}})
        .unwrap();
    assert!(db
        .find_one("m", &doc! {"tag": "old"}, None)
        .unwrap()
        .is_none());
    let found = db.find_one("m", &doc! {"tag": "new"}, None).unwrap().unwrap();
    assert_eq!(found.get_i32("k").unwrap(), 1);

    // Delete removes the entry.
    db.delete_one("m", &doc! {"_id": id}).unwrap();
    assert!(db
        .find_one("m", &doc! {"tag": "new"}, None)
        .unwrap()
        .is_none());
    // The other document is untouched.
    assert!(db
        .find_one("m", &doc! {"tag": "other"}, None)
        .unwrap()
        .is_some());
}

#[test]
fn test_sparse_index_skips_missing_but_scan_finds() {
    let (_temp, db) = create_test_db();
    db.create_collection("sparse", None).unwrap();
    db.create_index(
        "sparse",
        &doc! {"nick": 1},
        IndexOptions {
            sparse: true,
            ..IndexOptions::default()
        },
    )
    .unwrap();

    db.insert_one("sparse", doc! {"name": "no-nick"}).unwrap();
    db.insert_one("sparse", doc! {"name": "with", "nick": "w"})
        .unwrap();

    // The nickless document is still reachable by full scan.
    let found = db
        .find_one("sparse", &doc! {"name": "no-nick"}, None)
        .unwrap();
    assert!(found.is_some());

    // Unique sparse: two missing-field documents do not conflict.
    db.create_index(
        "sparse",
        &doc! {"email": 1},
        IndexOptions {
            unique: true,
            sparse: true,
            ..IndexOptions::default()
        },
    )
    .unwrap();
    db.insert_one("sparse", doc! {"name": "a"}).unwrap();
    db.insert_one("sparse", doc! {"name": "b"}).unwrap();
}

#[test]
fn test_non_sparse_unique_conflicts_on_missing() {
    let (_temp, db) = create_test_db();
    db.create_collection("ns", None).unwrap();
    db.create_index(
        "ns",
        &doc! {"email": 1},
        IndexOptions {
            unique: true,
            ..IndexOptions::default()
        },
    )
    .unwrap();

    // Both documents extract the missing marker; the second conflicts.
    db.insert_one("ns", doc! {"name": "a"}).unwrap();
    let err = db.insert_one("ns", doc! {"name": "b"}).unwrap_err();
    assert!(matches!(err, MongoliteError::Index(_)));
}

#[test]
fn test_multikey_array_index() {
    let (_temp, db) = create_test_db();
    db.create_collection("mk", None).unwrap();
    db.create_index("mk", &doc! {"tags": 1}, IndexOptions::default())
        .unwrap();

    db.insert_one("mk", doc! {"tags": ["rust", "db"], "n": 1})
        .unwrap();
    db.insert_one("mk", doc! {"tags": ["go"], "n": 2}).unwrap();

    // Equality on one element probes the per-element entries.
    let found = db
        .find_one("mk", &doc! {"tags": "rust"}, None)
        .unwrap()
        .unwrap();
    assert_eq!(found.get_i32("n").unwrap(), 1);

    // Removing the document removes every element entry.
    db.delete_one("mk", &doc! {"n": 1}).unwrap();
    assert!(db
        .find_one("mk", &doc! {"tags": "db"}, None)
        .unwrap()
        .is_none());
}

#[test]
fn test_compound_index_selected_for_full_equality() {
    let (_temp, db) = create_test_db();
    db.create_collection("geo", None).unwrap();
    db.create_index("geo", &doc! {"country": 1, "city": -1}, IndexOptions::default())
        .unwrap();

    for (country, city, n) in [
        ("HU", "Pécs", 1),
        ("HU", "Győr", 2),
        ("AT", "Graz", 3),
        ("HU", "Pécs", 4),
    ] {
        db.insert_one("geo", doc! {"country": country, "city": city, "n": n})
            .unwrap();
    }

    let indexes = db.list_indexes("geo").unwrap();
    assert_eq!(indexes[0].name, "country_1_city_-1");
    assert!(matches!(
        QueryPlanner::plan(&doc! {"country": "HU", "city": "Pécs"}, &indexes),
        QueryPlan::IndexScan { .. }
    ));

    let values = collect_field(&db, "geo", doc! {"country": "HU", "city": "Pécs"}, "n");
    assert_eq!(values, vec![1, 4]);
}

#[test]
fn test_drop_index_falls_back_to_scan() {
    let (_temp, db) = create_test_db();
    db.create_collection("fb", None).unwrap();
    db.create_index("fb", &doc! {"k": 1}, IndexOptions::default())
        .unwrap();
    for i in 0..10 {
        db.insert_one("fb", doc! {"k": i % 3, "i": i}).unwrap();
    }

    let with_index = collect_field(&db, "fb", doc! {"k": 1}, "i");
    db.drop_index("fb", "k_1").unwrap();
    let without_index = collect_field(&db, "fb", doc! {"k": 1}, "i");
    assert_eq!(with_index, without_index);

    let indexes = db.list_indexes("fb").unwrap();
    assert!(matches!(
        QueryPlanner::plan(&doc! {"k": 1}, &indexes),
        QueryPlan::CollectionScan
    ));
}

#[test]
fn test_named_index_and_descriptor_listing() {
    let (_temp, db) = create_test_db();
    db.create_collection("named", None).unwrap();
    let name = db
        .create_index(
            "named",
            &doc! {"a": 1, "b": -1},
            IndexOptions {
                name: Some("custom_name".to_string()),
                unique: false,
                sparse: true,
            },
        )
        .unwrap();
    assert_eq!(name, "custom_name");

    let indexes = db.list_indexes("named").unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].name, "custom_name");
    assert!(indexes[0].sparse);
    assert_eq!(
        indexes[0].spec.fields,
        vec![("a".to_string(), 1), ("b".to_string(), -1)]
    );
}

#[test]
fn test_indexes_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("persist_idx.mglt");
    {
        let db = Database::open_default(&path).unwrap();
        db.create_collection("p", None).unwrap();
        db.create_index(
            "p",
            &doc! {"email": 1},
            IndexOptions {
                unique: true,
                ..IndexOptions::default()
            },
        )
        .unwrap();
        db.insert_one("p", doc! {"email": "a@x"}).unwrap();
        db.close().unwrap();
    }

    let db = Database::open_default(&path).unwrap();
    let indexes = db.list_indexes("p").unwrap();
    assert_eq!(indexes.len(), 1);
    assert!(indexes[0].unique);

    // Unique enforcement still applies after reopen.
    let err = db.insert_one("p", doc! {"email": "a@x"}).unwrap_err();
    assert!(matches!(err, MongoliteError::Index(_)));
}

#[test]
fn test_explain_reports_plan() {
    let (_temp, db) = create_test_db();
    db.create_collection("ex", None).unwrap();
    db.create_index("ex", &doc! {"email": 1}, IndexOptions::default())
        .unwrap();

    let plan = db.explain("ex", &doc! {"email": "a@x"}).unwrap();
    assert_eq!(plan.get_str("queryPlan").unwrap(), "IndexScan");
    assert_eq!(plan.get_str("indexUsed").unwrap(), "email_1");

    let plan = db.explain("ex", &doc! {"age": {"$gt": 1}}).unwrap();
    assert_eq!(plan.get_str("queryPlan").unwrap(), "CollectionScan");

    let plan = db
        .explain("ex", &doc! {"_id": bson::oid::ObjectId::new()})
        .unwrap();
    assert_eq!(plan.get_str("queryPlan").unwrap(), "IdLookup");

    assert!(matches!(
        db.explain("ghost", &doc! {}),
        Err(MongoliteError::NotFound(_))
    ));
}

#[test]
fn test_drop_collection_removes_indexes() {
    let (_temp, db) = create_test_db();
    db.create_collection("gone", None).unwrap();
    db.create_index("gone", &doc! {"x": 1}, IndexOptions::default())
        .unwrap();
    db.drop_collection("gone").unwrap();

    // Recreating the collection starts with a clean index set.
    db.create_collection("gone", None).unwrap();
    assert!(db.list_indexes("gone").unwrap().is_empty());
}
