// Quickstart: open a database, store documents, query them, and inspect a
// plan. Run with: cargo run -p mongolite-core --example quickstart

use bson::doc;
use mongolite_core::{Database, DatabaseConfig, IndexOptions, Result};

fn main() -> Result<()> {
    let dir = std::env::temp_dir().join("mongolite-quickstart");
    std::fs::create_dir_all(&dir)?;
    let db = Database::open(
        dir.join("quickstart.mglt"),
        DatabaseConfig {
            max_bytes: 64 << 20,
            ..DatabaseConfig::default()
        },
    )?;

    if !db.collection_exists("people")? {
        db.create_collection("people", None)?;
        db.create_index(
            "people",
            &doc! {"email": 1},
            IndexOptions {
                unique: true,
                ..IndexOptions::default()
            },
        )?;
    } else {
        db.delete_many("people", &doc! {})?;
    }

    let id = db.insert_one(
        "people",
        doc! {"name": "Alice", "email": "alice@example.com", "age": 30},
    )?;
    db.insert_many(
        "people",
        vec![
            doc! {"name": "Bob", "email": "bob@example.com", "age": 25},
            doc! {"name": "Carol", "email": "carol@example.com", "age": 35,
                  "tags": ["ops", "dev"]},
        ],
    )?;
    println!("inserted, first id = {}", id);

    let alice = db.find_one("people", &doc! {"_id": id}, None)?.unwrap();
    println!("by id: {}", alice);

    println!(
        "plan for {{email: ..}}: {}",
        db.explain("people", &doc! {"email": "bob@example.com"})?
    );

    let mut cursor = db.find("people", &doc! {"age": {"$gte": 28}})?;
    cursor.set_sort(&doc! {"age": -1})?;
    while let Some(person) = cursor.next()? {
        println!(
            "{} is {}",
            person.get_str("name").unwrap_or("?"),
            person.get_i32("age").unwrap_or(0)
        );
    }

    db.begin()?;
    db.update_one(
        "people",
        &doc! {"name": "Bob"},
        &doc! {"$inc": {"age": 1}},
    )?;
    db.rollback()?;
    println!(
        "after rollback Bob is still {}",
        db.find_one("people", &doc! {"name": "Bob"}, None)?
            .unwrap()
            .get_i32("age")
            .unwrap_or(0)
    );

    println!("stats: {}", db.stats()?);
    db.close()?;
    Ok(())
}
