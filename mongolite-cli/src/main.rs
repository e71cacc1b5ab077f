use anyhow::{bail, Context, Result};
use bson::{Bson, Document};
use clap::{Parser, Subcommand};
use mongolite_core::{Database, DatabaseConfig, FindOptions, IndexOptions};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mongolite")]
#[command(about = "Mongolite CLI - command-line interface for the Mongolite database")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import data from a JSON file into the database
    Import {
        /// JSON file to import: { "collection": [documents...], ... }
        file: PathBuf,
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
    },
    /// Export the database (or one collection) to a JSON file
    Export {
        /// Output JSON file
        file: PathBuf,
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
        /// Export only this collection
        #[arg(long)]
        collection: Option<String>,
    },
    /// List collections and their document counts
    List {
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
    },
    /// Run a filter against a collection and print matches as JSON lines
    Find {
        /// Collection name
        collection: String,
        /// Filter document as JSON (default: match everything)
        #[arg(default_value = "{}")]
        filter: String,
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
        #[arg(long)]
        skip: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        /// Sort specification as JSON, e.g. '{"age": -1}'
        #[arg(long)]
        sort: Option<String>,
        /// Print the query plan instead of running the query
        #[arg(long)]
        explain: bool,
    },
    /// Count documents matching a filter
    Count {
        /// Collection name
        collection: String,
        /// Filter document as JSON (default: match everything)
        #[arg(default_value = "{}")]
        filter: String,
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
    },
    /// Delete documents matching a filter
    Delete {
        /// Collection name
        collection: String,
        /// Filter document as JSON
        filter: String,
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
    },
    /// Drop a collection
    Drop {
        /// Collection name
        collection: String,
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
    },
    /// Index management commands
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Create an index, e.g.: index create users '{"email": 1}' --unique
    Create {
        /// Collection name
        collection: String,
        /// Key specification as JSON
        keys: String,
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        unique: bool,
        #[arg(long)]
        sparse: bool,
    },
    /// Drop an index by name
    Drop {
        /// Collection name
        collection: String,
        /// Index name
        name: String,
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
    },
    /// List indexes of a collection
    List {
        /// Collection name
        collection: String,
        /// Database file path
        #[arg(long, default_value = "mongolite.mglt")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Import { file, db } => import_data(&file, &db),
        Commands::Export {
            file,
            db,
            collection,
        } => export_data(&file, &db, collection.as_deref()),
        Commands::List { db } => list_collections(&db),
        Commands::Find {
            collection,
            filter,
            db,
            skip,
            limit,
            sort,
            explain,
        } => find(&db, &collection, &filter, skip, limit, sort.as_deref(), explain),
        Commands::Count {
            collection,
            filter,
            db,
        } => count(&db, &collection, &filter),
        Commands::Delete {
            collection,
            filter,
            db,
        } => delete(&db, &collection, &filter),
        Commands::Drop { collection, db } => drop_collection(&db, &collection),
        Commands::Index { action } => match action {
            IndexAction::Create {
                collection,
                keys,
                db,
                name,
                unique,
                sparse,
            } => create_index(&db, &collection, &keys, name, unique, sparse),
            IndexAction::Drop {
                collection,
                name,
                db,
            } => drop_index(&db, &collection, &name),
            IndexAction::List { collection, db } => list_indexes(&db, &collection),
        },
    }
}

fn open_db(path: &Path) -> Result<Database> {
    Database::open(path, DatabaseConfig::default())
        .with_context(|| format!("failed to open database: {}", path.display()))
}

/// Parse a CLI JSON argument into a BSON document (extended JSON accepted).
fn parse_doc(json: &str) -> Result<Document> {
    let value: Value =
        serde_json::from_str(json).with_context(|| format!("invalid JSON: {}", json))?;
    match Bson::try_from(value).context("JSON does not map to BSON")? {
        Bson::Document(doc) => Ok(doc),
        other => bail!("expected a JSON object, got {}", other),
    }
}

fn to_json(doc: Document) -> String {
    Bson::Document(doc).into_relaxed_extjson().to_string()
}

/// Import data from a JSON file.
/// Format: { "collection_name": [documents...], ... }
fn import_data(file: &Path, db_path: &Path) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("failed to read file: {}", file.display()))?;
    let data: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON in file: {}", file.display()))?;

    let db = open_db(db_path)?;
    let mut total_docs = 0usize;

    for (collection_name, documents) in data {
        let docs = documents
            .as_array()
            .with_context(|| format!("collection '{}' must be an array", collection_name))?;

        if !db.collection_exists(&collection_name)? {
            db.create_collection(&collection_name, None)?;
        }

        let strings: Vec<String> = docs.iter().map(|d| d.to_string()).collect();
        let refs: Vec<&str> = strings.iter().map(|s| s.as_str()).collect();
        let result = db
            .insert_many_text(&collection_name, &refs)
            .with_context(|| format!("import into '{}' failed", collection_name))?;
        println!(
            "  {}: {} documents",
            collection_name,
            result.inserted_ids.len()
        );
        total_docs += result.inserted_ids.len();
    }

    db.close()?;
    println!("imported {} documents into {}", total_docs, db_path.display());
    Ok(())
}

/// Export collections to a JSON file in the import format.
fn export_data(file: &Path, db_path: &Path, only: Option<&str>) -> Result<()> {
    let db = open_db(db_path)?;
    let names = match only {
        Some(name) => vec![name.to_string()],
        None => db.list_collections()?,
    };

    let mut out = Map::new();
    let mut total_docs = 0usize;
    for name in names {
        let mut docs = Vec::new();
        let mut cursor = db.find(&name, &bson::doc! {})?;
        while let Some(found) = cursor.next()? {
            docs.push(serde_json::from_str::<Value>(&to_json(found))?);
        }
        total_docs += docs.len();
        out.insert(name, Value::Array(docs));
    }

    fs::write(file, serde_json::to_string_pretty(&Value::Object(out))?)
        .with_context(|| format!("failed to write {}", file.display()))?;
    println!("exported {} documents to {}", total_docs, file.display());
    Ok(())
}

fn list_collections(db_path: &Path) -> Result<()> {
    let db = open_db(db_path)?;
    for name in db.list_collections()? {
        println!("{}\t{}", name, db.count(&name, None)?);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn find(
    db_path: &Path,
    collection: &str,
    filter: &str,
    skip: Option<usize>,
    limit: Option<usize>,
    sort: Option<&str>,
    explain: bool,
) -> Result<()> {
    let db = open_db(db_path)?;
    let filter = parse_doc(filter)?;

    if explain {
        println!("{}", to_json(db.explain(collection, &filter)?));
        return Ok(());
    }

    let mut options = FindOptions::new();
    options.skip = skip;
    options.limit = limit;
    if let Some(sort_json) = sort {
        let spec = parse_doc(sort_json)?;
        let mut pairs = Vec::new();
        for (field, value) in spec.iter() {
            let direction = match value {
                Bson::Int32(n) => *n,
                Bson::Int64(n) => *n as i32,
                Bson::Double(d) => *d as i32,
                _ => bail!("sort direction for '{}' must be 1 or -1", field),
            };
            pairs.push((field.clone(), direction));
        }
        options.sort = Some(pairs);
    }

    let mut cursor = db.find_with_options(collection, &filter, options)?;
    let mut shown = 0usize;
    while let Some(found) = cursor.next()? {
        println!("{}", to_json(found));
        shown += 1;
    }
    eprintln!("({} documents)", shown);
    Ok(())
}

fn count(db_path: &Path, collection: &str, filter: &str) -> Result<()> {
    let db = open_db(db_path)?;
    let filter = parse_doc(filter)?;
    let n = if filter.is_empty() {
        db.count(collection, None)?
    } else {
        db.count(collection, Some(&filter))?
    };
    println!("{}", n);
    Ok(())
}

fn delete(db_path: &Path, collection: &str, filter: &str) -> Result<()> {
    let db = open_db(db_path)?;
    let filter = parse_doc(filter)?;
    let deleted = db.delete_many(collection, &filter)?;
    println!("deleted {} documents", deleted);
    Ok(())
}

fn drop_collection(db_path: &Path, collection: &str) -> Result<()> {
    let db = open_db(db_path)?;
    db.drop_collection(collection)?;
    println!("dropped '{}'", collection);
    Ok(())
}

fn create_index(
    db_path: &Path,
    collection: &str,
    keys: &str,
    name: Option<String>,
    unique: bool,
    sparse: bool,
) -> Result<()> {
    let db = open_db(db_path)?;
    let keys = parse_doc(keys)?;
    let created = db.create_index(
        collection,
        &keys,
        IndexOptions {
            name,
            unique,
            sparse,
        },
    )?;
    println!("created index '{}'", created);
    Ok(())
}

fn drop_index(db_path: &Path, collection: &str, name: &str) -> Result<()> {
    let db = open_db(db_path)?;
    db.drop_index(collection, name)?;
    println!("dropped index '{}'", name);
    Ok(())
}

fn list_indexes(db_path: &Path, collection: &str) -> Result<()> {
    let db = open_db(db_path)?;
    for index in db.list_indexes(collection)? {
        let fields: Vec<String> = index
            .spec
            .fields
            .iter()
            .map(|(path, dir)| format!("{}:{}", path, dir))
            .collect();
        println!(
            "{}\t[{}]{}{}",
            index.name,
            fields.join(", "),
            if index.unique { " unique" } else { "" },
            if index.sparse { " sparse" } else { "" },
        );
    }
    Ok(())
}
