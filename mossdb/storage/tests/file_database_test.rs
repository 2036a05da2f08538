use mossdb_common::types::TableType;
use mossdb_storage::{Database, FileDatabase, Index, StorageError};

#[test]
fn test_create_and_reopen_tables() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = FileDatabase::open(dir.path()).unwrap();
        db.create_table(TableType::BTree, "users").unwrap();
        db.create_table(TableType::Hash, "orders").unwrap();
        db.insert("users", 1, 100).unwrap();
        db.flush().unwrap();
    }

    let db = FileDatabase::open(dir.path()).unwrap();
    let names: Vec<_> = db.tables().iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["orders", "users"]);
    assert_eq!(db.table("orders").unwrap().table_type(), TableType::Hash);
    assert_eq!(db.get("users", 1).unwrap(), Some(100));
}

#[test]
fn test_unflushed_mutations_are_lost() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = FileDatabase::open(dir.path()).unwrap();
        db.create_table(TableType::BTree, "users").unwrap();
        db.insert("users", 1, 100).unwrap();
    }

    let db = FileDatabase::open(dir.path()).unwrap();
    assert_eq!(db.get("users", 1).unwrap(), None);
}

#[test]
fn test_entry_errors() {
    let dir = tempfile::tempdir().unwrap();
    let db = FileDatabase::open(dir.path()).unwrap();
    db.create_table(TableType::BTree, "t").unwrap();

    db.insert("t", 5, 1).unwrap();
    assert!(matches!(
        db.insert("t", 5, 2),
        Err(StorageError::KeyAlreadyExists { key: 5, .. })
    ));
    assert!(matches!(
        db.update("t", 6, 2),
        Err(StorageError::KeyNotFound { key: 6, .. })
    ));
    assert!(matches!(
        db.delete("t", 6),
        Err(StorageError::KeyNotFound { key: 6, .. })
    ));
    assert!(matches!(
        db.get("missing", 1),
        Err(StorageError::TableNotFound(_))
    ));
    assert!(matches!(
        db.create_table(TableType::Hash, "t"),
        Err(StorageError::TableAlreadyExists(_))
    ));
    assert!(matches!(
        db.create_table(TableType::Hash, "bad name"),
        Err(StorageError::InvalidTableName(_))
    ));

    db.update("t", 5, 9).unwrap();
    assert_eq!(db.get("t", 5).unwrap(), Some(9));
    db.delete("t", 5).unwrap();
    assert_eq!(db.get("t", 5).unwrap(), None);
}

#[test]
fn test_non_table_files_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mossdb.log"), "start x\n").unwrap();

    let db = FileDatabase::open(dir.path()).unwrap();
    assert!(db.tables().is_empty());
}
