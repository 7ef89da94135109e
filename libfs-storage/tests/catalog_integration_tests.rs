//! Catalog/view-engine integration tests against a real on-disk SQLite
//! library, exercising round-trip, rename-inverse and duplicate
//! disambiguation properties without a live FUSE mount.

use std::collections::HashMap;

use libfs_core::{Magic, View};
use libfs_storage::view::{disambiguate, FilenameTemplate, ViewTree};
use libfs_storage::Catalog;

fn test_magic() -> Magic {
    Magic {
        valid_keys: vec![
            "genre".into(),
            "artist".into(),
            "year".into(),
            "album".into(),
            "title".into(),
        ],
        default_view: View::new(
            vec![
                "genre".to_string(),
                "artist".to_string(),
                "year".to_string(),
                "album".to_string(),
            ],
            "%{title}".to_string(),
        ),
        plugin: "audio".into(),
    }
}

async fn open_on_disk_library() -> (tempfile::TempDir, Catalog) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("library.db");
    let catalog = Catalog::open(db_path.to_str().unwrap(), Some(test_magic()))
        .await
        .unwrap();
    (dir, catalog)
}

#[tokio::test]
async fn round_trip_through_view_and_template_matches_source_row() {
    let (_dir, catalog) = open_on_disk_library().await;
    let mut metadata = HashMap::new();
    metadata.insert("genre".into(), "Rock".into());
    metadata.insert("artist".into(), "Artist A".into());
    metadata.insert("year".into(), "2000".into());
    metadata.insert("album".into(), "Album A".into());
    metadata.insert("title".into(), "Track A".into());
    catalog.add_entry("/music/a.mp3", 11, &metadata).await.unwrap();

    let view = &catalog.magic.default_view;
    let template = FilenameTemplate::compile(&view.fn_gen).unwrap();
    let row = catalog.get_by_src_path("/music/a.mp3").await.unwrap().unwrap();

    let formatted = template.format(&row.fields);
    assert_eq!(formatted, "Track A");
    let parsed = template.parse(&formatted).unwrap();
    assert_eq!(parsed.get("title").unwrap(), row.get("title"));

    let tuples = catalog.distinct_dirtree_tuples(&view.dirtree).await.unwrap();
    assert_eq!(
        tuples,
        vec![vec![
            "Rock".to_string(),
            "Artist A".to_string(),
            "2000".to_string(),
            "Album A".to_string()
        ]]
    );
}

#[tokio::test]
async fn view_tree_rebuild_is_idempotent_against_the_catalog() {
    let (_dir, catalog) = open_on_disk_library().await;
    for (path, artist) in [("/a.mp3", "Artist A"), ("/b.mp3", "Artist B")] {
        let mut metadata = HashMap::new();
        metadata.insert("genre".into(), "Rock".into());
        metadata.insert("artist".into(), artist.into());
        catalog.add_entry(path, path.len() as u64, &metadata).await.unwrap();
    }

    let dirtree = catalog.magic.default_view.dirtree.clone();
    let tuples_a = catalog.distinct_dirtree_tuples(&dirtree).await.unwrap();
    let tree_a = ViewTree::build(&tuples_a);
    let tuples_b = catalog.distinct_dirtree_tuples(&dirtree).await.unwrap();
    let tree_b = ViewTree::build(&tuples_b);

    assert_eq!(
        tree_a.children(ViewTree::ROOT).count(),
        tree_b.children(ViewTree::ROOT).count()
    );
}

#[tokio::test]
async fn rename_then_reverse_rename_restores_the_catalog_row() {
    let (_dir, catalog) = open_on_disk_library().await;
    let mut metadata = HashMap::new();
    metadata.insert("genre".into(), "Rock".into());
    metadata.insert("artist".into(), "Artist A".into());
    catalog.add_entry("/a.mp3", 1, &metadata).await.unwrap();

    let dirtree = vec!["genre".to_string(), "artist".to_string()];
    let old = vec!["Rock".to_string(), "Artist A".to_string()];
    let new = vec!["Rock".to_string(), "Artist NON".to_string()];

    catalog.update_columns(&dirtree, &old, &new).await.unwrap();
    let renamed = catalog.get_by_src_path("/a.mp3").await.unwrap().unwrap();
    assert_eq!(renamed.get("artist"), "Artist NON");

    catalog.update_columns(&dirtree, &new, &old).await.unwrap();
    let restored = catalog.get_by_src_path("/a.mp3").await.unwrap().unwrap();
    assert_eq!(restored.get("artist"), "Artist A");
    assert_eq!(restored, catalog.get_by_src_path("/a.mp3").await.unwrap().unwrap());
}

#[tokio::test]
async fn identical_rows_produce_one_disambiguated_listing_entry() {
    let (_dir, catalog) = open_on_disk_library().await;
    for (path, inode) in [("/a.mp3", 1u64), ("/b.mp3", 2u64)] {
        let mut metadata = HashMap::new();
        metadata.insert("genre".into(), "Rock".into());
        metadata.insert("artist".into(), "Artist A".into());
        metadata.insert("year".into(), "2000".into());
        metadata.insert("album".into(), "Album A".into());
        metadata.insert("title".into(), "Same Title".into());
        catalog.add_entry(path, inode, &metadata).await.unwrap();
    }

    let template = FilenameTemplate::compile(&catalog.magic.default_view.fn_gen).unwrap();
    let rows = catalog
        .rows_matching(
            &catalog.magic.default_view.dirtree,
            &["Rock".to_string(), "Artist A".to_string(), "2000".to_string(), "Album A".to_string()],
        )
        .await
        .unwrap();
    let mut names = Vec::new();
    for (inode, _) in &rows {
        let row = catalog.get_by_inode(*inode).await.unwrap().unwrap();
        names.push(template.format(&row.fields));
    }
    let disambiguated = disambiguate(names);

    let suffixed = disambiguated.iter().filter(|n| n.contains("(libfs:1)")).count();
    assert_eq!(suffixed, 1);
    assert_eq!(disambiguated.iter().filter(|n| *n == "Same Title").count(), 1);
}
