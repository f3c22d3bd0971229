//! Property tests for the namespace tree and the hash index.

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

use sgtfs_meta::{
    MemoryKvStore, NamespaceTree, Recipe, RecipeChunk, RecipeIndex, Timestamp, VirtualPath,
    ANY_OWNER,
};

fn file_path() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 1..5)
        .prop_map(|segs| format!("/east/{}", segs.join("/")))
}

fn check_tree(tree: &NamespaceTree) -> Result<(), TestCaseError> {
    for dir in tree.directories("east").unwrap() {
        if dir.path.is_cluster_root() {
            continue;
        }
        prop_assert!(!dir.entries.is_empty(), "{} stored empty", dir.path);
        let mut cur = dir.path.clone();
        while !cur.is_cluster_root() {
            prop_assert!(tree.contains(&cur).unwrap(), "{} unreachable", cur);
            cur = cur.parent().unwrap();
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_tree_stays_connected(
        adds in prop::collection::vec(file_path(), 1..20),
        removals in prop::collection::vec(any::<prop::sample::Index>(), 0..20),
    ) {
        let tree = NamespaceTree::new(Arc::new(MemoryKvStore::new()));
        let added: Vec<VirtualPath> = adds.iter().map(|s| VirtualPath::parse(s).unwrap()).collect();
        for path in &added {
            tree.add_entry(path).unwrap();
        }
        check_tree(&tree)?;
        for idx in removals {
            tree.remove_entry(idx.get(&added)).unwrap();
            check_tree(&tree)?;
        }
    }

    #[test]
    fn prop_hash_index_tracks_stored_recipes(
        files in prop::collection::vec(prop::collection::vec(0u8..6, 1..6), 1..8),
        removed in prop::collection::btree_set(0usize..8, 0..8),
    ) {
        let index = RecipeIndex::new(Arc::new(MemoryKvStore::new()));
        let recipes: Vec<Recipe> = files
            .iter()
            .enumerate()
            .map(|(i, hashes)| Recipe {
                path: VirtualPath::new("east", &format!("/f{i}")).unwrap(),
                hash_algorithm: "BLAKE3".into(),
                chunk_size: 1,
                size: hashes.len() as u64,
                mod_time: Timestamp::from_secs(1),
                chunks: hashes
                    .iter()
                    .enumerate()
                    .map(|(o, h)| RecipeChunk {
                        offset: o as u64,
                        length: 1,
                        hash: Some(vec![*h]),
                        owner_hints: vec![ANY_OWNER.into()],
                    })
                    .collect(),
            })
            .collect();
        for r in &recipes {
            index.put(r).unwrap();
        }
        for i in &removed {
            if let Some(r) = recipes.get(*i) {
                index.remove(&r.path).unwrap();
            }
        }
        let live: Vec<&Recipe> = recipes
            .iter()
            .enumerate()
            .filter(|(i, _)| !removed.contains(i))
            .map(|(_, r)| r)
            .collect();
        for h in 0u8..6 {
            let hex = hex::encode([h]);
            let expected: BTreeSet<VirtualPath> = live
                .iter()
                .filter(|r| r.find_chunk(&[h]).is_some())
                .map(|r| r.path.clone())
                .collect();
            prop_assert_eq!(index.paths_for_hash(&hex).unwrap(), expected.clone());
            prop_assert_eq!(index.get_by_hash(&hex).unwrap().is_some(), !expected.is_empty());
        }
    }
}
