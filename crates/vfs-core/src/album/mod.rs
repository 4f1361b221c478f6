//! Duplicate-aware album/folder index (spec §4.8): name↔ID lookup with
//! tiebreak suffixes and a synthetic directory tree for Photos-style
//! backends.
//!
//! Hierarchy is derived entirely from `raw_title`: a `/`-separated title
//! such as `"one/sub"` reads as leaf `"sub"` under parent `"one"`, with
//! `"one"` synthesized as an implicit directory if no album is itself
//! titled `"one"`. Implicit directories are refcounted so they persist as
//! long as any descendant needs them and vanish once the last one is gone.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: String,
    pub raw_title: String,
}

/// Splits a raw title on `/`, dropping empty/`.`/`..` segments (spec §4.8
/// weird-path policy generalizes naturally to stripping them wherever they
/// occur, not just when the whole title is redundant).
fn normalize_title(raw: &str) -> String {
    raw.split('/')
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Splits a normalized title into its ancestor path segments and leaf name.
fn split_title(norm: &str) -> (Vec<String>, String) {
    if norm.is_empty() {
        return (Vec::new(), String::new());
    }
    let mut parts: Vec<String> = norm.split('/').map(String::from).collect();
    let leaf = parts.pop().expect("non-empty norm has at least one segment");
    (parts, leaf)
}

/// Disambiguation suffix is literally ` {<providerID>}` (spec glossary); an
/// empty title always keys on `{providerID}` alone, duplicate or not, since
/// the suffix rule is moot once the title contributes nothing to the key.
fn disambiguate(title: &str, id: &str, duplicated: bool) -> String {
    if title.is_empty() {
        format!("{{{id}}}")
    } else if duplicated {
        format!("{title} {{{id}}}")
    } else {
        title.to_string()
    }
}

/// byID/byTitle/dupesByTitle maps plus the parent→children tree (spec §3).
#[derive(Default)]
pub struct AlbumIndex {
    by_id: HashMap<String, Album>,
    by_title: HashMap<String, String>,
    dupes_by_title: HashMap<String, Vec<String>>,
    children: HashMap<String, BTreeSet<String>>,
    /// Refcounts the reasons a `(parent, name)` pair belongs in `children`:
    /// an album's own leaf entry and each descendant's implicit-ancestor
    /// reference are both one reason, so a name outlives any single one.
    child_refs: HashMap<(String, String), u32>,
}

impl AlbumIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn incr_child(&mut self, parent: String, name: String) {
        let count = self.child_refs.entry((parent.clone(), name.clone())).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.children.entry(parent).or_default().insert(name);
        }
    }

    fn decr_child(&mut self, parent: &str, name: &str) {
        let key = (parent.to_string(), name.to_string());
        let Some(count) = self.child_refs.get_mut(&key) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.child_refs.remove(&key);
            if let Some(set) = self.children.get_mut(parent) {
                set.remove(name);
                if set.is_empty() {
                    self.children.remove(parent);
                }
            }
        }
    }

    pub fn add(&mut self, album: Album) {
        let norm = normalize_title(&album.raw_title);
        let (ancestors, leaf) = split_title(&norm);
        let dir = ancestors.join("/");

        for i in 0..ancestors.len() {
            let seg_parent = ancestors[..i].join("/");
            self.incr_child(seg_parent, ancestors[i].clone());
        }

        let ids = self.dupes_by_title.entry(norm.clone()).or_default();
        ids.push(album.id.clone());
        let now_duplicated = ids.len() > 1;
        let newly_duplicated = ids.len() == 2;
        let sole_existing_id = if newly_duplicated { Some(ids[0].clone()) } else { None };

        if let Some(existing_id) = sole_existing_id {
            let old_full = disambiguate(&norm, &existing_id, false);
            let old_leaf = disambiguate(&leaf, &existing_id, false);
            self.by_title.remove(&old_full);
            self.decr_child(&dir, &old_leaf);

            let new_full = disambiguate(&norm, &existing_id, true);
            let new_leaf = disambiguate(&leaf, &existing_id, true);
            self.by_title.insert(new_full, existing_id);
            self.incr_child(dir.clone(), new_leaf);
        }

        let full = disambiguate(&norm, &album.id, now_duplicated);
        let leaf_key = disambiguate(&leaf, &album.id, now_duplicated);
        self.by_title.insert(full, album.id.clone());
        self.incr_child(dir, leaf_key);
        self.by_id.insert(album.id.clone(), album);
    }

    pub fn del(&mut self, id: &str) -> Option<Album> {
        let album = self.by_id.remove(id)?;
        let norm = normalize_title(&album.raw_title);
        let (ancestors, leaf) = split_title(&norm);
        let dir = ancestors.join("/");

        let was_duplicated = self.dupes_by_title.get(&norm).map(|v| v.len() > 1).unwrap_or(false);
        let removed_full = disambiguate(&norm, id, was_duplicated);
        let removed_leaf = disambiguate(&leaf, id, was_duplicated);
        self.by_title.remove(&removed_full);
        self.decr_child(&dir, &removed_leaf);

        if let Some(ids) = self.dupes_by_title.get_mut(&norm) {
            ids.retain(|i| i != id);
            match ids.len() {
                0 => {
                    self.dupes_by_title.remove(&norm);
                }
                1 => {
                    let survivor_id = ids[0].clone();
                    self.dupes_by_title.remove(&norm);

                    let old_full = disambiguate(&norm, &survivor_id, true);
                    let old_leaf = disambiguate(&leaf, &survivor_id, true);
                    self.by_title.remove(&old_full);
                    self.decr_child(&dir, &old_leaf);

                    let new_full = disambiguate(&norm, &survivor_id, false);
                    let new_leaf = disambiguate(&leaf, &survivor_id, false);
                    self.by_title.insert(new_full, survivor_id);
                    self.incr_child(dir.clone(), new_leaf);
                }
                _ => {}
            }
        }

        for i in (0..ancestors.len()).rev() {
            let seg_parent = ancestors[..i].join("/");
            self.decr_child(&seg_parent, &ancestors[i]);
        }

        Some(album)
    }

    pub fn get(&self, title: &str) -> Option<&Album> {
        let id = self.by_title.get(title)?;
        self.by_id.get(id)
    }

    /// Returns the disambiguated child titles directly under `parent`, or
    /// `None` if nothing has ever been listed there.
    pub fn get_dirs(&self, parent: &str) -> Option<Vec<String>> {
        self.children.get(parent).map(|set| set.iter().cloned().collect())
    }
}
