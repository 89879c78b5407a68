//! Revision replay
//!
//! Re-emits a committed revision as tree-editor calls: the changed
//! paths are sorted depth-first (parents strictly before children) and
//! driven through a [`TreeEditor`] one by one. An authorization
//! predicate scopes what the consumer may see; copies whose source is
//! unreadable, below the low-water mark, or outside the requested
//! subtree degrade to plain adds with the subtree re-added child by
//! child, so visible content survives without leaking the source path.

use std::cmp::Ordering;

use crate::editor::TreeEditor;
use crate::error::Result;
use crate::store::{ChangeKind, NodeKind, PathChange, PropMap, Revnum, TxnStore, canonical_path};
use crate::svndiff::windows_for_content;

/// Per-path read check. Returns whether `path` at `rev` may be shown to
/// the consumer.
pub type AuthzFn<'a> = &'a mut dyn FnMut(Revnum, &str) -> bool;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Restrict the replay to this subtree ("" replays everything).
    pub base_path: String,
    /// Copies from revisions older than this lose their history.
    pub low_water_mark: Revnum,
    /// Compare against the previous revision and send property diffs;
    /// otherwise every touched node's full property list is sent.
    pub send_deltas: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            low_water_mark: 0,
            send_deltas: false,
        }
    }
}

/// Order paths depth-first: '/' sorts before every other byte, so a
/// parent always precedes its children and their siblings.
fn compare_paths(a: &str, b: &str) -> Ordering {
    let key = |c: u8| if c == b'/' { 0 } else { c };
    a.bytes().map(key).cmp(b.bytes().map(key))
}

fn is_within(path: &str, base: &str) -> bool {
    base.is_empty() || path == base || path.starts_with(&format!("{base}/"))
}

/// Drive `editor` with the changes committed in `rev`.
pub fn replay<S: TxnStore, E: TreeEditor + ?Sized>(
    store: &S,
    rev: Revnum,
    options: &ReplayOptions,
    editor: &mut E,
    authz: AuthzFn<'_>,
) -> Result<()> {
    let base_path = canonical_path(&options.base_path);
    let base_rev = rev.saturating_sub(1);

    let mut changes: Vec<PathChange> = store
        .paths_changed(rev)?
        .into_iter()
        .filter(|c| is_within(&c.path, &base_path))
        .filter(|c| authz(rev, &c.path))
        .collect();
    changes.sort_by(|a, b| compare_paths(&a.path, &b.path));

    let mut driver = Driver {
        store,
        rev,
        base_rev,
        options,
        base_path,
    };

    editor.open_root(base_rev)?;
    for change in &changes {
        driver.drive_change(editor, change, authz)?;
    }
    editor.close_edit()
}

struct Driver<'a, S: TxnStore> {
    store: &'a S,
    rev: Revnum,
    base_rev: Revnum,
    options: &'a ReplayOptions,
    base_path: String,
}

impl<S: TxnStore> Driver<'_, S> {
    fn drive_change<E: TreeEditor + ?Sized>(
        &mut self,
        editor: &mut E,
        change: &PathChange,
        authz: AuthzFn<'_>,
    ) -> Result<()> {
        match change.kind {
            ChangeKind::Delete => editor.delete_entry(&change.path, self.base_rev),
            ChangeKind::Add => self.drive_add(editor, change, authz),
            ChangeKind::Replace => {
                editor.delete_entry(&change.path, self.base_rev)?;
                self.drive_add(editor, change, authz)
            }
            ChangeKind::Modify => self.drive_modify(editor, change),
        }
    }

    fn drive_add<E: TreeEditor + ?Sized>(
        &mut self,
        editor: &mut E,
        change: &PathChange,
        authz: AuthzFn<'_>,
    ) -> Result<()> {
        let path = change.path.as_str();

        if let Some((src_rev, src_path)) = &change.copyfrom {
            let usable = authz(*src_rev, src_path)
                && is_within(src_path, &self.base_path)
                && *src_rev >= self.options.low_water_mark;
            if !usable {
                // The consumer may not learn about the source; re-add
                // the whole subtree without history instead.
                return self.add_no_history(editor, path, change.node_kind, authz);
            }

            let copyfrom = Some((*src_rev, src_path.clone()));
            match change.node_kind {
                NodeKind::Dir => {
                    editor.add_directory(path, copyfrom)?;
                    let base = self.store.node_props(*src_rev, src_path)?;
                    self.send_props(editor, path, NodeKind::Dir, Some(&base))?;
                }
                NodeKind::File => {
                    editor.add_file(path, copyfrom)?;
                    let base = self.store.node_props(*src_rev, src_path)?;
                    self.send_props(editor, path, NodeKind::File, Some(&base))?;
                    if change.text_mod {
                        self.send_text(editor, path)?;
                    }
                }
            }
            return Ok(());
        }

        match change.node_kind {
            NodeKind::Dir => {
                editor.add_directory(path, None)?;
                self.send_props(editor, path, NodeKind::Dir, None)?;
            }
            NodeKind::File => {
                editor.add_file(path, None)?;
                self.send_props(editor, path, NodeKind::File, None)?;
                if change.text_mod {
                    self.send_text(editor, path)?;
                }
            }
        }
        Ok(())
    }

    fn drive_modify<E: TreeEditor + ?Sized>(
        &mut self,
        editor: &mut E,
        change: &PathChange,
    ) -> Result<()> {
        let path = change.path.as_str();
        // The root is already open; everything else gets an open call.
        if !path.is_empty() {
            match change.node_kind {
                NodeKind::Dir => editor.open_directory(path, self.base_rev)?,
                NodeKind::File => editor.open_file(path, self.base_rev)?,
            }
        }
        if change.prop_mod {
            let base = if self.options.send_deltas {
                Some(self.store.node_props(self.base_rev, path)?)
            } else {
                None
            };
            self.send_props(editor, path, change.node_kind, base.as_ref())?;
        }
        if change.text_mod && change.node_kind == NodeKind::File {
            self.send_text(editor, path)?;
        }
        Ok(())
    }

    /// Recursively re-add `path`'s subtree as plain adds, skipping
    /// children the consumer may not read.
    fn add_no_history<E: TreeEditor + ?Sized>(
        &mut self,
        editor: &mut E,
        path: &str,
        kind: NodeKind,
        authz: AuthzFn<'_>,
    ) -> Result<()> {
        match kind {
            NodeKind::File => {
                editor.add_file(path, None)?;
                self.send_props(editor, path, NodeKind::File, None)?;
                self.send_text(editor, path)
            }
            NodeKind::Dir => {
                editor.add_directory(path, None)?;
                self.send_props(editor, path, NodeKind::Dir, None)?;
                for (name, child_kind) in self.store.dir_entries(self.rev, path)? {
                    let child = if path.is_empty() {
                        name
                    } else {
                        format!("{path}/{name}")
                    };
                    if !authz(self.rev, &child) {
                        continue;
                    }
                    self.add_no_history(editor, &child, child_kind, authz)?;
                }
                Ok(())
            }
        }
    }

    /// Emit property calls for `path`. With a base, only differences
    /// are sent (removed properties as `None`); without one, the full
    /// current set.
    fn send_props<E: TreeEditor + ?Sized>(
        &mut self,
        editor: &mut E,
        path: &str,
        kind: NodeKind,
        base: Option<&PropMap>,
    ) -> Result<()> {
        let current = self.store.node_props(self.rev, path)?;
        let mut calls: Vec<(String, Option<Vec<u8>>)> = Vec::new();
        for (name, value) in &current {
            if base.is_none_or(|b| b.get(name) != Some(value)) {
                calls.push((name.clone(), Some(value.clone())));
            }
        }
        if let Some(base) = base {
            for name in base.keys() {
                if !current.contains_key(name) {
                    calls.push((name.clone(), None));
                }
            }
        }
        for (name, value) in calls {
            match kind {
                NodeKind::Dir => editor.change_dir_prop(path, &name, value)?,
                NodeKind::File => editor.change_file_prop(path, &name, value)?,
            }
        }
        Ok(())
    }

    fn send_text<E: TreeEditor + ?Sized>(&mut self, editor: &mut E, path: &str) -> Result<()> {
        let content = self.store.file_contents(self.rev, path)?;
        editor.apply_textdelta(path, windows_for_content(&content))
    }
}
