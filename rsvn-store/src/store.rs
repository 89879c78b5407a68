//! Transactional versioned store
//!
//! `TxnStore` is the seam between the loader/replay machinery and a
//! storage backend: a linear revision history, one open transaction at a
//! time, per-node properties and file contents, and a changed-paths
//! record per committed revision. `MemStore` is the in-memory
//! implementation used by tests and small embedders.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::Utc;
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::error::{Error, Result};
use crate::props;

/// Revision number. Revision 0 is the empty root revision every store
/// starts with.
pub type Revnum = u64;

/// Property name -> value. Values are raw bytes; dump streams may carry
/// non-UTF-8 property values.
pub type PropMap = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

/// How a path changed in a committed revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Delete,
    Replace,
    Modify,
}

/// One entry of a revision's changed-paths record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub path: String,
    pub kind: ChangeKind,
    pub node_kind: NodeKind,
    pub text_mod: bool,
    pub prop_mod: bool,
    /// Copy source, for adds/replaces with history.
    pub copyfrom: Option<(Revnum, String)>,
}

/// A linear-history store with single-transaction write access.
///
/// Writes go through an explicit transaction: `begin_txn` against a base
/// revision, tree edits, then `commit_txn` (which stamps `svn:date` with
/// the commit wallclock time) or `abort_txn`. Reads address committed
/// revisions only, except `txn_file_contents`, which lets a caller fetch
/// a file's in-transaction text as a delta base.
pub trait TxnStore {
    fn youngest_revision(&self) -> Revnum;
    fn uuid(&self) -> &str;
    fn set_uuid(&mut self, uuid: &str) -> Result<()>;

    fn begin_txn(&mut self, base: Revnum) -> Result<()>;
    fn abort_txn(&mut self) -> Result<()>;
    /// Commit the open transaction and return the new revision number.
    fn commit_txn(&mut self) -> Result<Revnum>;

    fn make_dir(&mut self, path: &str) -> Result<()>;
    fn make_file(&mut self, path: &str) -> Result<()>;
    fn delete_node(&mut self, path: &str) -> Result<()>;
    /// Copy a node (with its subtree) from a committed revision into the
    /// transaction.
    fn copy_node(&mut self, from_rev: Revnum, from_path: &str, to_path: &str) -> Result<()>;

    fn set_node_property(&mut self, path: &str, name: &str, value: Vec<u8>) -> Result<()>;
    fn delete_node_property(&mut self, path: &str, name: &str) -> Result<()>;
    /// Clear all properties of a node, ahead of a full non-delta set.
    fn remove_node_props(&mut self, path: &str) -> Result<()>;
    fn set_file_contents(&mut self, path: &str, content: Bytes) -> Result<()>;
    /// Current contents of a file inside the open transaction.
    fn txn_file_contents(&self, path: &str) -> Result<Bytes>;
    /// Set (`Some`) or delete (`None`) a revision property on the open
    /// transaction; it lands on the committed revision.
    fn set_txn_property(&mut self, name: &str, value: Option<Vec<u8>>) -> Result<()>;

    /// Set or delete a revision property on an already committed revision.
    fn set_revision_property(
        &mut self,
        rev: Revnum,
        name: &str,
        value: Option<Vec<u8>>,
    ) -> Result<()>;
    fn revision_properties(&self, rev: Revnum) -> Result<PropMap>;

    fn node_kind(&self, rev: Revnum, path: &str) -> Result<Option<NodeKind>>;
    fn dir_entries(&self, rev: Revnum, path: &str) -> Result<Vec<(String, NodeKind)>>;
    fn file_contents(&self, rev: Revnum, path: &str) -> Result<Bytes>;
    /// Hex MD5 of a file's contents.
    fn file_checksum(&self, rev: Revnum, path: &str) -> Result<String>;
    fn node_props(&self, rev: Revnum, path: &str) -> Result<PropMap>;
    fn paths_changed(&self, rev: Revnum) -> Result<Vec<PathChange>>;
}

/// Strip leading/trailing slashes so paths compare consistently; the
/// root is the empty string.
pub fn canonical_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    props: PropMap,
    content: Bytes,
}

impl Node {
    fn dir() -> Self {
        Self {
            kind: NodeKind::Dir,
            props: PropMap::new(),
            content: Bytes::new(),
        }
    }

    fn file() -> Self {
        Self {
            kind: NodeKind::File,
            props: PropMap::new(),
            content: Bytes::new(),
        }
    }
}

/// Committed revision: a full path-keyed tree snapshot plus revision
/// properties and the changed-paths record.
#[derive(Debug, Clone)]
struct Revision {
    tree: BTreeMap<String, Node>,
    props: PropMap,
    changes: Vec<PathChange>,
}

struct Txn {
    base: Revnum,
    tree: BTreeMap<String, Node>,
    props: PropMap,
    /// Change record per path, in first-touch order.
    changes: Vec<PathChange>,
}

/// In-memory store. Starts at revision 0 with an empty root directory
/// and no UUID.
pub struct MemStore {
    revisions: Vec<Revision>,
    uuid: String,
    txn: Option<Txn>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        let mut tree = BTreeMap::new();
        tree.insert(String::new(), Node::dir());
        Self {
            revisions: vec![Revision {
                tree,
                props: PropMap::new(),
                changes: Vec::new(),
            }],
            uuid: String::new(),
            txn: None,
        }
    }

    fn revision(&self, rev: Revnum) -> Result<&Revision> {
        self.revisions
            .get(rev as usize)
            .ok_or(Error::NoSuchRevision(rev))
    }

    fn txn(&self) -> Result<&Txn> {
        self.txn
            .as_ref()
            .ok_or_else(|| Error::Store("no open transaction".into()))
    }

    fn txn_mut(&mut self) -> Result<&mut Txn> {
        self.txn
            .as_mut()
            .ok_or_else(|| Error::Store("no open transaction".into()))
    }

    fn require_parent_dir(txn: &Txn, path: &str) -> Result<()> {
        let parent = match path.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => "",
        };
        match txn.tree.get(parent) {
            Some(node) if node.kind == NodeKind::Dir => Ok(()),
            Some(_) => Err(Error::Store(format!("'{parent}' is not a directory"))),
            None => Err(Error::NotFound(parent.to_string())),
        }
    }

    fn record_change(txn: &mut Txn, change: PathChange) {
        // Delete followed by add of the same path is a replace.
        if change.kind == ChangeKind::Add {
            if let Some(prior) = txn
                .changes
                .iter_mut()
                .find(|c| c.path == change.path && c.kind == ChangeKind::Delete)
            {
                *prior = PathChange {
                    kind: ChangeKind::Replace,
                    ..change
                };
                return;
            }
        }
        txn.changes.push(change);
    }

    /// Flag a text or prop modification on a path, folding it into an
    /// existing change record when one exists.
    fn record_mod(txn: &mut Txn, path: &str, kind: NodeKind, text: bool, prop: bool) {
        if let Some(change) = txn
            .changes
            .iter_mut()
            .find(|c| c.path == path && c.kind != ChangeKind::Delete)
        {
            change.text_mod |= text;
            change.prop_mod |= prop;
            return;
        }
        txn.changes.push(PathChange {
            path: path.to_string(),
            kind: ChangeKind::Modify,
            node_kind: kind,
            text_mod: text,
            prop_mod: prop,
            copyfrom: None,
        });
    }

    fn lookup<'a>(&'a self, rev: Revnum, path: &str) -> Result<&'a Node> {
        let path = canonical_path(path);
        self.revision(rev)?
            .tree
            .get(&path)
            .ok_or(Error::NotFound(path))
    }
}

impl TxnStore for MemStore {
    fn youngest_revision(&self) -> Revnum {
        (self.revisions.len() - 1) as Revnum
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn set_uuid(&mut self, uuid: &str) -> Result<()> {
        self.uuid = uuid.to_string();
        Ok(())
    }

    fn begin_txn(&mut self, base: Revnum) -> Result<()> {
        if self.txn.is_some() {
            return Err(Error::Store("transaction already open".into()));
        }
        let tree = self.revision(base)?.tree.clone();
        self.txn = Some(Txn {
            base,
            tree,
            props: PropMap::new(),
            changes: Vec::new(),
        });
        Ok(())
    }

    fn abort_txn(&mut self) -> Result<()> {
        self.txn()?;
        self.txn = None;
        Ok(())
    }

    fn commit_txn(&mut self) -> Result<Revnum> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| Error::Store("no open transaction".into()))?;
        if txn.base != self.youngest_revision() {
            self.txn = Some(txn);
            return Err(Error::Store("transaction is out of date".into()));
        }
        let mut props = txn.props;
        props.insert(
            props::REVISION_DATE.to_string(),
            Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.6fZ")
                .to_string()
                .into_bytes(),
        );
        self.revisions.push(Revision {
            tree: txn.tree,
            props,
            changes: txn.changes,
        });
        Ok(self.youngest_revision())
    }

    fn make_dir(&mut self, path: &str) -> Result<()> {
        let path = canonical_path(path);
        let txn = self.txn_mut()?;
        Self::require_parent_dir(txn, &path)?;
        if txn.tree.contains_key(&path) {
            return Err(Error::Store(format!("path already exists: '{path}'")));
        }
        txn.tree.insert(path.clone(), Node::dir());
        Self::record_change(
            txn,
            PathChange {
                path,
                kind: ChangeKind::Add,
                node_kind: NodeKind::Dir,
                text_mod: false,
                prop_mod: false,
                copyfrom: None,
            },
        );
        Ok(())
    }

    fn make_file(&mut self, path: &str) -> Result<()> {
        let path = canonical_path(path);
        let txn = self.txn_mut()?;
        Self::require_parent_dir(txn, &path)?;
        if txn.tree.contains_key(&path) {
            return Err(Error::Store(format!("path already exists: '{path}'")));
        }
        txn.tree.insert(path.clone(), Node::file());
        Self::record_change(
            txn,
            PathChange {
                path,
                kind: ChangeKind::Add,
                node_kind: NodeKind::File,
                text_mod: false,
                prop_mod: false,
                copyfrom: None,
            },
        );
        Ok(())
    }

    fn delete_node(&mut self, path: &str) -> Result<()> {
        let path = canonical_path(path);
        let txn = self.txn_mut()?;
        let node = txn.tree.remove(&path).ok_or(Error::NotFound(path.clone()))?;
        let prefix = format!("{path}/");
        txn.tree.retain(|p, _| !p.starts_with(&prefix));
        Self::record_change(
            txn,
            PathChange {
                path,
                kind: ChangeKind::Delete,
                node_kind: node.kind,
                text_mod: false,
                prop_mod: false,
                copyfrom: None,
            },
        );
        Ok(())
    }

    fn copy_node(&mut self, from_rev: Revnum, from_path: &str, to_path: &str) -> Result<()> {
        let from_path = canonical_path(from_path);
        let to_path = canonical_path(to_path);

        let source = self.revision(from_rev)?;
        let node = source
            .tree
            .get(&from_path)
            .ok_or(Error::NotFound(from_path.clone()))?
            .clone();
        // Collect the subtree before touching the transaction.
        let prefix = format!("{from_path}/");
        let subtree: Vec<(String, Node)> = source
            .tree
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .map(|(p, n)| (format!("{to_path}/{}", &p[prefix.len()..]), n.clone()))
            .collect();

        let kind = node.kind;
        let txn = self.txn_mut()?;
        Self::require_parent_dir(txn, &to_path)?;
        if txn.tree.contains_key(&to_path) {
            return Err(Error::Store(format!("path already exists: '{to_path}'")));
        }
        txn.tree.insert(to_path.clone(), node);
        txn.tree.extend(subtree);
        Self::record_change(
            txn,
            PathChange {
                path: to_path,
                kind: ChangeKind::Add,
                node_kind: kind,
                text_mod: false,
                prop_mod: false,
                copyfrom: Some((from_rev, from_path)),
            },
        );
        Ok(())
    }

    fn set_node_property(&mut self, path: &str, name: &str, value: Vec<u8>) -> Result<()> {
        let path = canonical_path(path);
        let txn = self.txn_mut()?;
        let node = txn
            .tree
            .get_mut(&path)
            .ok_or(Error::NotFound(path.clone()))?;
        node.props.insert(name.to_string(), value);
        let kind = node.kind;
        Self::record_mod(txn, &path, kind, false, true);
        Ok(())
    }

    fn delete_node_property(&mut self, path: &str, name: &str) -> Result<()> {
        let path = canonical_path(path);
        let txn = self.txn_mut()?;
        let node = txn
            .tree
            .get_mut(&path)
            .ok_or(Error::NotFound(path.clone()))?;
        node.props.remove(name);
        let kind = node.kind;
        Self::record_mod(txn, &path, kind, false, true);
        Ok(())
    }

    fn remove_node_props(&mut self, path: &str) -> Result<()> {
        let path = canonical_path(path);
        let txn = self.txn_mut()?;
        let node = txn
            .tree
            .get_mut(&path)
            .ok_or(Error::NotFound(path.clone()))?;
        if node.props.is_empty() {
            return Ok(());
        }
        node.props.clear();
        let kind = node.kind;
        Self::record_mod(txn, &path, kind, false, true);
        Ok(())
    }

    fn set_file_contents(&mut self, path: &str, content: Bytes) -> Result<()> {
        let path = canonical_path(path);
        let txn = self.txn_mut()?;
        let node = txn
            .tree
            .get_mut(&path)
            .ok_or(Error::NotFound(path.clone()))?;
        if node.kind != NodeKind::File {
            return Err(Error::Store(format!("'{path}' is not a file")));
        }
        node.content = content;
        Self::record_mod(txn, &path, NodeKind::File, true, false);
        Ok(())
    }

    fn txn_file_contents(&self, path: &str) -> Result<Bytes> {
        let path = canonical_path(path);
        let node = self
            .txn()?
            .tree
            .get(&path)
            .ok_or(Error::NotFound(path.clone()))?;
        if node.kind != NodeKind::File {
            return Err(Error::Store(format!("'{path}' is not a file")));
        }
        Ok(node.content.clone())
    }

    fn set_txn_property(&mut self, name: &str, value: Option<Vec<u8>>) -> Result<()> {
        let txn = self.txn_mut()?;
        match value {
            Some(value) => {
                txn.props.insert(name.to_string(), value);
            }
            None => {
                txn.props.remove(name);
            }
        }
        Ok(())
    }

    fn set_revision_property(
        &mut self,
        rev: Revnum,
        name: &str,
        value: Option<Vec<u8>>,
    ) -> Result<()> {
        self.revision(rev)?;
        let props = &mut self.revisions[rev as usize].props;
        match value {
            Some(value) => {
                props.insert(name.to_string(), value);
            }
            None => {
                props.remove(name);
            }
        }
        Ok(())
    }

    fn revision_properties(&self, rev: Revnum) -> Result<PropMap> {
        Ok(self.revision(rev)?.props.clone())
    }

    fn node_kind(&self, rev: Revnum, path: &str) -> Result<Option<NodeKind>> {
        let path = canonical_path(path);
        Ok(self.revision(rev)?.tree.get(&path).map(|n| n.kind))
    }

    fn dir_entries(&self, rev: Revnum, path: &str) -> Result<Vec<(String, NodeKind)>> {
        let node = self.lookup(rev, path)?;
        if node.kind != NodeKind::Dir {
            return Err(Error::Store(format!("'{path}' is not a directory")));
        }
        let path = canonical_path(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let entries = self
            .revision(rev)?
            .tree
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter(|(p, _)| !p.is_empty() && !p[prefix.len()..].contains('/'))
            .map(|(p, n)| (p[prefix.len()..].to_string(), n.kind))
            .collect();
        Ok(entries)
    }

    fn file_contents(&self, rev: Revnum, path: &str) -> Result<Bytes> {
        let node = self.lookup(rev, path)?;
        if node.kind != NodeKind::File {
            return Err(Error::Store(format!("'{path}' is not a file")));
        }
        Ok(node.content.clone())
    }

    fn file_checksum(&self, rev: Revnum, path: &str) -> Result<String> {
        Ok(md5_hex(&self.file_contents(rev, path)?))
    }

    fn node_props(&self, rev: Revnum, path: &str) -> Result<PropMap> {
        Ok(self.lookup(rev, path)?.props.clone())
    }

    fn paths_changed(&self, rev: Revnum) -> Result<Vec<PathChange>> {
        Ok(self.revision(rev)?.changes.clone())
    }
}
