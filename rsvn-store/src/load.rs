//! Dump-stream loader
//!
//! Replays a parsed dump stream into a `TxnStore`, one transaction per
//! revision record. Because the target store assigns its own revision
//! numbers, the loader maintains a stream-rev -> store-rev map and
//! renumbers everything that refers to revisions: copy-from sources and
//! `svn:mergeinfo` range lists. Mergeinfo that predates the stream is
//! shifted by the load offset instead of looked up, and gap revisions
//! (from filtered dumps with dropped revisions) are backfilled into the
//! map so mergeinfo referring to them still resolves.

use std::collections::HashMap;
use std::io::BufRead;

use bytes::Bytes;

use crate::dump::{self, DumpConsumer, Headers};
use crate::error::{Error, Result};
use crate::hooks::HookRunner;
use crate::mergeinfo::{self, Mergeinfo};
use crate::props;
use crate::store::{md5_hex, sha1_hex, NodeKind, Revnum, TxnStore};
use crate::svndiff::Window;

/// What to do with a `UUID` record in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UuidAction {
    /// Adopt the stream's UUID only when the store has no revisions yet.
    #[default]
    IfEmpty,
    Ignore,
    Force,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Resolve copy-from history against the target store. When false,
    /// copies degrade to plain adds of empty nodes.
    pub use_history: bool,
    /// Load the stream under this directory instead of the root. The
    /// directory must already exist in the store.
    pub parent_dir: Option<String>,
    pub uuid_action: UuidAction,
    pub use_pre_commit_hook: bool,
    pub use_post_commit_hook: bool,
}

impl LoadOptions {
    pub fn with_history() -> Self {
        Self {
            use_history: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeAction {
    Change,
    Add,
    Delete,
    Replace,
}

struct RevState {
    /// Revision number in the stream's numbering.
    rev: Revnum,
    /// `stream rev - (store head + 1)` at the time this revision opened.
    /// Used as a fallback when a copy-from revision is not in the map.
    rev_offset: i64,
    /// The dump's original datestamp, restored after commit; `None`
    /// deletes the stamp the store's commit wrote.
    datestamp: Option<Vec<u8>>,
}

struct TextWrite {
    /// Delta base, fetched when the first window arrives. `None` for
    /// fulltext.
    base: Option<Bytes>,
    out: Vec<u8>,
}

struct NodeState {
    path: String,
    text: Option<TextWrite>,
    result_checksum: Option<String>,
    result_sha1: Option<String>,
    base_checksum: Option<String>,
}

/// A `DumpConsumer` that loads the stream into a store.
pub struct Loader<'a, S: TxnStore, H: HookRunner> {
    store: &'a mut S,
    hooks: H,
    options: LoadOptions,
    /// Stream revision -> store revision, for every revision (and gap)
    /// seen so far.
    rev_map: HashMap<Revnum, Revnum>,
    /// Oldest revision number committed from this stream.
    oldest_old_rev: Option<Revnum>,
    last_rev_mapped: Option<Revnum>,
    current: Option<RevState>,
    node: Option<NodeState>,
}

impl<'a, S: TxnStore, H: HookRunner> Loader<'a, S, H> {
    pub fn new(store: &'a mut S, hooks: H, options: LoadOptions) -> Self {
        Self {
            store,
            hooks,
            options,
            rev_map: HashMap::new(),
            oldest_old_rev: None,
            last_rev_mapped: None,
            current: None,
            node: None,
        }
    }

    /// The store revision each loaded stream revision landed on.
    pub fn rev_map(&self) -> &HashMap<Revnum, Revnum> {
        &self.rev_map
    }

    fn current(&self) -> Result<&RevState> {
        self.current
            .as_ref()
            .ok_or_else(|| Error::malformed("record outside a revision"))
    }

    fn node(&self) -> Result<&NodeState> {
        self.node
            .as_ref()
            .ok_or_else(|| Error::malformed("content outside a node record"))
    }

    fn prefixed_path(&self, path: &str) -> String {
        match &self.options.parent_dir {
            Some(parent) => format!(
                "{}/{}",
                parent.trim_matches('/'),
                path.trim_start_matches('/')
            ),
            None => path.to_string(),
        }
    }

    /// Create the node, resolving copy-from history when present.
    fn maybe_add_with_history(
        &mut self,
        path: &str,
        kind: Option<NodeKind>,
        copyfrom: Option<(Revnum, String)>,
        copy_source_checksum: Option<&str>,
        rev_offset: i64,
    ) -> Result<()> {
        let (copyfrom_rev, copyfrom_path) = match copyfrom {
            Some(c) if self.options.use_history => c,
            _ => {
                // Add an empty file or dir, without history.
                match kind {
                    Some(NodeKind::File) => self.store.make_file(path)?,
                    Some(NodeKind::Dir) => self.store.make_dir(path)?,
                    None => {}
                }
                return Ok(());
            }
        };

        // Hunt down the source revision in the target store.
        let src_rev = match self.rev_map.get(&copyfrom_rev) {
            Some(&mapped) => mapped,
            None => {
                let adjusted = copyfrom_rev as i64 - rev_offset;
                if adjusted < 0 || adjusted as Revnum > self.store.youngest_revision() {
                    return Err(Error::NoSuchRevision(copyfrom_rev));
                }
                adjusted as Revnum
            }
        };

        if let Some(expected) = copy_source_checksum {
            let actual = self.store.file_checksum(src_rev, &copyfrom_path)?;
            if expected != actual {
                return Err(Error::ChecksumMismatch {
                    path: copyfrom_path,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        self.store.copy_node(src_rev, &copyfrom_path, path)?;
        tracing::debug!(from = %copyfrom_path, rev = src_rev, to = %path, "copied node");
        Ok(())
    }

    /// Rewrite a mergeinfo value into the target store's numbering.
    fn renumber_mergeinfo(&self, value: &str, rev_offset: i64) -> Result<String> {
        let mut info = mergeinfo::parse(value)?;

        // Split off mergeinfo older than the oldest revision in the
        // stream: those revisions have no map entry and are adjusted by
        // the load offset instead.
        let mut predates = None;
        if let Some(oldest) = self.oldest_old_rev.filter(|&o| o > 1) {
            let older = mergeinfo::filter_by_range(&info, oldest - 1, 0, true);
            info = mergeinfo::filter_by_range(&info, oldest - 1, 0, false);
            predates = Some(mergeinfo::adjust(&older, -rev_offset));
        }

        let mut renumbered = Mergeinfo::new();
        for (source, mut rangelist) in info {
            for range in &mut rangelist {
                if let Some(&mapped) = self.rev_map.get(&range.start) {
                    range.start = mapped;
                } else if self.oldest_old_rev == Some(range.start + 1) {
                    // Range starts are exclusive, so the revision just
                    // before the oldest loaded revision is legitimate
                    // mergeinfo but can never appear in the map. Derive
                    // it from the oldest revision's mapping instead.
                    if let Some(&mapped) = self
                        .oldest_old_rev
                        .and_then(|oldest| self.rev_map.get(&oldest))
                    {
                        range.start = mapped - 1;
                    }
                } else {
                    // If the start cannot be remapped, leave the end
                    // alone too; remapping just the end could produce a
                    // range with start > end.
                    continue;
                }
                if let Some(&mapped) = self.rev_map.get(&range.end) {
                    range.end = mapped;
                }
            }
            renumbered.insert(source, rangelist);
        }

        if let Some(predates) = predates {
            mergeinfo::merge(&mut renumbered, predates);
        }
        mergeinfo::sort(&mut renumbered);

        // r0 and r1 are not valid merge sources, but filtered dumps can
        // smuggle them in. Strip them.
        let renumbered = mergeinfo::filter_by_range(&renumbered, 1, 0, false);
        Ok(mergeinfo::to_string(&renumbered))
    }

    fn prefix_mergeinfo_paths(value: &str, parent_dir: &str) -> Result<String> {
        let info = mergeinfo::parse(value)?;
        let parent = parent_dir.trim_matches('/');
        let prefixed: Mergeinfo = info
            .into_iter()
            .map(|(source, rangelist)| {
                let source = source.trim_start_matches('/');
                (format!("/{parent}/{source}"), rangelist)
            })
            .collect();
        Ok(mergeinfo::to_string(&prefixed))
    }

    /// Flush buffered text to the store, verifying declared checksums.
    fn finish_text(&mut self) -> Result<()> {
        let Some(node) = self.node.take() else {
            return Ok(());
        };
        if let Some(text) = node.text {
            if let Some(expected) = &node.result_checksum {
                let actual = md5_hex(&text.out);
                if *expected != actual {
                    return Err(Error::ChecksumMismatch {
                        path: node.path,
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
            if let Some(expected) = &node.result_sha1 {
                let actual = sha1_hex(&text.out);
                if *expected != actual {
                    return Err(Error::ChecksumMismatch {
                        path: node.path,
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
            self.store
                .set_file_contents(&node.path, Bytes::from(text.out))?;
        }
        Ok(())
    }

    /// Roll back a revision transaction left open by a failed stream,
    /// so the store accepts new transactions afterwards.
    fn abort_pending(&mut self) {
        self.node = None;
        if let Some(rev) = self.current.take() {
            if rev.rev > 0 {
                let _ = self.store.abort_txn();
            }
        }
    }
}

fn parse_rev(value: &str) -> Result<Revnum> {
    value
        .parse()
        .map_err(|_| Error::malformed(format!("invalid revision number '{value}'")))
}

impl<S: TxnStore, H: HookRunner> DumpConsumer for Loader<'_, S, H> {
    fn uuid_record(&mut self, uuid: &str) -> Result<()> {
        match self.options.uuid_action {
            UuidAction::Ignore => Ok(()),
            UuidAction::IfEmpty if self.store.youngest_revision() != 0 => Ok(()),
            _ => self.store.set_uuid(uuid),
        }
    }

    fn new_revision_record(&mut self, headers: &Headers) -> Result<()> {
        let rev = parse_rev(
            headers
                .get(dump::REVISION_NUMBER)
                .ok_or_else(|| Error::malformed("revision record without a number"))?,
        )?;
        let head = self.store.youngest_revision();
        let rev_offset = rev as i64 - (head as i64 + 1);

        if rev > 0 {
            self.store.begin_txn(head)?;
            if self.oldest_old_rev.is_none() {
                self.oldest_old_rev = Some(rev);
            }
            tracing::debug!(rev, head, "started load transaction");
        }
        // Revision 0 carries no transaction: only its properties matter,
        // and only when the store is still empty.

        self.current = Some(RevState {
            rev,
            rev_offset,
            datestamp: None,
        });
        Ok(())
    }

    fn new_node_record(&mut self, headers: &Headers) -> Result<()> {
        let rev = self.current()?;
        if rev.rev == 0 {
            return Err(Error::malformed(
                "malformed dumpstream: revision 0 must not contain node records",
            ));
        }
        let rev_offset = rev.rev_offset;

        let path = self.prefixed_path(
            headers
                .get(dump::NODE_PATH)
                .ok_or_else(|| Error::malformed("node record without a path"))?,
        );
        let kind = match headers.get(dump::NODE_KIND).map(String::as_str) {
            Some("file") => Some(NodeKind::File),
            Some("dir") => Some(NodeKind::Dir),
            _ => None,
        };
        let action = match headers.get(dump::NODE_ACTION).map(String::as_str) {
            Some("change") => NodeAction::Change,
            Some("add") => NodeAction::Add,
            Some("delete") => NodeAction::Delete,
            Some("replace") => NodeAction::Replace,
            _ => {
                return Err(Error::malformed(format!(
                    "unrecognized node-action on node '{path}'"
                )));
            }
        };
        let copyfrom = match (
            headers.get(dump::NODE_COPYFROM_REV),
            headers.get(dump::NODE_COPYFROM_PATH),
        ) {
            (Some(rev), Some(path)) => Some((parse_rev(rev)?, self.prefixed_path(path))),
            _ => None,
        };
        let copy_source_checksum = headers.get(dump::TEXT_COPY_SOURCE_MD5).cloned();

        match action {
            NodeAction::Change => {}
            NodeAction::Delete => self.store.delete_node(&path)?,
            NodeAction::Add => self.maybe_add_with_history(
                &path,
                kind,
                copyfrom,
                copy_source_checksum.as_deref(),
                rev_offset,
            )?,
            NodeAction::Replace => {
                self.store.delete_node(&path)?;
                self.maybe_add_with_history(
                    &path,
                    kind,
                    copyfrom,
                    copy_source_checksum.as_deref(),
                    rev_offset,
                )?;
            }
        }

        self.node = Some(NodeState {
            path,
            text: None,
            result_checksum: headers.get(dump::TEXT_CONTENT_MD5).cloned(),
            result_sha1: headers.get(dump::TEXT_CONTENT_SHA1).cloned(),
            base_checksum: headers.get(dump::TEXT_DELTA_BASE_MD5).cloned(),
        });
        Ok(())
    }

    fn set_revision_property(&mut self, name: &str, value: &[u8]) -> Result<()> {
        let rev = self.current()?.rev;
        if rev > 0 {
            self.store.set_txn_property(name, Some(value.to_vec()))?;
            // Remember any datestamp that passes through; the commit
            // will overwrite it and close_revision puts it back.
            if name == props::REVISION_DATE {
                if let Some(current) = self.current.as_mut() {
                    current.datestamp = Some(value.to_vec());
                }
            }
        } else if self.store.youngest_revision() == 0 {
            // Revision 0 properties apply only when loading into a
            // still-empty store.
            self.store
                .set_revision_property(0, name, Some(value.to_vec()))?;
        }
        Ok(())
    }

    fn set_node_property(&mut self, name: &str, value: &[u8]) -> Result<()> {
        let rev_offset = self.current()?.rev_offset;
        let path = self.node()?.path.clone();

        if name == props::MERGE_INFO {
            let value = std::str::from_utf8(value)
                .map_err(|_| Error::malformed("mergeinfo property is not UTF-8"))?;
            let mut renumbered = self.renumber_mergeinfo(value, rev_offset)?;
            if let Some(parent) = self.options.parent_dir.clone() {
                renumbered = Self::prefix_mergeinfo_paths(&renumbered, &parent)?;
            }
            return self
                .store
                .set_node_property(&path, name, renumbered.into_bytes());
        }
        self.store.set_node_property(&path, name, value.to_vec())
    }

    fn delete_node_property(&mut self, name: &str) -> Result<()> {
        let path = self.node()?.path.clone();
        self.store.delete_node_property(&path, name)
    }

    fn remove_node_props(&mut self) -> Result<()> {
        let path = self.node()?.path.clone();
        self.store.remove_node_props(&path)
    }

    fn fulltext_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let node = self
            .node
            .as_mut()
            .ok_or_else(|| Error::malformed("text outside a node record"))?;
        node.text
            .get_or_insert_with(|| TextWrite {
                base: None,
                out: Vec::new(),
            })
            .out
            .extend_from_slice(chunk);
        Ok(())
    }

    fn delta_window(&mut self, window: Window) -> Result<()> {
        // Fetch the delta base lazily, on the first window.
        if self.node()?.text.is_none() {
            let path = self.node()?.path.clone();
            let base = self.store.txn_file_contents(&path)?;
            if let Some(expected) = &self.node()?.base_checksum {
                let actual = md5_hex(&base);
                if *expected != actual {
                    return Err(Error::ChecksumMismatch {
                        path,
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
            if let Some(node) = self.node.as_mut() {
                node.text = Some(TextWrite {
                    base: Some(base),
                    out: Vec::new(),
                });
            }
        }

        let node = self.node.as_mut().expect("node checked above");
        let text = node.text.as_mut().expect("text initialized above");
        let base = text.base.as_deref().unwrap_or(&[]);

        let sview_end = window
            .sview_offset
            .checked_add(window.sview_len)
            .filter(|&end| end <= base.len() as u64)
            .ok_or_else(|| Error::malformed("delta source view outside delta base"))?;
        let source = &base[window.sview_offset as usize..sview_end as usize];
        let produced = window.apply(source)?;
        text.out.extend_from_slice(&produced);
        Ok(())
    }

    fn close_node(&mut self) -> Result<()> {
        self.finish_text()
    }

    fn close_revision(&mut self) -> Result<()> {
        let Some(rev) = self.current.take() else {
            return Ok(());
        };
        if rev.rev == 0 {
            return Ok(());
        }

        let base = self.store.youngest_revision();
        if self.options.use_pre_commit_hook {
            if let Err(err) = self.hooks.run_pre_commit(base) {
                let _ = self.store.abort_txn();
                return Err(err);
            }
        }

        let new_rev = match self.store.commit_txn() {
            Ok(new_rev) => new_rev,
            Err(err) => {
                let _ = self.store.abort_txn();
                return Err(err);
            }
        };

        // A post-commit hook failure is surfaced, but the revision is
        // durable: finish the bookkeeping for it first.
        let post_commit_err = if self.options.use_post_commit_hook {
            self.hooks.run_post_commit(new_rev).err()
        } else {
            None
        };

        // Record the stream-rev -> store-rev mapping so later copy-from
        // and mergeinfo references resolve.
        self.rev_map.insert(rev.rev, new_rev);

        // Non-contiguous streams (svndumpfilter --drop-empty-revs
        // without --renumber-revs) leave gaps; map each dropped
        // revision to the store revision of the last loaded one so
        // mergeinfo referring into a gap still lands somewhere sane.
        if let Some(last) = self.last_rev_mapped {
            if rev.rev != last + 1 {
                let target = self.rev_map[&last];
                for gap in last + 1..rev.rev {
                    self.rev_map.insert(gap, target);
                }
            }
        }
        self.last_rev_mapped = Some(rev.rev);

        // The commit stamped its own datestamp; restore the dump's
        // original (or its absence).
        self.store
            .set_revision_property(new_rev, props::REVISION_DATE, rev.datestamp)?;

        if let Some(err) = post_commit_err {
            tracing::warn!(rev = new_rev, error = %err, "post-commit hook failed");
            return Err(Error::PostCommitHookFailed {
                revision: new_rev,
                message: err.to_string(),
            });
        }

        tracing::debug!(stream_rev = rev.rev, store_rev = new_rev, "committed revision");
        Ok(())
    }

    fn handles_deltas(&self) -> bool {
        true
    }

    fn mergeinfo_normalized(&mut self) {
        tracing::debug!("normalized CR line endings in svn:mergeinfo");
    }
}

/// Load a complete dump stream into `store`.
pub fn load<R: BufRead, S: TxnStore, H: HookRunner>(
    reader: &mut R,
    store: &mut S,
    hooks: H,
    options: LoadOptions,
    cancel: Option<&mut dyn FnMut() -> bool>,
) -> Result<()> {
    let mut loader = Loader::new(store, hooks, options);
    let result = dump::parse_dumpstream(reader, &mut loader, cancel);
    if result.is_err() {
        loader.abort_pending();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use crate::store::MemStore;

    fn loader(store: &mut MemStore) -> Loader<'_, MemStore, NoopHooks> {
        Loader::new(store, NoopHooks, LoadOptions::with_history())
    }

    #[test]
    fn test_renumber_uses_rev_map() {
        let mut store = MemStore::new();
        let mut l = loader(&mut store);
        l.oldest_old_rev = Some(1);
        l.rev_map.insert(1, 4);
        l.rev_map.insert(2, 5);
        l.rev_map.insert(3, 6);
        // 1-3 in stream numbering is (0,3]; start 0 is "one before the
        // oldest" and resolves to map[1]-1 = 3.
        assert_eq!(l.renumber_mergeinfo("/trunk:1-3", 0).unwrap(), "/trunk:4-6");
    }

    #[test]
    fn test_renumber_splits_predating_ranges() {
        let mut store = MemStore::new();
        let mut l = loader(&mut store);
        // Stream starts at r3; its r3 landed on store r1 (offset +2).
        l.oldest_old_rev = Some(3);
        l.rev_map.insert(3, 1);
        l.rev_map.insert(4, 2);
        // 1-4: revisions 1-2 predate the stream and are shifted by the
        // offset; 3-4 go through the map. r1 sources are stripped, and
        // the shifted 1-2 collapses to nothing after the -2 adjustment.
        assert_eq!(l.renumber_mergeinfo("/trunk:1-4", 2).unwrap(), "/trunk:2");
        // An unmappable start leaves the whole range untouched.
        assert_eq!(l.renumber_mergeinfo("/trunk:6-9", 2).unwrap(), "/trunk:6-9");
    }

    #[test]
    fn test_gap_revisions_backfill_map() {
        let mut store = MemStore::new();
        let mut l = loader(&mut store);

        let mut headers = Headers::new();
        headers.insert(dump::REVISION_NUMBER.into(), "5".into());
        l.new_revision_record(&headers).unwrap();
        l.close_revision().unwrap();

        headers.insert(dump::REVISION_NUMBER.into(), "9".into());
        l.new_revision_record(&headers).unwrap();
        l.close_revision().unwrap();

        assert_eq!(l.rev_map[&5], 1);
        assert_eq!(l.rev_map[&9], 2);
        // Gap revisions 6..=8 resolve to r5's landing spot.
        assert_eq!(l.rev_map[&6], 1);
        assert_eq!(l.rev_map[&7], 1);
        assert_eq!(l.rev_map[&8], 1);
    }

    #[test]
    fn test_uuid_actions() {
        let mut store = MemStore::new();
        {
            let mut l = loader(&mut store);
            l.uuid_record("first-uuid").unwrap();
        }
        assert_eq!(store.uuid(), "first-uuid");

        // Non-empty store: IfEmpty ignores, Force overrides.
        store.begin_txn(0).unwrap();
        store.commit_txn().unwrap();
        {
            let mut l = loader(&mut store);
            l.uuid_record("second-uuid").unwrap();
        }
        assert_eq!(store.uuid(), "first-uuid");
        {
            let mut l = Loader::new(
                &mut store,
                NoopHooks,
                LoadOptions {
                    uuid_action: UuidAction::Force,
                    ..LoadOptions::with_history()
                },
            );
            l.uuid_record("forced-uuid").unwrap();
        }
        assert_eq!(store.uuid(), "forced-uuid");
    }

    #[test]
    fn test_revision_zero_props_only_when_store_empty() {
        let mut store = MemStore::new();
        {
            let mut l = loader(&mut store);
            let mut headers = Headers::new();
            headers.insert(dump::REVISION_NUMBER.into(), "0".into());
            l.new_revision_record(&headers).unwrap();
            l.set_revision_property("custom:origin", b"mirror").unwrap();
            l.close_revision().unwrap();
        }
        assert_eq!(
            store.revision_properties(0).unwrap()["custom:origin"],
            b"mirror"
        );

        store.begin_txn(0).unwrap();
        store.commit_txn().unwrap();
        {
            let mut l = loader(&mut store);
            let mut headers = Headers::new();
            headers.insert(dump::REVISION_NUMBER.into(), "0".into());
            l.new_revision_record(&headers).unwrap();
            l.set_revision_property("custom:origin", b"other").unwrap();
            l.close_revision().unwrap();
        }
        assert_eq!(
            store.revision_properties(0).unwrap()["custom:origin"],
            b"mirror"
        );
    }

    struct FailingPostHook;

    impl HookRunner for FailingPostHook {
        fn run_pre_commit(&self, _base_rev: Revnum) -> Result<()> {
            Ok(())
        }
        fn run_post_commit(&self, _rev: Revnum) -> Result<()> {
            Err(Error::HookFailed {
                hook: "post-commit".into(),
                message: "mailer down".into(),
            })
        }
    }

    #[test]
    fn test_post_commit_failure_still_records_the_revision() {
        let mut store = MemStore::new();
        let mapped = {
            let mut l = Loader::new(
                &mut store,
                FailingPostHook,
                LoadOptions {
                    use_post_commit_hook: true,
                    ..LoadOptions::with_history()
                },
            );
            let mut headers = Headers::new();
            headers.insert(dump::REVISION_NUMBER.into(), "1".into());
            l.new_revision_record(&headers).unwrap();
            l.set_revision_property(props::REVISION_DATE, b"1999-12-31T23:59:59.000000Z")
                .unwrap();
            let err = l.close_revision().unwrap_err();
            assert!(matches!(
                err,
                Error::PostCommitHookFailed { revision: 1, .. }
            ));
            l.rev_map[&1]
        };
        // The revision is durable and fully booked: it is in the map
        // and carries the stream's datestamp, not the commit's.
        assert_eq!(mapped, 1);
        assert_eq!(
            store.revision_properties(1).unwrap()[props::REVISION_DATE],
            b"1999-12-31T23:59:59.000000Z"
        );
    }

    #[test]
    fn test_node_record_in_revision_zero_rejected() {
        let mut store = MemStore::new();
        let mut l = loader(&mut store);
        let mut headers = Headers::new();
        headers.insert(dump::REVISION_NUMBER.into(), "0".into());
        l.new_revision_record(&headers).unwrap();

        let mut node = Headers::new();
        node.insert(dump::NODE_PATH.into(), "a".into());
        node.insert(dump::NODE_ACTION.into(), "add".into());
        assert!(matches!(
            l.new_node_record(&node),
            Err(Error::MalformedData(_))
        ));
    }
}
