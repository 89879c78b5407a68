//! End-to-end tests: dump streams through the parser and loader into a
//! store, plus replay of the result.

use bytes::Bytes;
use rsvn_store::svndiff::{Op, SvndiffEncoder, Window};
use rsvn_store::{
    Error, LoadOptions, Loader, MemStore, NoopHooks, TxnStore, load, md5_hex, parse_dumpstream,
    props, sha1_hex,
};

/// Assembles dump streams with correct length headers.
struct DumpBuilder {
    bytes: Vec<u8>,
}

fn prop_block(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (k, v) in pairs {
        out.extend(
            format!("K {}\n{}\nV {}\n{}\n", k.len(), k, v.len(), v).into_bytes(),
        );
    }
    out.extend(b"PROPS-END\n");
    out
}

impl DumpBuilder {
    fn new(version: u32) -> Self {
        Self {
            bytes: format!("SVN-fs-dump-format-version: {version}\n\n").into_bytes(),
        }
    }

    fn uuid(mut self, uuid: &str) -> Self {
        self.bytes.extend(format!("UUID: {uuid}\n\n").into_bytes());
        self
    }

    fn revision(mut self, rev: u64, props: &[(&str, &str)]) -> Self {
        let block = prop_block(props);
        self.bytes.extend(
            format!(
                "Revision-number: {rev}\nProp-content-length: {}\nContent-length: {}\n\n",
                block.len(),
                block.len()
            )
            .into_bytes(),
        );
        self.bytes.extend(block);
        self.bytes.push(b'\n');
        self
    }

    /// A node record. `headers` carries Node-path/-kind/-action and any
    /// checksum or delta headers; length headers are derived.
    fn node(
        mut self,
        headers: &[(&str, &str)],
        props: Option<&[(&str, &str)]>,
        text: Option<&[u8]>,
    ) -> Self {
        for (k, v) in headers {
            self.bytes.extend(format!("{k}: {v}\n").into_bytes());
        }
        let prop_bytes = props.map(prop_block);
        let prop_len = prop_bytes.as_ref().map_or(0, Vec::len);
        let text_len = text.map_or(0, <[u8]>::len);
        if let Some(block) = &prop_bytes {
            self.bytes
                .extend(format!("Prop-content-length: {}\n", block.len()).into_bytes());
        }
        if let Some(text) = text {
            self.bytes
                .extend(format!("Text-content-length: {}\n", text.len()).into_bytes());
        }
        self.bytes
            .extend(format!("Content-length: {}\n\n", prop_len + text_len).into_bytes());
        if let Some(block) = prop_bytes {
            self.bytes.extend(block);
        }
        if let Some(text) = text {
            self.bytes.extend(text);
        }
        self.bytes.extend(b"\n\n");
        self
    }

    fn build(self) -> Vec<u8> {
        self.bytes
    }
}

fn load_into(store: &mut MemStore, dump: &[u8]) -> rsvn_store::Result<()> {
    let mut reader = dump;
    load(
        &mut reader,
        store,
        NoopHooks,
        LoadOptions::with_history(),
        None,
    )
}

fn simple_dump() -> Vec<u8> {
    let content = b"hello, world\n";
    DumpBuilder::new(2)
        .uuid("5e3a7b60-f86a-4b66-b001-c4e4e7c4e111")
        .revision(
            1,
            &[
                ("svn:log", "initial import"),
                ("svn:author", "alice"),
                ("svn:date", "2005-04-01T12:00:00.000000Z"),
            ],
        )
        .node(
            &[
                ("Node-path", "trunk"),
                ("Node-kind", "dir"),
                ("Node-action", "add"),
            ],
            None,
            None,
        )
        .node(
            &[
                ("Node-path", "trunk/hello.txt"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
                ("Text-content-md5", &md5_hex(content)),
                ("Text-content-sha1", &sha1_hex(content)),
            ],
            None,
            Some(content),
        )
        .build()
}

#[test]
fn test_load_simple_dump() {
    let mut store = MemStore::new();
    load_into(&mut store, &simple_dump()).unwrap();

    assert_eq!(store.youngest_revision(), 1);
    assert_eq!(store.uuid(), "5e3a7b60-f86a-4b66-b001-c4e4e7c4e111");
    assert_eq!(
        store.file_contents(1, "trunk/hello.txt").unwrap(),
        Bytes::from_static(b"hello, world\n")
    );
    assert_eq!(
        store.file_checksum(1, "trunk/hello.txt").unwrap(),
        md5_hex(b"hello, world\n")
    );

    let rev_props = store.revision_properties(1).unwrap();
    assert_eq!(rev_props[props::REVISION_LOG], b"initial import");
    assert_eq!(rev_props[props::REVISION_AUTHOR], b"alice");
    // The dump's datestamp wins over the commit wallclock stamp.
    assert_eq!(
        rev_props[props::REVISION_DATE],
        b"2005-04-01T12:00:00.000000Z"
    );
}

#[test]
fn test_text_checksum_mismatch_stops_load() {
    let dump = DumpBuilder::new(2)
        .revision(1, &[("svn:log", "bad")])
        .node(
            &[
                ("Node-path", "f"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
                ("Text-content-md5", &md5_hex(b"something else")),
            ],
            None,
            Some(b"actual bytes"),
        )
        .build();

    let mut store = MemStore::new();
    let err = load_into(&mut store, &dump).unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }), "{err:?}");
    // The failed revision never committed, and its transaction was
    // rolled back: the store accepts a new one.
    assert_eq!(store.youngest_revision(), 0);
    store.begin_txn(0).unwrap();
}

#[test]
fn test_sha1_checksum_mismatch_stops_load() {
    let dump = DumpBuilder::new(2)
        .revision(1, &[("svn:log", "bad")])
        .node(
            &[
                ("Node-path", "f"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
                ("Text-content-md5", &md5_hex(b"actual bytes")),
                ("Text-content-sha1", &sha1_hex(b"something else")),
            ],
            None,
            Some(b"actual bytes"),
        )
        .build();

    let mut store = MemStore::new();
    let err = load_into(&mut store, &dump).unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }), "{err:?}");
    assert_eq!(store.youngest_revision(), 0);
}

#[test]
fn test_copy_with_verified_source_checksum() {
    let dump = DumpBuilder::new(2)
        .revision(1, &[("svn:log", "add")])
        .node(
            &[
                ("Node-path", "a"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
            ],
            None,
            Some(b"alpha"),
        )
        .revision(2, &[("svn:log", "branch")])
        .node(
            &[
                ("Node-path", "b"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
                ("Node-copyfrom-rev", "1"),
                ("Node-copyfrom-path", "a"),
                ("Text-copy-source-md5", &md5_hex(b"alpha")),
            ],
            None,
            None,
        )
        .build();

    let mut store = MemStore::new();
    load_into(&mut store, &dump).unwrap();
    assert_eq!(store.file_contents(2, "b").unwrap(), Bytes::from_static(b"alpha"));
    let changes = store.paths_changed(2).unwrap();
    assert_eq!(changes[0].copyfrom, Some((1, "a".to_string())));
}

#[test]
fn test_copy_source_checksum_mismatch_stops_load() {
    let dump = DumpBuilder::new(2)
        .revision(1, &[("svn:log", "add")])
        .node(
            &[
                ("Node-path", "a"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
            ],
            None,
            Some(b"alpha"),
        )
        .revision(2, &[("svn:log", "branch")])
        .node(
            &[
                ("Node-path", "b"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
                ("Node-copyfrom-rev", "1"),
                ("Node-copyfrom-path", "a"),
                ("Text-copy-source-md5", &md5_hex(b"not alpha")),
            ],
            None,
            None,
        )
        .build();

    let mut store = MemStore::new();
    let err = load_into(&mut store, &dump).unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }), "{err:?}");
    // r1 survived; r2 did not, and its transaction is gone.
    assert_eq!(store.youngest_revision(), 1);
    assert_eq!(store.file_contents(1, "a").unwrap(), Bytes::from_static(b"alpha"));
    store.begin_txn(1).unwrap();
}

#[test]
fn test_filtered_stream_gap_revisions_share_mapping() {
    // Revisions 5 and 7, with 6 filtered away.
    let dump = DumpBuilder::new(2)
        .revision(5, &[("svn:log", "five")])
        .node(
            &[
                ("Node-path", "a"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
            ],
            None,
            Some(b"five"),
        )
        .revision(7, &[("svn:log", "seven")])
        .node(
            &[
                ("Node-path", "b"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
            ],
            None,
            Some(b"seven"),
        )
        .build();

    let mut store = MemStore::new();
    let mut loader = Loader::new(&mut store, NoopHooks, LoadOptions::with_history());
    let mut reader = dump.as_slice();
    parse_dumpstream(&mut reader, &mut loader, None).unwrap();

    let map = loader.rev_map().clone();
    assert_eq!(map[&5], 1);
    assert_eq!(map[&7], 2);
    // The missing revision resolves to the same target as its
    // predecessor, so mergeinfo pointing at it stays meaningful.
    assert_eq!(map[&6], map[&5]);
    assert_eq!(store.youngest_revision(), 2);
}

#[test]
fn test_mergeinfo_renumbered_against_existing_history() {
    // One local revision exists before the load, shifting every stream
    // revision by one.
    let mut store = MemStore::new();
    store.begin_txn(0).unwrap();
    store.make_dir("local").unwrap();
    store.commit_txn().unwrap();

    let dump = DumpBuilder::new(2)
        .revision(1, &[("svn:log", "trunk")])
        .node(
            &[
                ("Node-path", "trunk"),
                ("Node-kind", "dir"),
                ("Node-action", "add"),
            ],
            None,
            None,
        )
        .revision(2, &[("svn:log", "fix")])
        .node(
            &[
                ("Node-path", "trunk/f"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
            ],
            None,
            Some(b"fix"),
        )
        .revision(3, &[("svn:log", "merge")])
        .node(
            &[
                ("Node-path", "branch"),
                ("Node-kind", "dir"),
                ("Node-action", "add"),
            ],
            Some(&[("svn:mergeinfo", "/trunk:2")]),
            None,
        )
        .build();

    load_into(&mut store, &dump).unwrap();
    assert_eq!(store.youngest_revision(), 4);

    let props = store.node_props(4, "branch").unwrap();
    let mergeinfo = std::str::from_utf8(&props["svn:mergeinfo"]).unwrap();
    // Stream r2 landed as store r3.
    assert_eq!(mergeinfo, "/trunk:3");
}

#[test]
fn test_parent_dir_prefixes_paths_and_mergeinfo() {
    let mut store = MemStore::new();
    store.begin_txn(0).unwrap();
    store.make_dir("import").unwrap();
    store.commit_txn().unwrap();

    let dump = DumpBuilder::new(2)
        .revision(1, &[("svn:log", "trunk")])
        .node(
            &[
                ("Node-path", "trunk"),
                ("Node-kind", "dir"),
                ("Node-action", "add"),
            ],
            None,
            None,
        )
        .revision(2, &[("svn:log", "merge")])
        .node(
            &[
                ("Node-path", "branch"),
                ("Node-kind", "dir"),
                ("Node-action", "add"),
            ],
            Some(&[("svn:mergeinfo", "/trunk:1")]),
            None,
        )
        .build();

    let mut reader = dump.as_slice();
    let options = LoadOptions {
        parent_dir: Some("import".to_string()),
        ..LoadOptions::with_history()
    };
    load(&mut reader, &mut store, NoopHooks, options, None).unwrap();

    assert_eq!(
        store.node_kind(3, "import/trunk").unwrap(),
        Some(rsvn_store::NodeKind::Dir)
    );
    let props = store.node_props(3, "import/branch").unwrap();
    let mergeinfo = std::str::from_utf8(&props["svn:mergeinfo"]).unwrap();
    // Renumbered (stream r1 became store r2) and re-rooted.
    assert_eq!(mergeinfo, "/import/trunk:2");
}

#[test]
fn test_delta_dump_applies_against_previous_text() {
    let base = b"hello, ";
    let target = b"hello, world";

    let mut encoder = SvndiffEncoder::new(Vec::new());
    encoder
        .write_window(&Window {
            sview_offset: 0,
            sview_len: base.len() as u64,
            tview_len: target.len() as u64,
            ops: vec![
                Op::Source {
                    offset: 0,
                    len: base.len() as u64,
                },
                Op::New { len: 5 },
            ],
            new_data: b"world".to_vec(),
        })
        .unwrap();
    let delta = encoder.finish().unwrap();

    let dump = DumpBuilder::new(3)
        .revision(1, &[("svn:log", "base")])
        .node(
            &[
                ("Node-path", "f"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
                ("Text-content-md5", &md5_hex(base)),
            ],
            None,
            Some(base),
        )
        .revision(2, &[("svn:log", "delta")])
        .node(
            &[
                ("Node-path", "f"),
                ("Node-kind", "file"),
                ("Node-action", "change"),
                ("Text-delta", "true"),
                ("Text-delta-base-md5", &md5_hex(base)),
                ("Text-content-md5", &md5_hex(target)),
            ],
            None,
            Some(&delta),
        )
        .build();

    let mut store = MemStore::new();
    load_into(&mut store, &dump).unwrap();
    assert_eq!(
        store.file_contents(2, "f").unwrap(),
        Bytes::from_static(target)
    );
    // The base text is still what r1 recorded.
    assert_eq!(store.file_contents(1, "f").unwrap(), Bytes::from_static(base));
}

#[test]
fn test_delete_and_replace_actions() {
    let dump = DumpBuilder::new(2)
        .revision(1, &[("svn:log", "add")])
        .node(
            &[
                ("Node-path", "doomed"),
                ("Node-kind", "file"),
                ("Node-action", "add"),
            ],
            None,
            Some(b"old"),
        )
        .revision(2, &[("svn:log", "gone")])
        .node(&[("Node-path", "doomed"), ("Node-action", "delete")], None, None)
        .build();

    let mut store = MemStore::new();
    load_into(&mut store, &dump).unwrap();
    assert_eq!(store.node_kind(2, "doomed").unwrap(), None);
    assert_eq!(
        store.node_kind(1, "doomed").unwrap(),
        Some(rsvn_store::NodeKind::File)
    );
}

#[test]
fn test_cancellation_between_records() {
    let mut store = MemStore::new();
    let dump = simple_dump();
    let mut reader = dump.as_slice();
    let mut polls = 0;
    let mut cancel = || {
        polls += 1;
        polls > 2
    };
    let err = load(
        &mut reader,
        &mut store,
        NoopHooks,
        LoadOptions::with_history(),
        Some(&mut cancel),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err:?}");
}

#[cfg(unix)]
mod hook_tests {
    use super::*;
    use rsvn_store::HookManager;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn install_hook(repo: &std::path::Path, name: &str, script: &str) {
        let dir = repo.join("hooks");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn hook_options() -> LoadOptions {
        LoadOptions {
            use_pre_commit_hook: true,
            use_post_commit_hook: true,
            ..LoadOptions::with_history()
        }
    }

    #[test]
    fn test_hooks_invoked_during_load() {
        let tmp = TempDir::new().unwrap();
        let pre_log = tmp.path().join("pre.log");
        let post_log = tmp.path().join("post.log");
        install_hook(
            tmp.path(),
            "pre-commit",
            &format!("#!/bin/bash\ncat >> {}\n", pre_log.display()),
        );
        install_hook(
            tmp.path(),
            "post-commit",
            &format!("#!/bin/bash\ncat >> {}\n", post_log.display()),
        );

        let mut store = MemStore::new();
        let dump = simple_dump();
        let mut reader = dump.as_slice();
        load(
            &mut reader,
            &mut store,
            HookManager::new(tmp.path().to_path_buf()),
            hook_options(),
            None,
        )
        .unwrap();

        assert_eq!(store.youngest_revision(), 1);
        assert_eq!(fs::read_to_string(pre_log).unwrap(), "BASE-REVISION: 0\n");
        assert_eq!(fs::read_to_string(post_log).unwrap(), "REVISION: 1\n");
    }

    #[test]
    fn test_pre_commit_rejection_aborts_revision() {
        let tmp = TempDir::new().unwrap();
        install_hook(
            tmp.path(),
            "pre-commit",
            "#!/bin/bash\necho 'no imports today' >&2\nexit 1\n",
        );

        let mut store = MemStore::new();
        let dump = simple_dump();
        let mut reader = dump.as_slice();
        let err = load(
            &mut reader,
            &mut store,
            HookManager::new(tmp.path().to_path_buf()),
            hook_options(),
            None,
        )
        .unwrap_err();

        match err {
            Error::HookFailed { hook, message } => {
                assert_eq!(hook, "pre-commit");
                assert!(message.contains("no imports today"), "got: {message}");
            }
            other => panic!("expected HookFailed, got {other:?}"),
        }
        assert_eq!(store.youngest_revision(), 0);
    }

    #[test]
    fn test_post_commit_failure_keeps_commit() {
        let tmp = TempDir::new().unwrap();
        install_hook(
            tmp.path(),
            "post-commit",
            "#!/bin/bash\necho 'mailer down' >&2\nexit 1\n",
        );

        let mut store = MemStore::new();
        let dump = simple_dump();
        let mut reader = dump.as_slice();
        let err = load(
            &mut reader,
            &mut store,
            HookManager::new(tmp.path().to_path_buf()),
            hook_options(),
            None,
        )
        .unwrap_err();

        match err {
            Error::PostCommitHookFailed { revision, message } => {
                assert_eq!(revision, 1);
                assert!(message.contains("mailer down"), "got: {message}");
            }
            other => panic!("expected PostCommitHookFailed, got {other:?}"),
        }
        // The commit is durable even though the hook failed, and its
        // bookkeeping completed: the dump's datestamp still wins over
        // the commit wallclock stamp.
        assert_eq!(store.youngest_revision(), 1);
        let rev_props = store.revision_properties(1).unwrap();
        assert_eq!(
            rev_props[props::REVISION_DATE],
            b"2005-04-01T12:00:00.000000Z"
        );
    }
}

mod replay_tests {
    use super::*;
    use rsvn_store::svndiff::Window as DeltaWindow;
    use rsvn_store::{ReplayOptions, Revnum, TreeEditor, replay};

    /// Applies edit calls to a second store, one transaction per drive.
    struct ApplyEditor<'a> {
        store: &'a mut MemStore,
    }

    impl TreeEditor for ApplyEditor<'_> {
        fn open_root(&mut self, _base_rev: Revnum) -> rsvn_store::Result<()> {
            let head = self.store.youngest_revision();
            self.store.begin_txn(head)
        }
        fn delete_entry(&mut self, path: &str, _rev: Revnum) -> rsvn_store::Result<()> {
            self.store.delete_node(path)
        }
        fn add_directory(
            &mut self,
            path: &str,
            copyfrom: Option<(Revnum, String)>,
        ) -> rsvn_store::Result<()> {
            match copyfrom {
                Some((rev, from)) => self.store.copy_node(rev, &from, path),
                None => self.store.make_dir(path),
            }
        }
        fn open_directory(&mut self, _path: &str, _base_rev: Revnum) -> rsvn_store::Result<()> {
            Ok(())
        }
        fn add_file(
            &mut self,
            path: &str,
            copyfrom: Option<(Revnum, String)>,
        ) -> rsvn_store::Result<()> {
            match copyfrom {
                Some((rev, from)) => self.store.copy_node(rev, &from, path),
                None => self.store.make_file(path),
            }
        }
        fn open_file(&mut self, _path: &str, _base_rev: Revnum) -> rsvn_store::Result<()> {
            Ok(())
        }
        fn change_dir_prop(
            &mut self,
            path: &str,
            name: &str,
            value: Option<Vec<u8>>,
        ) -> rsvn_store::Result<()> {
            match value {
                Some(value) => self.store.set_node_property(path, name, value),
                None => self.store.delete_node_property(path, name),
            }
        }
        fn change_file_prop(
            &mut self,
            path: &str,
            name: &str,
            value: Option<Vec<u8>>,
        ) -> rsvn_store::Result<()> {
            self.change_dir_prop(path, name, value)
        }
        fn apply_textdelta(
            &mut self,
            path: &str,
            windows: Vec<DeltaWindow>,
        ) -> rsvn_store::Result<()> {
            let mut text = Vec::new();
            for window in &windows {
                text.extend(window.apply(&[])?);
            }
            self.store.set_file_contents(path, Bytes::from(text))
        }
        fn close_edit(&mut self) -> rsvn_store::Result<()> {
            self.store.commit_txn().map(|_| ())
        }
    }

    #[test]
    fn test_loaded_history_replays_into_equivalent_store() {
        let mut source = MemStore::new();
        load_into(&mut source, &simple_dump()).unwrap();

        let mut mirror = MemStore::new();
        let mut authz = |_rev: Revnum, _path: &str| true;
        {
            let mut editor = ApplyEditor { store: &mut mirror };
            replay(
                &source,
                1,
                &ReplayOptions::default(),
                &mut editor,
                &mut authz,
            )
            .unwrap();
        }

        assert_eq!(mirror.youngest_revision(), 1);
        assert_eq!(
            mirror.file_contents(1, "trunk/hello.txt").unwrap(),
            source.file_contents(1, "trunk/hello.txt").unwrap()
        );
        assert_eq!(
            mirror.file_checksum(1, "trunk/hello.txt").unwrap(),
            source.file_checksum(1, "trunk/hello.txt").unwrap()
        );
    }
}
