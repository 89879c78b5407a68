//! RSvn Storage and Transport Core
//!
//! Building blocks for working with versioned repository data:
//! - VarInt and svndiff delta window codecs
//! - Dump-stream parser (format versions 1-3)
//! - Loader with revision renumbering and mergeinfo rewriting
//! - Transactional store abstraction and in-memory implementation
//! - Commit hook runner
//! - Sharded in-memory object cache
//! - Revision replay through a tree-editor interface

pub mod dump;
pub mod editor;
pub mod error;
pub mod hooks;
pub mod load;
pub mod membuffer;
pub mod mergeinfo;
pub mod props;
pub mod replay;
pub mod store;
pub mod svndiff;
pub mod varint;

pub use dump::{DumpConsumer, parse_dumpstream};
pub use editor::TreeEditor;
pub use error::{Error, Result};
pub use hooks::{HookManager, HookRunner, NoopHooks};
pub use load::{LoadOptions, Loader, UuidAction, load};
pub use membuffer::{CacheView, MemBufferCache};
pub use mergeinfo::{MergeRange, Mergeinfo, RangeList};
pub use replay::{ReplayOptions, replay};
pub use store::{
    ChangeKind, MemStore, NodeKind, PathChange, PropMap, Revnum, TxnStore, canonical_path, md5_hex,
    sha1_hex,
};
pub use svndiff::{Op, SvndiffDecoder, SvndiffEncoder, Window, windows_for_content};
