//! Tree-delta editor interface
//!
//! Consumers of a replay receive the revision as an ordered series of
//! edit calls. Paths are canonical store paths ("" is the root); the
//! driver guarantees a parent is added or opened before any call that
//! touches one of its children, and that `close_edit` is the final call
//! of a successful drive.

use crate::error::Result;
use crate::store::Revnum;
use crate::svndiff::Window;

/// Receives one revision's worth of tree changes.
///
/// `copyfrom` carries the copy source for adds with history; a plain
/// add passes `None`. Property values of `None` delete the property.
pub trait TreeEditor {
    fn open_root(&mut self, base_rev: Revnum) -> Result<()>;

    fn delete_entry(&mut self, path: &str, rev: Revnum) -> Result<()>;

    fn add_directory(&mut self, path: &str, copyfrom: Option<(Revnum, String)>) -> Result<()>;
    fn open_directory(&mut self, path: &str, base_rev: Revnum) -> Result<()>;

    fn add_file(&mut self, path: &str, copyfrom: Option<(Revnum, String)>) -> Result<()>;
    fn open_file(&mut self, path: &str, base_rev: Revnum) -> Result<()>;

    fn change_dir_prop(&mut self, path: &str, name: &str, value: Option<Vec<u8>>) -> Result<()>;
    fn change_file_prop(&mut self, path: &str, name: &str, value: Option<Vec<u8>>) -> Result<()>;

    /// Deliver a file's new text as delta windows against an empty
    /// source.
    fn apply_textdelta(&mut self, path: &str, windows: Vec<Window>) -> Result<()>;

    fn close_edit(&mut self) -> Result<()>;
}
