//! Well-known revision and node property names

/// Commit log message
pub const REVISION_LOG: &str = "svn:log";

/// Commit author
pub const REVISION_AUTHOR: &str = "svn:author";

/// Commit datestamp. The store's commit operation stamps its own "now"
/// value here; the loader overwrites it with the dump's original value.
pub const REVISION_DATE: &str = "svn:date";

/// Merge tracking metadata: path -> set of revision ranges
pub const MERGE_INFO: &str = "svn:mergeinfo";
