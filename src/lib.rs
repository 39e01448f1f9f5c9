use crate::config::SyncConfig;
use std::path::PathBuf;

pub mod config;
pub mod error;
pub mod fetch;
pub mod git;
pub mod id;
pub mod store;
pub mod sync;
pub mod transform;
pub mod utils;

#[derive(Clone, Debug)]
pub struct SyncContext {
    pub config: SyncConfig,
    /// Directory of the git working tree that receives the documents.
    pub store_dir: PathBuf,
    /// When false the run stops after reporting whether anything changed.
    pub publish: bool,
}
