//! sftkit Hub
//!
//! Thin client for a Hugging Face compatible hub:
//! - Token discovery (`HubToken`)
//! - Cached downloads of model configs, weights, tokenizers and dataset splits
//! - Publishing a folder as a commit (inline files + LFS)

pub mod download;
pub mod error;
pub mod files;
pub mod repo;
pub mod token;
pub mod upload;

pub use download::HubClient;
pub use error::{HubError, HubResult};
pub use files::{DataFormat, WeightLayout, detect_weight_layout, select_split_files, shards_from_index};
pub use repo::{RepoKind, RepoRef, split_repo_id};
pub use token::{HubToken, hf_home};
pub use upload::{CommitOperation, UploadFile, collect_folder, commit_ndjson, sha256_hex};
