//! Module metadata resolution.
//!
//! This module locates module sources (embedded, local or remote), reads
//! their declared inputs and outputs, and caches the result:
//! - Source classification and package/subdirectory splitting
//! - Git and S3 package fetchers
//! - Terraform and Packer schema readers
//! - A concurrency-safe resolver with info and download caches

mod fetcher;
mod info;
mod metadata;
mod reader;
mod resolver;
mod source;

pub use fetcher::{FetcherRegistry, GitFetcher, S3Fetcher, SourceFetcher};
pub use info::{ModuleInfo, OutputInfo, VarInfo};
pub use metadata::{get_metadata_safe, Metadata, MetadataSpec, Requirements, METADATA_FILE};
pub use reader::{ModReader, PackerReader, ReaderRegistry, TerraformReader};
pub use resolver::{embedded_root_from_env, ModuleResolver, MODULES_ROOT_ENV};
pub use source::{classify, is_embedded_path, is_local_path, split_package, SourceKind};
