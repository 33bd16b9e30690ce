//! Fragments - multi-tenant fragment storage with format conversion
//!
//! Users store small pieces of text or image content ("fragments") and read
//! them back either as stored or converted to another representation, e.g.
//! markdown as HTML or a PNG as WebP.
//!
//! ## Architecture
//!
//! ```text
//! HTTP (Basic auth)  ->  Fragment  ->  FragmentStore  ->  KeyValueStore x2
//!                           |                               (metadata, data)
//!                           +---- convert (text / image)
//! ```
//!
//! - **kv**: two-level `owner -> id -> bytes` stores, in memory or on sled
//! - **fragment**: the validated entity plus the store that owns persistence
//! - **convert**: extension-driven conversion between representations
//! - **http**: the REST surface, owner ids derived from Basic credentials
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/fragments/
//! ├── fragments.sled/        # metadata and data trees (sled backend)
//! └── config.toml            # Configuration
//! ```

pub mod auth;
pub mod config;
pub mod convert;
pub mod error;
pub mod fragment;
pub mod http;
pub mod kv;

// Re-exports
pub use auth::Authenticator;
pub use config::Config;
pub use convert::{convert, Converted, Payload};
pub use error::FragmentError;
pub use fragment::{Fragment, FragmentList, FragmentRecord, FragmentStore, NewFragment};
pub use http::HttpServer;
pub use kv::{open_stores, Backend, KeyValueStore, MemoryDb, SledDb, StorePair};
