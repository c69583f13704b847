//! crabrl-dts - XBRL discoverable taxonomy set resolution
//!
//! Loads an instance (or taxonomy entry point), walks every schema and
//! linkbase it references through a cacheable resource layer, and builds
//! the XLink networks (presentation, calculation, definition, label) that
//! fact validation and rendering operate on.
//!
//! Licensed under AGPL-3.0

pub mod config;
pub mod discovery;
pub mod fragment;
pub mod http;
pub mod linkbase;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod xlink;
pub mod xml;

pub use config::DtsConfig;
pub use fragment::{DocumentFragment, FragmentSet, LoadWarning};
pub use linkbase::{Endpoint, LinkKind, Linkbase, Network, Relationship};
pub use loader::Loader;
pub use registry::ServiceRegistry;
pub use resolver::{CacheMode, CachingResolver, DefaultResolver, ResourceResolver};
pub use schema::Schema;
pub use xlink::{XlinkNode, XlinkType};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No implementation registered for {0}")]
    NotRegistered(&'static str),

    #[error("Resource unavailable: {uri} - {reason}")]
    ResourceUnavailable { uri: String, reason: String },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out after {seconds}s: {uri}")]
    Timeout { uri: String, seconds: u64 },

    #[error("XML error in {uri}: {message}")]
    Xml { uri: String, message: String },

    #[error("Malformed reference: {0}")]
    MalformedReference(String),

    #[error("Failed to load {uri}: {source}")]
    Load {
        uri: String,
        #[source]
        source: Box<Error>,
    },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn unavailable(uri: impl ToString, reason: impl ToString) -> Self {
        Error::ResourceUnavailable {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }
}
