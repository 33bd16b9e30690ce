//! Conversion engine
//!
//! Maps a stored representation `(source mime type, bytes)` to the
//! representation named by a requested file extension.
//!
//! Resolution happens in three steps:
//!
//! 1. the extension is mapped to a target mime type ([`EXTENSIONS`]),
//!    unknown extensions fail with `UnsupportedMediaType`;
//! 2. the extension must be listed for the source type in
//!    [`VALID_CONVERSIONS`], otherwise `UnsupportedConversion`;
//! 3. the `(source, target)` pair is dispatched through the
//!    [`ConversionRegistry`] to a transform.
//!
//! Text transforms work on the UTF-8 decoded payload, image transforms on
//! the raw bytes.

mod avif;
pub mod raster;
pub mod text;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::FragmentError;

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_MARKDOWN: &str = "text/markdown";
pub const TEXT_HTML: &str = "text/html";
pub const TEXT_CSV: &str = "text/csv";
pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_YAML: &str = "application/yaml";
pub const IMAGE_PNG: &str = "image/png";
pub const IMAGE_JPEG: &str = "image/jpeg";
pub const IMAGE_WEBP: &str = "image/webp";
pub const IMAGE_GIF: &str = "image/gif";
pub const IMAGE_AVIF: &str = "image/avif";

/// Extension -> canonical mime type
pub const EXTENSIONS: &[(&str, &str)] = &[
    ("txt", TEXT_PLAIN),
    ("md", TEXT_MARKDOWN),
    ("html", TEXT_HTML),
    ("csv", TEXT_CSV),
    ("json", APPLICATION_JSON),
    ("yaml", APPLICATION_YAML),
    ("yml", APPLICATION_YAML),
    ("png", IMAGE_PNG),
    ("jpg", IMAGE_JPEG),
    ("jpeg", IMAGE_JPEG),
    ("webp", IMAGE_WEBP),
    ("gif", IMAGE_GIF),
    ("avif", IMAGE_AVIF),
];

const IMAGE_TARGETS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "avif"];

/// Source mime type -> extensions it can be rendered as
pub const VALID_CONVERSIONS: &[(&str, &[&str])] = &[
    (TEXT_PLAIN, &["txt"]),
    (TEXT_MARKDOWN, &["md", "html", "txt"]),
    (TEXT_HTML, &["html", "txt"]),
    (TEXT_CSV, &["csv", "txt", "json"]),
    (APPLICATION_JSON, &["json", "yaml", "yml", "txt"]),
    (APPLICATION_YAML, &["yaml", "yml", "txt", "json"]),
    (IMAGE_PNG, IMAGE_TARGETS),
    (IMAGE_JPEG, IMAGE_TARGETS),
    (IMAGE_WEBP, IMAGE_TARGETS),
    (IMAGE_AVIF, IMAGE_TARGETS),
    (IMAGE_GIF, IMAGE_TARGETS),
];

/// Every mime type the engine can read. Fragments of these types can be
/// loaded and converted; which of them may be *created* is decided
/// separately by `Fragment::is_supported_type`.
pub const CONVERTIBLE_TYPES: &[&str] = &[
    TEXT_PLAIN,
    TEXT_MARKDOWN,
    TEXT_HTML,
    TEXT_CSV,
    APPLICATION_JSON,
    APPLICATION_YAML,
    IMAGE_PNG,
    IMAGE_JPEG,
    IMAGE_WEBP,
    IMAGE_AVIF,
    IMAGE_GIF,
];

/// Conversion family of a mime type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Text,
    Image,
}

impl Family {
    pub fn of(mime_type: &str) -> Option<Family> {
        if mime_type.starts_with("image/") && CONVERTIBLE_TYPES.contains(&mime_type) {
            Some(Family::Image)
        } else if CONVERTIBLE_TYPES.contains(&mime_type) {
            Some(Family::Text)
        } else {
            None
        }
    }
}

/// Converted body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Text(text) => Bytes::from(text),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a conversion
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub mime_type: &'static str,
    pub payload: Payload,
}

/// A pure transform from source bytes to the target representation
pub type Transform = fn(&[u8], &'static str) -> Result<Payload, FragmentError>;

/// Map an extension to its canonical mime type
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, mime)| *mime)
}

/// Extensions a source type may be converted to, empty if unknown
pub fn allowed_extensions(source_mime: &str) -> &'static [&'static str] {
    VALID_CONVERSIONS
        .iter()
        .find(|(source, _)| *source == source_mime)
        .map(|(_, exts)| *exts)
        .unwrap_or(&[])
}

/// Mime types reachable from `source_mime`, in table order
pub fn formats_for(source_mime: &str) -> Vec<&'static str> {
    let mut formats: Vec<&'static str> = Vec::new();
    for ext in allowed_extensions(source_mime) {
        if let Some(mime) = mime_for_extension(ext) {
            if !formats.contains(&mime) {
                formats.push(mime);
            }
        }
    }
    formats
}

/// Whether the engine knows how to read `mime_type`
pub fn is_convertible(mime_type: &str) -> bool {
    CONVERTIBLE_TYPES.contains(&mime_type)
}

/// A resolved conversion, ready to run
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub source: &'static str,
    pub target: &'static str,
    pub family: Family,
    transform: Transform,
}

impl Route {
    pub fn run(&self, data: &[u8]) -> Result<Converted, FragmentError> {
        let payload = (self.transform)(data, self.target)?;
        Ok(Converted {
            mime_type: self.target,
            payload,
        })
    }
}

/// `(source, target)` -> transform
pub struct ConversionRegistry {
    routes: HashMap<(&'static str, &'static str), Transform>,
}

impl ConversionRegistry {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Registry with every conversion listed in [`VALID_CONVERSIONS`]
    pub fn standard() -> Self {
        let mut registry = Self::empty();

        for source in [TEXT_PLAIN, TEXT_MARKDOWN, TEXT_HTML, TEXT_CSV, APPLICATION_JSON, APPLICATION_YAML] {
            registry.register(source, source, text::identity);
            registry.register(source, TEXT_PLAIN, text::to_plain);
        }
        registry.register(TEXT_MARKDOWN, TEXT_HTML, text::markdown_to_html);
        registry.register(TEXT_CSV, APPLICATION_JSON, text::csv_to_json);
        registry.register(APPLICATION_YAML, APPLICATION_JSON, text::yaml_to_json);
        registry.register(APPLICATION_JSON, APPLICATION_YAML, text::json_to_yaml);

        let images = [IMAGE_PNG, IMAGE_JPEG, IMAGE_WEBP, IMAGE_GIF, IMAGE_AVIF];
        for source in images {
            for target in images {
                if source == target {
                    registry.register(source, target, raster::identity);
                } else {
                    registry.register(source, target, raster::transcode);
                }
            }
        }

        registry
    }

    pub fn register(&mut self, source: &'static str, target: &'static str, transform: Transform) {
        self.routes.insert((source, target), transform);
    }

    /// Resolve `source_mime` + `ext` to a runnable route
    pub fn resolve(&self, source_mime: &str, ext: &str) -> Result<Route, FragmentError> {
        let target = mime_for_extension(ext).ok_or_else(|| {
            FragmentError::UnsupportedMediaType(format!("Unsupported extension: .{}", ext))
        })?;

        let unsupported = || FragmentError::UnsupportedConversion {
            from: source_mime.to_string(),
            ext: ext.to_string(),
        };

        let ext = ext.to_ascii_lowercase();
        if !allowed_extensions(source_mime).contains(&ext.as_str()) {
            return Err(unsupported());
        }

        let source = CONVERTIBLE_TYPES
            .iter()
            .copied()
            .find(|candidate| *candidate == source_mime)
            .ok_or_else(unsupported)?;
        let transform = *self.routes.get(&(source, target)).ok_or_else(unsupported)?;
        let family = Family::of(source).ok_or_else(unsupported)?;

        Ok(Route {
            source,
            target,
            family,
            transform,
        })
    }

    /// Resolve and run a conversion on the calling thread
    pub fn convert(&self, source_mime: &str, data: &[u8], ext: &str) -> Result<Converted, FragmentError> {
        self.resolve(source_mime, ext)?.run(data)
    }
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

static REGISTRY: LazyLock<ConversionRegistry> = LazyLock::new(ConversionRegistry::standard);

/// Shared standard registry
pub fn registry() -> &'static ConversionRegistry {
    &REGISTRY
}

/// Convert `data` of type `source_mime` to the representation named by
/// `ext`. Image transcoding runs on the blocking thread pool.
pub async fn convert(source_mime: &str, data: Bytes, ext: &str) -> Result<Converted, FragmentError> {
    let route = registry().resolve(source_mime, ext)?;
    debug!(source = %route.source, target = %route.target, "Converting fragment");

    match route.family {
        Family::Text => route.run(&data),
        Family::Image => tokio::task::spawn_blocking(move || route.run(&data))
            .await
            .map_err(|e| FragmentError::Internal(format!("Conversion task failed: {}", e)))?,
    }
}
