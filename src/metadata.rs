//! Fluent construction of document metadata with auto-detection heuristics.
//!
//! Detection rules:
//! - Source URL host → `source_quality` (official vendor domains, verified
//!   aggregators, community otherwise).
//! - File extension → `language`.
//! - Repository stars ≥ 1000 upgrade community → verified.
//!
//! Defaults applied at build time: `source_quality = community`,
//! `doc_type = tutorial`, and the documentation embedding triple.

use chrono::{DateTime, Utc};

use crate::config::EmbeddingRouteConfig;
use crate::models::{DocumentMetadata, SourceQuality};

/// Hosts treated as first-party vendor documentation.
const OFFICIAL_HOSTS: &[&str] = &[
    "flutter.dev",
    "dart.dev",
    "docs.flutter.dev",
    "api.flutter.dev",
    "pub.dev",
    "developer.android.com",
    "developer.apple.com",
    "firebase.google.com",
    "cloud.google.com",
    "developer.mozilla.org",
    "doc.rust-lang.org",
    "docs.python.org",
    "nodejs.org",
    "reactjs.org",
    "react.dev",
];

/// Hosts treated as moderated aggregators.
const VERIFIED_HOSTS: &[&str] = &[
    "stackoverflow.com",
    "github.com",
    "medium.com",
    "dev.to",
];

const STAR_UPGRADE_THRESHOLD: u64 = 1000;

/// Map a URL host to a provenance tier.
pub fn quality_for_url(url: &str) -> SourceQuality {
    let host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .trim_start_matches("www.")
        .to_ascii_lowercase();

    if OFFICIAL_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    {
        SourceQuality::Official
    } else if VERIFIED_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    {
        SourceQuality::Verified
    } else {
        SourceQuality::Community
    }
}

/// Map a file extension to a language name.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext.trim_start_matches('.') {
        "dart" => Some("dart"),
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "py" => Some("python"),
        "rs" => Some("rust"),
        "go" => Some("go"),
        "java" => Some("java"),
        "kt" => Some("kotlin"),
        "swift" => Some("swift"),
        "md" | "markdown" => Some("markdown"),
        "html" | "htm" => Some("html"),
        _ => None,
    }
}

/// Fluent builder over [`DocumentMetadata`].
#[derive(Debug, Default)]
pub struct MetadataBuilder {
    meta: DocumentMetadata,
    documentation_route: Option<EmbeddingRouteConfig>,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the documentation route used for embedding-triple defaults.
    pub fn with_default_route(mut self, route: EmbeddingRouteConfig) -> Self {
        self.documentation_route = Some(route);
        self
    }

    pub fn doc_type(mut self, doc_type: &str) -> Self {
        self.meta.doc_type = Some(doc_type.to_string());
        self
    }

    pub fn source_quality(mut self, quality: SourceQuality) -> Self {
        self.meta.source_quality = Some(quality);
        self
    }

    /// Set the source URL and, unless already set, derive `source_quality`
    /// from its host.
    pub fn source_url(mut self, url: &str) -> Self {
        self.meta.source_url = Some(url.to_string());
        if self.meta.source_quality.is_none() {
            self.meta.source_quality = Some(quality_for_url(url));
        }
        self
    }

    pub fn framework(mut self, name: &str, version: Option<&str>) -> Self {
        self.meta.framework = Some(name.to_string());
        self.meta.framework_version = version.map(|v| v.to_string());
        self
    }

    /// Set the file path and, unless already set, derive `language` from the
    /// extension.
    pub fn file_path(mut self, path: &str) -> Self {
        self.meta.file_path = Some(path.to_string());
        if self.meta.language.is_none() {
            if let Some(ext) = path.rsplit_once('.').map(|(_, e)| e) {
                self.meta.language = language_for_extension(ext).map(|l| l.to_string());
            }
        }
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.meta.language = Some(language.to_string());
        self
    }

    /// Record the source repository; high star counts upgrade community
    /// sources to verified.
    pub fn repository(mut self, name: &str, stars: u64) -> Self {
        self.meta.repo_name = Some(name.to_string());
        self.meta.repo_stars = Some(stars);
        self
    }

    pub fn embedding(mut self, provider: &str, model: &str, dims: usize) -> Self {
        self.meta.embedding_provider = Some(provider.to_string());
        self.meta.embedding_model = Some(model.to_string());
        self.meta.embedding_dimensions = Some(dims);
        self
    }

    pub fn last_verified(mut self, when: DateTime<Utc>) -> Self {
        self.meta.last_verified = Some(when);
        self
    }

    pub fn published_date(mut self, when: DateTime<Utc>) -> Self {
        self.meta.published_date = Some(when);
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.meta.tags.push(tag.to_string());
        self
    }

    pub fn extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.meta.extra.insert(key.to_string(), value);
        self
    }

    /// Apply defaults and upgrades, then return the finished metadata.
    pub fn build(mut self) -> DocumentMetadata {
        if self.meta.source_quality.is_none() {
            self.meta.source_quality = Some(SourceQuality::Community);
        }

        if self.meta.source_quality == Some(SourceQuality::Community)
            && self.meta.repo_stars.unwrap_or(0) >= STAR_UPGRADE_THRESHOLD
        {
            self.meta.source_quality = Some(SourceQuality::Verified);
        }

        if self.meta.doc_type.is_none() {
            self.meta.doc_type = Some("tutorial".to_string());
        }

        if self.meta.embedding_provider.is_none() {
            let route = self
                .documentation_route
                .unwrap_or_else(|| EmbeddingRouteConfig {
                    provider: "ollama".to_string(),
                    model: "nomic-embed-text".to_string(),
                    dims: 768,
                });
            self.meta.embedding_provider = Some(route.provider);
            self.meta.embedding_model = Some(route.model);
            self.meta.embedding_dimensions = Some(route.dims);
        }

        self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_build_populates_required_keys() {
        let meta = MetadataBuilder::new().build();
        assert_eq!(meta.source_quality, Some(SourceQuality::Community));
        assert_eq!(meta.doc_type.as_deref(), Some("tutorial"));
        assert_eq!(meta.embedding_provider.as_deref(), Some("ollama"));
        assert_eq!(meta.embedding_model.as_deref(), Some("nomic-embed-text"));
        assert_eq!(meta.embedding_dimensions, Some(768));
    }

    #[test]
    fn official_host_detected() {
        let meta = MetadataBuilder::new()
            .source_url("https://docs.flutter.dev/ui/widgets")
            .build();
        assert_eq!(meta.source_quality, Some(SourceQuality::Official));
    }

    #[test]
    fn aggregator_host_is_verified() {
        let meta = MetadataBuilder::new()
            .source_url("https://stackoverflow.com/questions/123")
            .build();
        assert_eq!(meta.source_quality, Some(SourceQuality::Verified));
    }

    #[test]
    fn unknown_host_is_community() {
        let meta = MetadataBuilder::new()
            .source_url("https://someblog.example.org/post")
            .build();
        assert_eq!(meta.source_quality, Some(SourceQuality::Community));
    }

    #[test]
    fn star_count_upgrades_community() {
        let meta = MetadataBuilder::new()
            .source_url("https://someblog.example.org/post")
            .repository("acme/widgets", 4200)
            .build();
        assert_eq!(meta.source_quality, Some(SourceQuality::Verified));
    }

    #[test]
    fn star_count_never_downgrades_official() {
        let meta = MetadataBuilder::new()
            .source_url("https://flutter.dev/docs")
            .repository("acme/widgets", 4200)
            .build();
        assert_eq!(meta.source_quality, Some(SourceQuality::Official));
    }

    #[test]
    fn extension_sets_language() {
        let meta = MetadataBuilder::new()
            .file_path("lib/services/auth.dart")
            .build();
        assert_eq!(meta.language.as_deref(), Some("dart"));
    }

    #[test]
    fn explicit_quality_wins_over_url() {
        let meta = MetadataBuilder::new()
            .source_quality(SourceQuality::Official)
            .source_url("https://random.example.com")
            .build();
        assert_eq!(meta.source_quality, Some(SourceQuality::Official));
    }
}
