//! File relationship edges derived during structural chunking.
//!
//! Emits `import` edges for each import statement (relative paths resolved
//! against the importing file's directory; `package:` and bare specifiers
//! stored verbatim), `usage` edges from a capitalised-identifier scan
//! attributed to relative imports, `test` edges linking test files to their
//! inferred sources, `sibling` edges among files in the same directory, and
//! a `parent` edge to the directory's barrel file when one is ingested.
//!
//! Usage edges are a low-precision heuristic. They indicate that a symbol
//! name derived from an imported file appears in the source; they are not a
//! call graph.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::code_chunker::ParsedSource;
use crate::error::Result;
use crate::models::{FileRelationship, RelationKind};
use crate::storage::Storage;

/// Related-file view for one path, grouped by direction and kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelatedFiles {
    pub imports: Vec<String>,
    pub imported_by: Vec<String>,
    pub uses: Vec<String>,
    pub used_by: Vec<String>,
    pub tests: Vec<String>,
    pub tested_by: Vec<String>,
    pub siblings: Vec<String>,
    pub parent: Option<String>,
}

/// Resolve a relative import specifier against the importing file's
/// directory. Non-relative specifiers are returned verbatim.
pub fn resolve_import(source_path: &str, specifier: &str) -> String {
    if !specifier.starts_with("./") && !specifier.starts_with("../") {
        return specifier.to_string();
    }

    let mut stack: Vec<&str> = source_path.split('/').collect();
    stack.pop(); // drop the file name

    for part in specifier.split('/') {
        match part {
            "." | "" => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    stack.join("/")
}

/// `snake_case` or `kebab-case` file stem → `PascalCase` symbol candidate.
fn pascal_case(stem: &str) -> String {
    stem.split(['_', '-'])
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// True when `ident` occurs in `text` bounded by non-identifier characters.
fn contains_identifier(text: &str, ident: &str) -> bool {
    let mut search = text;
    while let Some(pos) = search.find(ident) {
        let before_ok = search[..pos]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
        let after = &search[pos + ident.len()..];
        let after_ok = after
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
        if before_ok && after_ok {
            return true;
        }
        search = &search[pos + ident.len()..];
    }
    false
}

/// Test-file conventions: `foo_test.ext`, `foo.test.ext`, or anything under
/// a `test/` or `__tests__/` root.
pub fn is_test_path(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
    stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
        || path.starts_with("test/")
        || path.contains("/test/")
        || path.contains("/__tests__/")
}

/// Infer the source file a test file exercises.
pub fn inferred_source_for_test(path: &str) -> Option<String> {
    if !is_test_path(path) {
        return None;
    }
    let (dir, file) = path.rsplit_once('/').unwrap_or(("", path));
    let (stem, ext) = file.rsplit_once('.')?;
    let source_stem = stem
        .strip_suffix("_test")
        .or_else(|| stem.strip_suffix(".test"))
        .or_else(|| stem.strip_suffix(".spec"))
        .unwrap_or(stem);

    let source_dir = if let Some(rest) = dir.strip_prefix("test") {
        // Flutter/Dart convention: test/x_test.dart ↔ lib/x.dart
        format!("lib{rest}")
    } else {
        dir.replace("/__tests__", "")
    };

    if source_dir.is_empty() {
        Some(format!("{source_stem}.{ext}"))
    } else {
        Some(format!("{source_dir}/{source_stem}.{ext}"))
    }
}

/// Derive and upsert every edge for one parsed source file.
pub async fn record_parsed_source(
    storage: &Storage,
    collection_id: &str,
    path: &str,
    parsed: &ParsedSource,
    raw_source: &str,
) -> Result<()> {
    // import edges
    for import in &parsed.imports {
        let target = resolve_import(path, &import.specifier);
        let mut metadata = BTreeMap::new();
        metadata.insert("raw".to_string(), serde_json::json!(import.raw));
        storage
            .upsert_relationship(&FileRelationship {
                collection_id: collection_id.to_string(),
                source_path: path.to_string(),
                target_path: target,
                kind: RelationKind::Import,
                metadata,
            })
            .await?;
    }

    // usage edges: a symbol named after a relatively-imported file appearing
    // in this source
    for import in &parsed.imports {
        if !import.specifier.starts_with('.') {
            continue;
        }
        let target = resolve_import(path, &import.specifier);
        let stem = target
            .rsplit('/')
            .next()
            .and_then(|f| f.rsplit_once('.').map(|(s, _)| s))
            .unwrap_or_default();
        if stem.is_empty() {
            continue;
        }
        let symbol = pascal_case(stem);
        if contains_identifier(raw_source, &symbol) {
            let mut metadata = BTreeMap::new();
            metadata.insert("symbol".to_string(), serde_json::json!(symbol));
            metadata.insert("heuristic".to_string(), serde_json::json!(true));
            storage
                .upsert_relationship(&FileRelationship {
                    collection_id: collection_id.to_string(),
                    source_path: path.to_string(),
                    target_path: target,
                    kind: RelationKind::Usage,
                    metadata,
                })
                .await?;
        }
    }

    // test edge
    if let Some(source_file) = inferred_source_for_test(path) {
        storage
            .upsert_relationship(&FileRelationship {
                collection_id: collection_id.to_string(),
                source_path: path.to_string(),
                target_path: source_file,
                kind: RelationKind::Test,
                metadata: BTreeMap::new(),
            })
            .await?;
    }

    // sibling edges against already-ingested files in the same directory
    let dir = path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    let docs = storage.list_documents(collection_id).await?;
    for doc in &docs {
        let Some(other) = doc.metadata.file_path.as_deref() else {
            continue;
        };
        if other == path {
            continue;
        }
        let other_dir = other.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        if other_dir != dir {
            continue;
        }
        for (a, b) in [(path, other), (other, path)] {
            storage
                .upsert_relationship(&FileRelationship {
                    collection_id: collection_id.to_string(),
                    source_path: a.to_string(),
                    target_path: b.to_string(),
                    kind: RelationKind::Sibling,
                    metadata: BTreeMap::new(),
                })
                .await?;
        }
        // Barrel files act as the directory's parent.
        let other_file = other.rsplit('/').next().unwrap_or(other);
        if matches!(other_file, "index.ts" | "index.js" | "mod.ts") {
            storage
                .upsert_relationship(&FileRelationship {
                    collection_id: collection_id.to_string(),
                    source_path: path.to_string(),
                    target_path: other.to_string(),
                    kind: RelationKind::Parent,
                    metadata: BTreeMap::new(),
                })
                .await?;
        }
    }

    Ok(())
}

/// Query every relationship group for one path.
pub async fn related(
    storage: &Storage,
    collection_id: &str,
    path: &str,
) -> Result<RelatedFiles> {
    let outgoing = storage.relationships_from(collection_id, path).await?;
    let incoming = storage.relationships_to(collection_id, path).await?;

    let mut related = RelatedFiles::default();

    for edge in &outgoing {
        match edge.kind {
            RelationKind::Import => related.imports.push(edge.target_path.clone()),
            RelationKind::Usage => related.uses.push(edge.target_path.clone()),
            RelationKind::Test => related.tests.push(edge.target_path.clone()),
            RelationKind::Sibling => related.siblings.push(edge.target_path.clone()),
            RelationKind::Parent => {
                related.parent.get_or_insert_with(|| edge.target_path.clone());
            }
        }
    }
    for edge in &incoming {
        match edge.kind {
            RelationKind::Import => related.imported_by.push(edge.source_path.clone()),
            RelationKind::Usage => related.used_by.push(edge.source_path.clone()),
            RelationKind::Test => related.tested_by.push(edge.source_path.clone()),
            RelationKind::Sibling | RelationKind::Parent => {}
        }
    }

    Ok(related)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_imports() {
        assert_eq!(
            resolve_import("lib/services/auth.dart", "../models/user.dart"),
            "lib/models/user.dart"
        );
        assert_eq!(
            resolve_import("lib/services/auth.dart", "./session.dart"),
            "lib/services/session.dart"
        );
        assert_eq!(
            resolve_import("src/a/b/c.ts", "../../x.ts"),
            "src/x.ts"
        );
    }

    #[test]
    fn package_specifiers_verbatim() {
        assert_eq!(
            resolve_import("lib/services/auth.dart", "package:http/http.dart"),
            "package:http/http.dart"
        );
        assert_eq!(resolve_import("src/a.ts", "react"), "react");
    }

    #[test]
    fn pascal_case_from_stems() {
        assert_eq!(pascal_case("user"), "User");
        assert_eq!(pascal_case("auth_service"), "AuthService");
        assert_eq!(pascal_case("http-client"), "HttpClient");
    }

    #[test]
    fn identifier_scan_respects_boundaries() {
        assert!(contains_identifier("final user = User();", "User"));
        assert!(!contains_identifier("final NewUserService = x;", "User"));
        assert!(contains_identifier("AuthService service;", "AuthService"));
    }

    #[test]
    fn test_path_detection() {
        assert!(is_test_path("test/services/auth_test.dart"));
        assert!(is_test_path("src/util.test.ts"));
        assert!(is_test_path("src/__tests__/util.ts"));
        assert!(!is_test_path("lib/services/auth.dart"));
    }

    #[test]
    fn infers_source_for_dart_test() {
        assert_eq!(
            inferred_source_for_test("test/services/auth_test.dart").as_deref(),
            Some("lib/services/auth.dart")
        );
        assert_eq!(
            inferred_source_for_test("src/util.test.ts").as_deref(),
            Some("src/util.ts")
        );
        assert_eq!(inferred_source_for_test("lib/main.dart"), None);
    }
}
