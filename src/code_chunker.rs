//! Structure-aware chunking for Dart, TypeScript, and JavaScript sources.
//!
//! Parses a source file into imports, top-level functions, classes (with
//! their methods), and top-level constants, then emits one chunk per
//! extracted element carrying the full source slice plus structural
//! metadata. Classes under the configured line threshold are emitted whole;
//! larger classes are split per-method. Doc comments immediately preceding
//! a declaration travel with it, and the file's import list can be prepended
//! to every chunk.
//!
//! The parser works on a masked copy of the source in which string literals
//! and comments are blanked out, so brace matching never miscounts braces
//! inside strings, character literals, line comments, or block comments.
//! Any parse trouble (unbalanced braces, nothing extracted) reports back to
//! the caller, which falls back to plain text chunking.

use crate::config::CodeChunkingConfig;
use crate::models::{ChunkMetadata, ChunkType, PendingChunk};

/// Extensions handled by the structural chunker.
pub const CODE_EXTENSIONS: &[&str] = &["dart", "ts", "tsx", "js", "jsx"];

/// True when the path's extension routes to the structural chunker.
pub fn is_code_path(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| CODE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// An import statement, raw plus its quoted specifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub raw: String,
    pub specifier: String,
}

/// A top-level function, method, or constant declaration.
#[derive(Debug, Clone)]
pub struct CodeElement {
    pub name: String,
    pub parameters: Option<String>,
    pub return_type: Option<String>,
    pub is_static: bool,
    pub is_async: bool,
    /// 1-based, inclusive, doc comment included.
    pub line_start: usize,
    pub line_end: usize,
    pub source: String,
}

/// A class declaration with its members.
#[derive(Debug, Clone)]
pub struct ClassElement {
    pub name: String,
    pub line_start: usize,
    pub line_end: usize,
    pub source: String,
    pub methods: Vec<CodeElement>,
}

/// Parsed structure of one source file.
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub language: String,
    pub imports: Vec<Import>,
    pub functions: Vec<CodeElement>,
    pub classes: Vec<ClassElement>,
    pub constants: Vec<CodeElement>,
}

/// Why structural parsing gave up on a file.
#[derive(Debug, thiserror::Error)]
pub enum ParseFallback {
    #[error("unsupported extension")]
    UnsupportedExtension,
    #[error("unbalanced braces (depth {0} at end of file)")]
    UnbalancedBraces(i32),
    #[error("no structural elements found")]
    NothingExtracted,
}

/// Parse a source file. On any [`ParseFallback`] the caller should chunk the
/// file as plain text instead.
pub fn parse_source(path: &str, source: &str) -> Result<ParsedSource, ParseFallback> {
    let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    if !CODE_EXTENSIONS.contains(&ext) {
        return Err(ParseFallback::UnsupportedExtension);
    }
    let language = match ext {
        "dart" => "dart",
        "ts" | "tsx" => "typescript",
        _ => "javascript",
    };

    let mask = mask_strings_and_comments(source);
    let final_depth = mask.chars().fold(0i32, |d, c| match c {
        '{' => d + 1,
        '}' => d - 1,
        _ => d,
    });
    if final_depth != 0 {
        return Err(ParseFallback::UnbalancedBraces(final_depth));
    }

    let lines: Vec<&str> = source.lines().collect();
    let masked_lines: Vec<&str> = mask.lines().collect();
    let depths = line_start_depths(&masked_lines);

    let mut imports = Vec::new();
    let mut functions = Vec::new();
    let mut classes = Vec::new();
    let mut constants = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        if depths[i] != 0 {
            i += 1;
            continue;
        }
        let masked = masked_lines.get(i).copied().unwrap_or("");
        let trimmed = masked.trim_start();

        if let Some(import) = match_import(lines[i]) {
            imports.push(import);
            i += 1;
            continue;
        }

        if let Some(name) = match_class(trimmed) {
            let body_end = find_block_end(&masked_lines, i).unwrap_or(i);
            let doc_start = doc_comment_start(&masked_lines, i);
            let source_slice = lines[doc_start..=body_end].join("\n");
            let methods = extract_methods(&lines, &masked_lines, &depths, i, body_end);
            classes.push(ClassElement {
                name,
                line_start: doc_start + 1,
                line_end: body_end + 1,
                source: source_slice,
                methods,
            });
            i = body_end + 1;
            continue;
        }

        if let Some(decl) = match_function(trimmed) {
            let end = element_end(&masked_lines, i);
            let doc_start = doc_comment_start(&masked_lines, i);
            functions.push(CodeElement {
                name: decl.name,
                parameters: decl.parameters,
                return_type: decl.return_type,
                is_static: false,
                is_async: decl.is_async,
                line_start: doc_start + 1,
                line_end: end + 1,
                source: lines[doc_start..=end].join("\n"),
            });
            i = end + 1;
            continue;
        }

        if let Some(name) = match_constant(trimmed) {
            let end = element_end(&masked_lines, i);
            let doc_start = doc_comment_start(&masked_lines, i);
            constants.push(CodeElement {
                name,
                parameters: None,
                return_type: None,
                is_static: false,
                is_async: false,
                line_start: doc_start + 1,
                line_end: end + 1,
                source: lines[doc_start..=end].join("\n"),
            });
            i = end + 1;
            continue;
        }

        i += 1;
    }

    if functions.is_empty() && classes.is_empty() && constants.is_empty() {
        return Err(ParseFallback::NothingExtracted);
    }

    Ok(ParsedSource {
        language: language.to_string(),
        imports,
        functions,
        classes,
        constants,
    })
}

/// Turn a parsed source into chunks per the configuration.
pub fn chunk_parsed(parsed: &ParsedSource, config: &CodeChunkingConfig) -> Vec<PendingChunk> {
    let import_block = if config.preserve_imports && !parsed.imports.is_empty() {
        let mut block = parsed
            .imports
            .iter()
            .map(|imp| imp.raw.clone())
            .collect::<Vec<_>>()
            .join("\n");
        block.push_str("\n\n");
        block
    } else {
        String::new()
    };
    let import_specs: Vec<String> = parsed
        .imports
        .iter()
        .map(|imp| imp.specifier.clone())
        .collect();

    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    let mut push = |text: String, metadata: ChunkMetadata, index: &mut i64| {
        chunks.push(PendingChunk {
            chunk_index: *index,
            token_count: Some((text.len() / 4).max(1) as i64),
            text,
            metadata,
        });
        *index += 1;
    };

    for func in &parsed.functions {
        let metadata = ChunkMetadata {
            chunk_type: Some(ChunkType::Function),
            function_name: Some(func.name.clone()),
            parameters: func.parameters.clone(),
            return_type: func.return_type.clone(),
            is_static: Some(func.is_static),
            is_async: Some(func.is_async),
            line_start: Some(func.line_start),
            line_end: Some(func.line_end),
            imports: import_specs.clone(),
            language: Some(parsed.language.clone()),
            ..ChunkMetadata::default()
        };
        push(format!("{import_block}{}", func.source), metadata, &mut index);
    }

    for class in &parsed.classes {
        let class_lines = class.line_end - class.line_start + 1;
        if class_lines <= config.max_chunk_lines || class.methods.is_empty() {
            let metadata = ChunkMetadata {
                chunk_type: Some(ChunkType::Class),
                class_name: Some(class.name.clone()),
                line_start: Some(class.line_start),
                line_end: Some(class.line_end),
                imports: import_specs.clone(),
                language: Some(parsed.language.clone()),
                ..ChunkMetadata::default()
            };
            push(format!("{import_block}{}", class.source), metadata, &mut index);
        } else {
            for method in &class.methods {
                let metadata = ChunkMetadata {
                    chunk_type: Some(ChunkType::Method),
                    function_name: Some(method.name.clone()),
                    class_name: Some(class.name.clone()),
                    parameters: method.parameters.clone(),
                    return_type: method.return_type.clone(),
                    is_static: Some(method.is_static),
                    is_async: Some(method.is_async),
                    line_start: Some(method.line_start),
                    line_end: Some(method.line_end),
                    imports: import_specs.clone(),
                    language: Some(parsed.language.clone()),
                    ..ChunkMetadata::default()
                };
                push(format!("{import_block}{}", method.source), metadata, &mut index);
            }
        }
    }

    for constant in &parsed.constants {
        let metadata = ChunkMetadata {
            chunk_type: Some(ChunkType::Constant),
            function_name: Some(constant.name.clone()),
            line_start: Some(constant.line_start),
            line_end: Some(constant.line_end),
            imports: import_specs.clone(),
            language: Some(parsed.language.clone()),
            ..ChunkMetadata::default()
        };
        push(format!("{import_block}{}", constant.source), metadata, &mut index);
    }

    chunks
}

// ============ Masking ============

/// Replace string literal and comment contents with spaces, preserving the
/// line structure, so structural scans see only real code characters.
fn mask_strings_and_comments(source: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment(u32),
        Single,
        Double,
        TripleSingle,
        TripleDouble,
        Template,
    }

    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            State::Code => match c {
                '/' if next == Some('/') => {
                    state = State::LineComment;
                    out.push(' ');
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment(1);
                    out.push(' ');
                }
                '\'' => {
                    if next == Some('\'') && chars.get(i + 2) == Some(&'\'') {
                        state = State::TripleSingle;
                        out.push_str("   ");
                        i += 3;
                        continue;
                    }
                    state = State::Single;
                    out.push(' ');
                }
                '"' => {
                    if next == Some('"') && chars.get(i + 2) == Some(&'"') {
                        state = State::TripleDouble;
                        out.push_str("   ");
                        i += 3;
                        continue;
                    }
                    state = State::Double;
                    out.push(' ');
                }
                '`' => {
                    state = State::Template;
                    out.push(' ');
                }
                _ => out.push(c),
            },
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment(depth) => {
                if c == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
                if c == '*' && next == Some('/') {
                    if depth == 1 {
                        state = State::Code;
                    } else {
                        state = State::BlockComment(depth - 1);
                    }
                    out.push(' ');
                    i += 2;
                    continue;
                }
                // Dart block comments nest.
                if c == '/' && next == Some('*') {
                    state = State::BlockComment(depth + 1);
                    out.push(' ');
                    i += 2;
                    continue;
                }
            }
            State::Single | State::Double | State::Template => {
                let terminator = match state {
                    State::Single => '\'',
                    State::Double => '"',
                    _ => '`',
                };
                if c == '\\' {
                    out.push(' ');
                    if next.is_some() {
                        out.push(if next == Some('\n') { '\n' } else { ' ' });
                        i += 2;
                        continue;
                    }
                } else if c == terminator {
                    state = State::Code;
                    out.push(' ');
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::TripleSingle | State::TripleDouble => {
                let term = if state == State::TripleSingle { '\'' } else { '"' };
                if c == term && next == Some(term) && chars.get(i + 2) == Some(&term) {
                    state = State::Code;
                    out.push_str("   ");
                    i += 3;
                    continue;
                }
                out.push(if c == '\n' { '\n' } else { ' ' });
            }
        }
        i += 1;
    }

    out
}

/// Brace depth at the start of each line.
fn line_start_depths(masked_lines: &[&str]) -> Vec<i32> {
    let mut depths = Vec::with_capacity(masked_lines.len());
    let mut depth = 0i32;
    for line in masked_lines {
        depths.push(depth);
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
        }
    }
    depths
}

/// Index of the line on which the block opened at `start` closes.
fn find_block_end(masked_lines: &[&str], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut opened = false;
    for (offset, line) in masked_lines[start..].iter().enumerate() {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return Some(start + offset);
        }
    }
    None
}

/// Last line of an element starting at `start`: a brace block when one
/// opens, otherwise the line with the terminating `;` at the same depth.
fn element_end(masked_lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;
    for (offset, line) in masked_lines[start..].iter().enumerate() {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                ';' if depth == 0 => return start + offset,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return start + offset;
        }
    }
    masked_lines.len().saturating_sub(1)
}

/// First line of the contiguous comment block directly above `start`, or
/// `start` itself when there is none.
fn doc_comment_start(masked_lines: &[&str], start: usize) -> usize {
    // Masked lines blank comment text, so inspect emptiness of the mask
    // where the raw line was a comment: a fully-blank masked line whose raw
    // counterpart is non-empty is a comment line. Cheaper: walk upwards
    // while lines are blank in the mask but the scan stays adjacent.
    let mut first = start;
    while first > 0 {
        let above = masked_lines[first - 1];
        if above.trim().is_empty() && !above.is_empty() {
            first -= 1;
        } else {
            break;
        }
    }
    first
}

// ============ Declaration matching ============

fn match_import(raw_line: &str) -> Option<Import> {
    let trimmed = raw_line.trim_start();
    let is_import = trimmed.starts_with("import ")
        || (trimmed.starts_with("export ") && trimmed.contains(" from "))
        || trimmed.contains("require(");
    if !is_import {
        return None;
    }
    let specifier = extract_quoted(trimmed)?;
    Some(Import {
        raw: raw_line.trim_end().to_string(),
        specifier,
    })
}

fn extract_quoted(line: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        if let Some(start) = line.find(quote) {
            if let Some(len) = line[start + 1..].find(quote) {
                return Some(line[start + 1..start + 1 + len].to_string());
            }
        }
    }
    None
}

fn match_class(masked_trimmed: &str) -> Option<String> {
    let mut rest = masked_trimmed;
    for prefix in ["export ", "default ", "abstract ", "final ", "base ", "sealed "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    let body = rest.strip_prefix("class ")?;
    let name: String = body
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    Some(name)
}

#[derive(Debug)]
struct FunctionDecl {
    name: String,
    parameters: Option<String>,
    return_type: Option<String>,
    is_async: bool,
}

/// Match a function declaration head on a masked, trimmed line.
///
/// Handles `function name(...)`, `async function name(...)`, arrow consts
/// (`const name = (...) => ...`), and Dart-style `ReturnType name(...)`.
fn match_function(masked_trimmed: &str) -> Option<FunctionDecl> {
    let mut rest = masked_trimmed;
    for prefix in ["export ", "default "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }

    let is_async = rest.starts_with("async ") || rest.contains(") async ");

    // js/ts: [async] function name(params)
    let fn_body = rest
        .strip_prefix("async function ")
        .or_else(|| rest.strip_prefix("function "));
    if let Some(body) = fn_body {
        let name: String = body
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() {
            return None;
        }
        return Some(FunctionDecl {
            parameters: param_list(body),
            return_type: ts_return_type(body),
            name,
            is_async,
        });
    }

    // Arrow const: const name = [async] (...) =>
    if let Some(body) = rest.strip_prefix("const ").or_else(|| rest.strip_prefix("let ")) {
        if body.contains("=>") {
            let name: String = body
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                return Some(FunctionDecl {
                    parameters: param_list(body),
                    return_type: None,
                    name,
                    is_async: body.contains("async"),
                });
            }
        }
        return None;
    }

    // Dart: ReturnType name(params) [async] { — require parens and an
    // identifier immediately before them, with at most one type token ahead.
    let open = rest.find('(')?;
    let head = &rest[..open];
    if head.contains('=') || head.contains("class") || head.ends_with(' ') {
        return None;
    }
    let mut tokens: Vec<&str> = head.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() > 3 {
        return None;
    }
    let name = tokens.pop()?;
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_')
        || name.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true)
    {
        return None;
    }
    // Control-flow keywords look like calls; reject them.
    if ["if", "for", "while", "switch", "catch", "return"].contains(&name) {
        return None;
    }
    let return_type = if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    };
    // A declaration head is followed by a body or arrow, not a semicolon
    // right after the parens.
    let after = &rest[open..];
    if !(after.contains('{') || after.contains("=>")) {
        return None;
    }
    Some(FunctionDecl {
        name: name.to_string(),
        parameters: param_list(rest),
        return_type,
        is_async,
    })
}

fn param_list(decl: &str) -> Option<String> {
    let open = decl.find('(')?;
    let close = decl[open..].find(')')? + open;
    Some(decl[open + 1..close].trim().to_string())
}

fn ts_return_type(decl: &str) -> Option<String> {
    let close = decl.find(')')?;
    let after = decl[close + 1..].trim_start();
    let typed = after.strip_prefix(':')?;
    let end = typed.find(['{', '=']).unwrap_or(typed.len());
    let ty = typed[..end].trim();
    if ty.is_empty() {
        None
    } else {
        Some(ty.to_string())
    }
}

fn match_constant(masked_trimmed: &str) -> Option<String> {
    let mut rest = masked_trimmed;
    rest = rest.strip_prefix("export ").unwrap_or(rest);
    let body = rest.strip_prefix("const ")?;
    if body.contains("=>") {
        return None;
    }
    // Skip an optional type annotation token (e.g. `const int kMax = 3;`).
    let mut candidate: &str = body;
    let first: String = body
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '<' || *c == '>')
        .collect();
    let after_first = body[first.len()..].trim_start();
    if !after_first.starts_with('=') && !after_first.starts_with(':') {
        candidate = after_first;
    }
    let name: String = candidate
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    Some(name)
}

/// Find method declarations inside a class body (lines between `start` and
/// `end` at depth 1 relative to file top level).
fn extract_methods(
    lines: &[&str],
    masked_lines: &[&str],
    depths: &[i32],
    class_start: usize,
    class_end: usize,
) -> Vec<CodeElement> {
    let mut methods = Vec::new();
    let mut i = class_start + 1;
    while i < class_end {
        if depths[i] != 1 {
            i += 1;
            continue;
        }
        let masked = masked_lines.get(i).copied().unwrap_or("");
        let mut trimmed = masked.trim_start();
        let is_static = trimmed.starts_with("static ");
        trimmed = trimmed.strip_prefix("static ").unwrap_or(trimmed);
        for prefix in ["override ", "@override ", "public ", "private ", "protected "] {
            trimmed = trimmed.strip_prefix(prefix).unwrap_or(trimmed);
        }
        if let Some(decl) = match_function(trimmed) {
            let end = element_end(masked_lines, i).min(class_end);
            let doc_start = doc_comment_start(masked_lines, i).max(class_start + 1);
            methods.push(CodeElement {
                name: decl.name,
                parameters: decl.parameters,
                return_type: decl.return_type,
                is_static,
                is_async: decl.is_async,
                line_start: doc_start + 1,
                line_end: end + 1,
                source: lines[doc_start..=end].join("\n"),
            });
            i = end + 1;
        } else {
            i += 1;
        }
    }
    methods
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> CodeChunkingConfig {
        CodeChunkingConfig::default()
    }

    const DART_SERVICE: &str = r#"import 'package:http/http.dart';
import '../models/user.dart';

/// Fetches a user by id.
Future<User> fetchUser(String id) async {
  final response = await get(Uri.parse('/users/$id'));
  return User.fromJson(response.body);
}

const int kMaxRetries = 3;

/// Authentication service backed by the HTTP client.
class AuthService {
  final Client client;

  AuthService(this.client);

  /// Logs the user in.
  Future<Session> login(String user, String password) async {
    final result = await client.post(Uri.parse('/login'));
    return Session(result.body);
  }

  static bool validate(String token) {
    return token.isNotEmpty;
  }
}
"#;

    #[test]
    fn parses_dart_imports() {
        let parsed = parse_source("lib/services/auth.dart", DART_SERVICE).unwrap();
        assert_eq!(parsed.imports.len(), 2);
        assert_eq!(parsed.imports[0].specifier, "package:http/http.dart");
        assert_eq!(parsed.imports[1].specifier, "../models/user.dart");
    }

    #[test]
    fn parses_top_level_function_with_signature() {
        let parsed = parse_source("lib/services/auth.dart", DART_SERVICE).unwrap();
        assert_eq!(parsed.functions.len(), 1);
        let f = &parsed.functions[0];
        assert_eq!(f.name, "fetchUser");
        assert_eq!(f.return_type.as_deref(), Some("Future<User>"));
        assert_eq!(f.parameters.as_deref(), Some("String id"));
        assert!(f.is_async);
        assert!(f.source.contains("/// Fetches a user by id."));
    }

    #[test]
    fn parses_class_with_methods() {
        let parsed = parse_source("lib/services/auth.dart", DART_SERVICE).unwrap();
        assert_eq!(parsed.classes.len(), 1);
        let class = &parsed.classes[0];
        assert_eq!(class.name, "AuthService");
        let names: Vec<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"login"), "methods: {names:?}");
        assert!(names.contains(&"validate"), "methods: {names:?}");
        let validate = class.methods.iter().find(|m| m.name == "validate").unwrap();
        assert!(validate.is_static);
    }

    #[test]
    fn parses_top_level_constant() {
        let parsed = parse_source("lib/services/auth.dart", DART_SERVICE).unwrap();
        assert_eq!(parsed.constants.len(), 1);
        assert_eq!(parsed.constants[0].name, "kMaxRetries");
    }

    #[test]
    fn small_class_chunks_whole() {
        let parsed = parse_source("lib/services/auth.dart", DART_SERVICE).unwrap();
        let chunks = chunk_parsed(&parsed, &default_config());
        let class_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| c.metadata.chunk_type == Some(ChunkType::Class))
            .collect();
        assert_eq!(class_chunks.len(), 1);
        assert!(class_chunks[0].text.contains("class AuthService"));
        // Imports prepended when preserve_imports is on.
        assert!(class_chunks[0].text.starts_with("import 'package:http/http.dart';"));
    }

    #[test]
    fn big_class_splits_per_method() {
        let parsed = parse_source("lib/services/auth.dart", DART_SERVICE).unwrap();
        let config = CodeChunkingConfig {
            max_chunk_lines: 5,
            ..default_config()
        };
        let chunks = chunk_parsed(&parsed, &config);
        let method_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| c.metadata.chunk_type == Some(ChunkType::Method))
            .collect();
        assert_eq!(method_chunks.len(), 2);
        for c in &method_chunks {
            assert_eq!(c.metadata.class_name.as_deref(), Some("AuthService"));
        }
    }

    #[test]
    fn chunk_indices_contiguous() {
        let parsed = parse_source("lib/services/auth.dart", DART_SERVICE).unwrap();
        let chunks = chunk_parsed(&parsed, &default_config());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn braces_in_strings_do_not_break_matching() {
        let src = r#"
function render() {
  const template = "{ not a brace }";
  const other = '}}}{{{';
  // comment with { brace
  /* block } comment */
  return template;
}
"#;
        let parsed = parse_source("src/render.js", src).unwrap();
        assert_eq!(parsed.functions.len(), 1);
        assert_eq!(parsed.functions[0].name, "render");
    }

    #[test]
    fn template_literals_are_masked() {
        let src = "function hello(name) {\n  return `hi ${name} {}`;\n}\n";
        let parsed = parse_source("src/hello.ts", src).unwrap();
        assert_eq!(parsed.functions.len(), 1);
    }

    #[test]
    fn typescript_function_return_type() {
        let src = "export async function load(id: string): Promise<Doc> {\n  return fetch(id);\n}\n";
        let parsed = parse_source("src/load.ts", src).unwrap();
        let f = &parsed.functions[0];
        assert_eq!(f.name, "load");
        assert_eq!(f.return_type.as_deref(), Some("Promise<Doc>"));
        assert!(f.is_async);
    }

    #[test]
    fn arrow_const_is_a_function() {
        let src = "const add = (a, b) => {\n  return a + b;\n};\n";
        let parsed = parse_source("src/add.js", src).unwrap();
        assert_eq!(parsed.functions.len(), 1);
        assert_eq!(parsed.functions[0].name, "add");
    }

    #[test]
    fn unbalanced_braces_fall_back() {
        let src = "function broken() {\n  if (x) {\n";
        let err = parse_source("src/broken.js", src).unwrap_err();
        assert!(matches!(err, ParseFallback::UnbalancedBraces(_)));
    }

    #[test]
    fn prose_file_falls_back() {
        let err = parse_source("notes.ts", "just a sentence with no code\n").unwrap_err();
        assert!(matches!(err, ParseFallback::NothingExtracted));
    }

    #[test]
    fn unsupported_extension_falls_back() {
        let err = parse_source("main.py", "def f():\n    pass\n").unwrap_err();
        assert!(matches!(err, ParseFallback::UnsupportedExtension));
    }

    #[test]
    fn is_code_path_checks_extension() {
        assert!(is_code_path("lib/a.dart"));
        assert!(is_code_path("src/x.tsx"));
        assert!(!is_code_path("README.md"));
        assert!(!is_code_path("noext"));
    }
}
