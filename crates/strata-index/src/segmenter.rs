//! Line-oriented source segmentation.
//!
//! Recovers declarations by counting braces rather than parsing, so it works
//! for any C-family syntax without a grammar. Everything here is pure and
//! infallible: malformed input degrades to fewer or coarser segments, never
//! to an error.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::languages::{DeclKeyword, Lang, UNIT_KEYWORDS, lang_for_extension};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Struct,
    Protocol,
    Function,
    Enum,
}

impl SymbolKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Protocol => "protocol",
            Self::Function => "function",
            Self::Enum => "enum",
        }
    }
}

/// A named declaration with its 1-based inclusive line span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
}

/// A brace-balanced top-level declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalUnit {
    pub name: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Byte span of `content` within the scanned source.
    pub span: Range<usize>,
}

/// A markdown-style section introduced by a `#` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub span: Range<usize>,
    pub title: Option<String>,
    pub depth: usize,
}

const MODIFIERS: &[&str] = &[
    "pub(crate) ",
    "pub(super) ",
    "pub(self) ",
    "pub ",
    "public ",
    "private ",
    "protected ",
    "internal ",
    "fileprivate ",
    "open ",
    "final ",
    "static ",
    "export ",
    "default ",
    "async ",
    "abstract ",
    "override ",
    "unsafe ",
    "extern ",
    "sealed ",
    "data ",
    "inline ",
    "const ",
    "mutating ",
    "partial ",
    "virtual ",
    "declare ",
    "readonly ",
    "indirect ",
    "@objc ",
];

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

fn lines_in(source: &str, within: Range<usize>) -> Vec<Line<'_>> {
    let base = within.start;
    let mut offset = base;
    let mut out = Vec::new();
    for raw in source[within].split_inclusive('\n') {
        let body = raw.strip_suffix('\n').unwrap_or(raw);
        let body = body.strip_suffix('\r').unwrap_or(body);
        out.push(Line {
            text: body,
            start: offset,
            end: offset + body.len(),
        });
        offset += raw.len();
    }
    out
}

fn strip_modifiers(line: &str) -> &str {
    let mut rest = line.trim_start();
    while let Some(m) = MODIFIERS.iter().find(|m| rest.starts_with(**m)) {
        rest = rest[m.len()..].trim_start();
    }
    rest
}

fn starts_with_keyword<'a>(rest: &'a str, keyword: &str) -> Option<&'a str> {
    let after = rest.strip_prefix(keyword)?;
    if keyword.ends_with(' ') {
        return Some(after);
    }
    match after.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(after),
    }
}

/// Index one past the bracket closing the one at `text[0]`.
fn skip_balanced(text: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }
    None
}

fn declared_name(after_keyword: &str) -> String {
    let mut rest = after_keyword.trim_start();
    for (open, close) in [('<', '>'), ('(', ')')] {
        if rest.starts_with(open)
            && let Some(end) = skip_balanced(rest, open, close)
        {
            rest = rest[end..].trim_start();
        }
    }
    rest.chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .collect()
}

fn find_closing_quote(bytes: &[u8], from: usize, quote: u8) -> Option<usize> {
    let mut j = from;
    while j < bytes.len() {
        if bytes[j] == b'\\' {
            j += 2;
            continue;
        }
        if bytes[j] == quote {
            return Some(j);
        }
        j += 1;
    }
    None
}

/// Net brace delta of a line and whether it contained any brace, ignoring
/// quoted literals closed on the same line and `//` comments.
fn count_braces(line: &str) -> (isize, bool) {
    let bytes = line.as_bytes();
    let mut depth = 0isize;
    let mut seen = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => break,
            q @ (b'"' | b'\'' | b'`') => {
                if let Some(close) = find_closing_quote(bytes, i + 1, q) {
                    i = close + 1;
                    continue;
                }
            }
            b'{' => {
                depth += 1;
                seen = true;
            }
            b'}' => {
                depth -= 1;
                seen = true;
            }
            _ => {}
        }
        i += 1;
    }
    (depth, seen)
}

fn paren_delta(line: &str) -> isize {
    line.chars().fold(0, |acc, c| match c {
        '(' => acc + 1,
        ')' => acc - 1,
        _ => acc,
    })
}

fn signature_continues(line: &str) -> bool {
    let t = line.trim_end();
    t.ends_with(',')
        || t.ends_with("->")
        || t.ends_with(':')
        || t.ends_with('=')
        || t.ends_with("where")
        || t.ends_with('<')
}

/// Index of the line that closes the declaration opened on `lines[start]`.
fn declaration_end(lines: &[Line<'_>], start: usize) -> usize {
    let mut depth = 0isize;
    let mut parens = 0isize;
    let mut seen = false;
    for (idx, line) in lines.iter().enumerate().skip(start) {
        let (delta, saw) = count_braces(line.text);
        depth += delta;
        seen |= saw;
        if seen {
            if depth <= 0 {
                return idx;
            }
            continue;
        }
        parens += paren_delta(line.text);
        if parens > 0 {
            continue;
        }
        let trimmed = line.text.trim_end();
        if trimmed.ends_with(';') {
            return idx;
        }
        let next_opens = lines
            .get(idx + 1)
            .is_some_and(|n| n.text.trim_start().starts_with('{'));
        if !next_opens && !signature_continues(trimmed) {
            return idx;
        }
    }
    lines.len().saturating_sub(1)
}

fn go_kind(kind: SymbolKind, after: &str) -> SymbolKind {
    if after.contains(" interface") {
        SymbolKind::Protocol
    } else {
        kind
    }
}

/// Extract declared symbols (classes, structs, protocols, functions, enums)
/// at any nesting depth.
#[must_use]
pub fn extract_symbols(code: &str, language: Lang) -> Vec<Symbol> {
    let keywords = language.declaration_keywords();
    if keywords.is_empty() {
        return Vec::new();
    }
    let lines = lines_in(code, 0..code.len());
    if language == Lang::Python {
        return indentation_symbols(&lines, keywords);
    }

    let mut symbols = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let rest = strip_modifiers(line.text);
        let hit = keywords.iter().find_map(|(kw, kind)| {
            let kind = (*kind)?;
            starts_with_keyword(rest, kw).map(|after| (kind, after))
        });
        let Some((kind, after)) = hit else {
            continue;
        };
        let name = declared_name(after);
        if name.is_empty() {
            continue;
        }
        let kind = if language == Lang::Go {
            go_kind(kind, after)
        } else {
            kind
        };
        let end = declaration_end(&lines, idx);
        symbols.push(Symbol {
            name,
            kind,
            start_line: idx + 1,
            end_line: end + 1,
        });
    }
    symbols
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn indentation_symbols(lines: &[Line<'_>], keywords: &[DeclKeyword]) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let rest = line.text.trim_start();
        let rest = rest.strip_prefix("async ").unwrap_or(rest);
        let hit = keywords.iter().find_map(|(kw, kind)| {
            let kind = (*kind)?;
            starts_with_keyword(rest, kw).map(|after| (kind, after))
        });
        let Some((kind, after)) = hit else {
            continue;
        };
        let name = declared_name(after);
        if name.is_empty() {
            continue;
        }
        let indent = indent_of(line.text);
        let mut end = idx;
        for (j, next) in lines.iter().enumerate().skip(idx + 1) {
            if next.text.trim().is_empty() {
                continue;
            }
            if indent_of(next.text) <= indent {
                break;
            }
            end = j;
        }
        symbols.push(Symbol {
            name,
            kind,
            start_line: idx + 1,
            end_line: end + 1,
        });
    }
    symbols
}

/// Extract brace-balanced top-level declarations.
///
/// Text between declarations (imports, comments, free statements) is not
/// part of any unit.
#[must_use]
pub fn extract_logical_units(code: &str) -> Vec<LogicalUnit> {
    let lines = lines_in(code, 0..code.len());
    let mut units = Vec::new();
    let mut depth = 0isize;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if depth == 0 {
            let rest = strip_modifiers(line.text);
            if let Some(after) = UNIT_KEYWORDS
                .iter()
                .find_map(|kw| starts_with_keyword(rest, kw))
            {
                let end = declaration_end(&lines, i);
                let span = line.start..lines[end].end;
                units.push(LogicalUnit {
                    name: declared_name(after),
                    content: code[span.clone()].to_string(),
                    start_line: i + 1,
                    end_line: end + 1,
                    span,
                });
                i = end + 1;
                continue;
            }
        }
        depth = (depth + count_braces(line.text).0).max(0);
        i += 1;
    }
    units
}

/// Blank-line separated paragraphs within `within`.
#[must_use]
pub fn split_paragraphs(source: &str, within: Range<usize>) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut current: Option<Range<usize>> = None;
    for line in lines_in(source, within) {
        if line.text.trim().is_empty() {
            if let Some(span) = current.take() {
                spans.push(span);
            }
        } else {
            let end = line.start + line.text.trim_end().len();
            match current.as_mut() {
                Some(span) => span.end = end,
                None => current = Some(line.start..end),
            }
        }
    }
    spans.extend(current);
    spans
}

/// Sentences ending in `.`, `!` or `?` followed by whitespace.
#[must_use]
pub fn split_sentences(source: &str, within: Range<usize>) -> Vec<Range<usize>> {
    let base = within.start;
    let text = &source[within];
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }
        if matches!(c, '.' | '!' | '?')
            && chars.peek().is_some_and(|(_, next)| next.is_whitespace())
            && let Some(s) = start.take()
        {
            spans.push(base + s..base + i + c.len_utf8());
        }
    }
    if let Some(s) = start {
        let tail = text[s..].trim_end();
        if !tail.is_empty() {
            spans.push(base + s..base + s + tail.len());
        }
    }
    spans
}

/// Non-blank lines, trailing whitespace trimmed.
#[must_use]
pub fn split_lines(source: &str, within: Range<usize>) -> Vec<Range<usize>> {
    lines_in(source, within)
        .into_iter()
        .filter(|l| !l.text.trim().is_empty())
        .map(|l| l.start..l.start + l.text.trim_end().len())
        .collect()
}

/// Whitespace-delimited words.
#[must_use]
pub fn split_words(source: &str, within: Range<usize>) -> Vec<Range<usize>> {
    let base = within.start;
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in source[within.clone()].char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push(base + s..base + i);
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push(base + s..within.end);
    }
    spans
}

fn header_depth(line: &str) -> Option<(usize, &str)> {
    let t = line.trim_start();
    let hashes = t.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &t[hashes..];
    if rest.is_empty() || rest.starts_with(' ') {
        Some((hashes, rest.trim()))
    } else {
        None
    }
}

/// Split `within` into sections at header lines of depth `<= max_depth`.
///
/// Content before the first header becomes an untitled depth-0 section.
/// Headers inside fenced code blocks are ignored.
#[must_use]
pub fn split_sections(source: &str, within: Range<usize>, max_depth: usize) -> Vec<Section> {
    let lines = lines_in(source, within);
    let mut sections = Vec::new();
    let mut current: Option<(usize, Option<String>, usize)> = None;
    let mut last_content_end: Option<usize> = None;
    let mut in_fence = false;

    let mut close = |current: Option<(usize, Option<String>, usize)>, end: Option<usize>| {
        if let (Some((start, title, depth)), Some(end)) = (current, end) {
            sections.push(Section {
                span: start..end,
                title,
                depth,
            });
        }
    };

    for line in &lines {
        let trimmed = line.text.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        let header = if in_fence {
            None
        } else {
            header_depth(line.text).filter(|(d, _)| *d <= max_depth)
        };
        if let Some((depth, title)) = header {
            close(current.take(), last_content_end.take());
            current = Some((line.start, Some(title.to_string()), depth));
            last_content_end = Some(line.start + line.text.trim_end().len());
            continue;
        }
        if line.text.trim().is_empty() {
            continue;
        }
        if current.is_none() {
            current = Some((line.start, None, 0));
        }
        last_content_end = Some(line.start + line.text.trim_end().len());
    }
    close(current, last_content_end);
    sections
}

#[derive(Debug, Clone, Copy)]
enum ImportStyle {
    Swift,
    Rust,
    Python,
    JavaScript,
    Go,
    JavaLike,
    CInclude,
    CSharp,
    Ruby,
    Php,
    Dart,
    Lua,
    Elixir,
    Haskell,
}

fn import_style(ext: &str) -> Option<ImportStyle> {
    let style = match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "swift" => ImportStyle::Swift,
        "rs" => ImportStyle::Rust,
        "py" | "pyi" => ImportStyle::Python,
        "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" | "cts" | "vue" | "svelte" => {
            ImportStyle::JavaScript
        }
        "go" => ImportStyle::Go,
        "java" | "kt" | "kts" | "scala" | "groovy" => ImportStyle::JavaLike,
        "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hh" | "m" | "mm" => ImportStyle::CInclude,
        "cs" => ImportStyle::CSharp,
        "rb" => ImportStyle::Ruby,
        "php" => ImportStyle::Php,
        "dart" => ImportStyle::Dart,
        "lua" => ImportStyle::Lua,
        "ex" | "exs" => ImportStyle::Elixir,
        "hs" => ImportStyle::Haskell,
        _ => return None,
    };
    Some(style)
}

/// Text between the last pair of matching quotes on the line.
fn quoted(line: &str) -> Option<&str> {
    for q in ['\'', '"', '`'] {
        if let Some(end) = line.rfind(q) {
            let head = &line[..end];
            if let Some(start) = head.rfind(q) {
                return Some(&line[start + 1..end]);
            }
        }
    }
    None
}

fn strip_statement(rest: &str) -> &str {
    rest.trim().trim_end_matches(';').trim()
}

fn import_from_line(style: ImportStyle, line: &str, in_go_block: &mut bool) -> Vec<String> {
    let t = line.trim();
    let one = |s: &str| {
        if s.is_empty() {
            Vec::new()
        } else {
            vec![s.to_string()]
        }
    };
    match style {
        ImportStyle::Swift => {
            let t = t.strip_prefix("@testable ").unwrap_or(t);
            t.strip_prefix("import ")
                .and_then(|r| r.split_whitespace().last())
                .map(one)
                .unwrap_or_default()
        }
        ImportStyle::Rust => t
            .strip_prefix("pub use ")
            .or_else(|| t.strip_prefix("pub(crate) use "))
            .or_else(|| t.strip_prefix("use "))
            .or_else(|| t.strip_prefix("extern crate "))
            .map(|r| one(strip_statement(r)))
            .unwrap_or_default(),
        ImportStyle::Python => {
            if let Some(rest) = t.strip_prefix("from ") {
                rest.split_whitespace().next().map(one).unwrap_or_default()
            } else if let Some(rest) = t.strip_prefix("import ") {
                rest.split(',')
                    .filter_map(|m| m.split_whitespace().next())
                    .map(str::to_string)
                    .collect()
            } else {
                Vec::new()
            }
        }
        ImportStyle::JavaScript => {
            let is_import = t.starts_with("import ")
                || t.starts_with("import{")
                || (t.starts_with("export ") && t.contains(" from "))
                || t.contains("require(")
                || t.contains("import(");
            if is_import {
                quoted(t).map(one).unwrap_or_default()
            } else {
                Vec::new()
            }
        }
        ImportStyle::Go => {
            if *in_go_block {
                if t.starts_with(')') {
                    *in_go_block = false;
                    return Vec::new();
                }
                return quoted(t).map(one).unwrap_or_default();
            }
            match t.strip_prefix("import") {
                Some(rest) if rest.trim_start().starts_with('(') => {
                    *in_go_block = !rest.contains(')');
                    Vec::new()
                }
                Some(rest) if rest.starts_with(' ') => quoted(rest).map(one).unwrap_or_default(),
                _ => Vec::new(),
            }
        }
        ImportStyle::JavaLike => t
            .strip_prefix("import ")
            .map(|r| one(strip_statement(r.strip_prefix("static ").unwrap_or(r))))
            .unwrap_or_default(),
        ImportStyle::CInclude => {
            let rest = t
                .strip_prefix("#include")
                .or_else(|| t.strip_prefix("#import"))
                .or_else(|| t.strip_prefix("@import "));
            match rest {
                Some(r) => {
                    let r = r.split("//").next().unwrap_or(r);
                    let r = r.split("/*").next().unwrap_or(r).trim();
                    if let Some(angled) = r.strip_prefix('<')
                        && let Some(e) = angled.find('>')
                    {
                        one(&angled[..e])
                    } else {
                        quoted(r)
                            .map(one)
                            .unwrap_or_else(|| one(strip_statement(r)))
                    }
                }
                None => Vec::new(),
            }
        }
        ImportStyle::CSharp => match t.strip_prefix("using ") {
            Some(r) if t.ends_with(';') && !r.contains('(') => {
                let r = r.strip_prefix("static ").unwrap_or(r);
                let r = r.split('=').next_back().unwrap_or(r);
                one(strip_statement(r))
            }
            _ => Vec::new(),
        },
        ImportStyle::Ruby => {
            if t.starts_with("require ")
                || t.starts_with("require_relative ")
                || t.starts_with("require(")
            {
                quoted(t).map(one).unwrap_or_default()
            } else {
                Vec::new()
            }
        }
        ImportStyle::Php => {
            if let Some(r) = t.strip_prefix("use ") {
                one(strip_statement(r))
            } else if ["require", "require_once", "include", "include_once"]
                .iter()
                .any(|kw| t.starts_with(kw))
            {
                quoted(t).map(one).unwrap_or_default()
            } else {
                Vec::new()
            }
        }
        ImportStyle::Dart => {
            if t.starts_with("import ") || t.starts_with("export ") || t.starts_with("part ") {
                quoted(t).map(one).unwrap_or_default()
            } else {
                Vec::new()
            }
        }
        ImportStyle::Lua => {
            if t.contains("require") {
                quoted(t).map(one).unwrap_or_default()
            } else {
                Vec::new()
            }
        }
        ImportStyle::Elixir => ["import ", "alias ", "use ", "require "]
            .iter()
            .find_map(|kw| t.strip_prefix(kw))
            .and_then(|r| r.split([',', ' ']).next())
            .map(one)
            .unwrap_or_default(),
        ImportStyle::Haskell => t
            .strip_prefix("import ")
            .map(|r| r.strip_prefix("qualified ").unwrap_or(r))
            .and_then(|r| r.split_whitespace().next())
            .map(one)
            .unwrap_or_default(),
    }
}

/// Extract imported module paths using the rule for `file_extension`.
///
/// Unrecognised extensions yield nothing. Duplicates are dropped, first
/// occurrence order kept.
#[must_use]
pub fn extract_imports(code: &str, file_extension: &str) -> Vec<String> {
    let Some(style) = import_style(file_extension) else {
        return Vec::new();
    };
    let mut in_go_block = false;
    let mut imports: Vec<String> = Vec::new();
    for line in code.lines() {
        for import in import_from_line(style, line, &mut in_go_block) {
            if !imports.contains(&import) {
                imports.push(import);
            }
        }
    }
    imports
}

/// Language-aware wrapper over [`extract_imports`] for callers holding a
/// [`Lang`] rather than a file extension.
#[must_use]
pub fn extract_imports_for(code: &str, language: Lang) -> Vec<String> {
    let ext = match language {
        Lang::Swift => "swift",
        Lang::Rust => "rs",
        Lang::Go => "go",
        Lang::JavaScript => "js",
        Lang::TypeScript => "ts",
        Lang::Java => "java",
        Lang::Kotlin => "kt",
        Lang::Scala => "scala",
        Lang::CSharp => "cs",
        Lang::C => "c",
        Lang::Cpp => "cpp",
        Lang::ObjectiveC => "m",
        Lang::Php => "php",
        Lang::Dart => "dart",
        Lang::Python => "py",
        Lang::Ruby => "rb",
        Lang::Lua => "lua",
        _ => return Vec::new(),
    };
    debug_assert!(lang_for_extension(ext) == Some(language));
    extract_imports(code, ext)
}
