//! Language detection and per-language declaration keyword tables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::segmenter::SymbolKind;

/// A declaration keyword and the symbol kind it introduces. `None` marks
/// container keywords (`impl`, `extension`, `namespace`) that open a logical
/// unit without naming a symbol of their own.
pub type DeclKeyword = (&'static str, Option<SymbolKind>);

/// Source language, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Swift,
    Rust,
    Go,
    JavaScript,
    TypeScript,
    Java,
    Kotlin,
    Scala,
    CSharp,
    C,
    Cpp,
    ObjectiveC,
    Php,
    Dart,
    Python,
    Ruby,
    Lua,
    Bash,
    Markdown,
    Toml,
    Json,
    Yaml,
    Text,
}

const SWIFT: &[DeclKeyword] = &[
    ("class ", Some(SymbolKind::Class)),
    ("actor ", Some(SymbolKind::Class)),
    ("struct ", Some(SymbolKind::Struct)),
    ("protocol ", Some(SymbolKind::Protocol)),
    ("enum ", Some(SymbolKind::Enum)),
    ("func ", Some(SymbolKind::Function)),
    ("extension ", None),
];

const RUST: &[DeclKeyword] = &[
    ("struct ", Some(SymbolKind::Struct)),
    ("union ", Some(SymbolKind::Struct)),
    ("enum ", Some(SymbolKind::Enum)),
    ("trait ", Some(SymbolKind::Protocol)),
    ("fn ", Some(SymbolKind::Function)),
    ("impl", None),
    ("mod ", None),
];

const GO: &[DeclKeyword] = &[
    ("func ", Some(SymbolKind::Function)),
    ("type ", Some(SymbolKind::Struct)),
];

const JS: &[DeclKeyword] = &[
    ("class ", Some(SymbolKind::Class)),
    ("function ", Some(SymbolKind::Function)),
    ("function* ", Some(SymbolKind::Function)),
    ("interface ", Some(SymbolKind::Protocol)),
    ("enum ", Some(SymbolKind::Enum)),
    ("namespace ", None),
];

const JVM: &[DeclKeyword] = &[
    ("class ", Some(SymbolKind::Class)),
    ("object ", Some(SymbolKind::Class)),
    ("interface ", Some(SymbolKind::Protocol)),
    ("trait ", Some(SymbolKind::Protocol)),
    ("enum ", Some(SymbolKind::Enum)),
    ("record ", Some(SymbolKind::Struct)),
    ("fun ", Some(SymbolKind::Function)),
    ("def ", Some(SymbolKind::Function)),
];

const CSHARP: &[DeclKeyword] = &[
    ("class ", Some(SymbolKind::Class)),
    ("struct ", Some(SymbolKind::Struct)),
    ("record ", Some(SymbolKind::Struct)),
    ("interface ", Some(SymbolKind::Protocol)),
    ("enum ", Some(SymbolKind::Enum)),
    ("namespace ", None),
];

const C_FAMILY: &[DeclKeyword] = &[
    ("class ", Some(SymbolKind::Class)),
    ("struct ", Some(SymbolKind::Struct)),
    ("union ", Some(SymbolKind::Struct)),
    ("enum ", Some(SymbolKind::Enum)),
    ("namespace ", None),
];

const OBJC: &[DeclKeyword] = &[
    ("@interface ", Some(SymbolKind::Class)),
    ("@protocol ", Some(SymbolKind::Protocol)),
    ("@implementation ", None),
    ("struct ", Some(SymbolKind::Struct)),
    ("enum ", Some(SymbolKind::Enum)),
];

const PHP: &[DeclKeyword] = &[
    ("class ", Some(SymbolKind::Class)),
    ("interface ", Some(SymbolKind::Protocol)),
    ("trait ", Some(SymbolKind::Protocol)),
    ("enum ", Some(SymbolKind::Enum)),
    ("function ", Some(SymbolKind::Function)),
];

const DART: &[DeclKeyword] = &[
    ("class ", Some(SymbolKind::Class)),
    ("mixin ", Some(SymbolKind::Protocol)),
    ("enum ", Some(SymbolKind::Enum)),
    ("extension ", None),
];

const PYTHON: &[DeclKeyword] = &[
    ("class ", Some(SymbolKind::Class)),
    ("def ", Some(SymbolKind::Function)),
];

/// Keyword prefixes recognised by the language-agnostic unit scanner.
pub(crate) const UNIT_KEYWORDS: &[&str] = &[
    "class ",
    "struct ",
    "protocol ",
    "enum ",
    "func ",
    "fn ",
    "trait ",
    "impl",
    "mod ",
    "extension ",
    "actor ",
    "interface ",
    "function ",
    "function* ",
    "fun ",
    "object ",
    "record ",
    "union ",
    "namespace ",
    "type ",
    "mixin ",
    "@interface ",
    "@implementation ",
    "@protocol ",
];

impl Lang {
    /// Identifier used in chunk metadata and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Swift => "swift",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::Scala => "scala",
            Self::CSharp => "csharp",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::ObjectiveC => "objectivec",
            Self::Php => "php",
            Self::Dart => "dart",
            Self::Python => "python",
            Self::Ruby => "ruby",
            Self::Lua => "lua",
            Self::Bash => "bash",
            Self::Markdown => "markdown",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Text => "text",
        }
    }

    /// Parse a language identifier as produced by [`Lang::id`].
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(id.to_ascii_lowercase())).ok()
    }

    /// Declaration keywords for the brace-depth scanner. Empty for
    /// languages without one.
    #[must_use]
    pub fn declaration_keywords(self) -> &'static [DeclKeyword] {
        match self {
            Self::Swift => SWIFT,
            Self::Rust => RUST,
            Self::Go => GO,
            Self::JavaScript | Self::TypeScript => JS,
            Self::Java | Self::Kotlin | Self::Scala => JVM,
            Self::CSharp => CSHARP,
            Self::C | Self::Cpp => C_FAMILY,
            Self::ObjectiveC => OBJC,
            Self::Php => PHP,
            Self::Dart => DART,
            Self::Python => PYTHON,
            _ => &[],
        }
    }

    /// Whether logical units can be recovered by counting braces.
    ///
    /// Python is indentation-scoped: symbols are still extracted, but
    /// chunking falls back to paragraphs.
    #[must_use]
    pub fn has_structural_scanner(self) -> bool {
        !matches!(self, Self::Python) && !self.declaration_keywords().is_empty()
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    lang_for_extension(ext)
}

/// Map a bare extension (no leading dot) to a language.
#[must_use]
pub fn lang_for_extension(ext: &str) -> Option<Lang> {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "swift" => Some(Lang::Swift),
        "rs" => Some(Lang::Rust),
        "go" => Some(Lang::Go),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "java" => Some(Lang::Java),
        "kt" | "kts" => Some(Lang::Kotlin),
        "scala" | "sc" => Some(Lang::Scala),
        "cs" => Some(Lang::CSharp),
        "c" | "h" => Some(Lang::C),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some(Lang::Cpp),
        "m" | "mm" => Some(Lang::ObjectiveC),
        "php" => Some(Lang::Php),
        "dart" => Some(Lang::Dart),
        "py" | "pyi" => Some(Lang::Python),
        "rb" => Some(Lang::Ruby),
        "lua" => Some(Lang::Lua),
        "sh" | "bash" | "zsh" => Some(Lang::Bash),
        "md" | "markdown" => Some(Lang::Markdown),
        "toml" => Some(Lang::Toml),
        "json" | "jsonc" => Some(Lang::Json),
        "yml" | "yaml" => Some(Lang::Yaml),
        "txt" | "rst" => Some(Lang::Text),
        _ => None,
    }
}

/// Check if a file should be indexed (has a recognised language).
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    detect_language(path).is_some()
}
