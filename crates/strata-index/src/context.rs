//! Embedding text and display headers for persisted chunks.

use crate::store::PersistedChunk;

/// Maximum number of import lines included in the embedding text.
const MAX_IMPORT_LINES: usize = 5;

/// Text handed to the embedder: a path/language/symbol header, up to five
/// imports, then the enriched content when present.
#[must_use]
pub fn contextualize_for_embedding(chunk: &PersistedChunk) -> String {
    let body = chunk.searchable_text();
    let mut text = String::with_capacity(body.len() + 256);

    text.push_str("# ");
    text.push_str(&chunk.file_path);
    text.push('\n');

    text.push_str("# Language: ");
    text.push_str(chunk.language.id());
    text.push('\n');

    if !chunk.symbols.is_empty() {
        text.push_str("# Symbols: ");
        text.push_str(&chunk.symbols.join(", "));
        text.push('\n');
    }

    for import in chunk.imports.iter().take(MAX_IMPORT_LINES) {
        text.push_str(import);
        text.push('\n');
    }

    text.push_str(body);
    text
}

/// `path :: name (lines a-b)`, naming the first symbol or the chunk type.
#[must_use]
pub fn chunk_display_header(chunk: &PersistedChunk) -> String {
    let name = chunk.symbols.first().unwrap_or(&chunk.chunk_type);
    format!(
        "{} :: {} (lines {}-{})",
        chunk.file_path, name, chunk.start_line, chunk.end_line
    )
}
