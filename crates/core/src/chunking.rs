use crate::error::IngestError;
use crate::models::{Chunk, Document};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkStrategy {
    #[default]
    Fixed,
    Paragraph,
}

// Splits `text` into contiguous, non-overlapping segments of at most `size`
// characters. Concatenating the result reproduces `text`.
pub fn chunk_text(text: &str, size: usize) -> Result<Vec<String>, IngestError> {
    if size == 0 {
        return Err(IngestError::InvalidConfiguration(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let chars: Vec<char> = text.chars().collect();
    Ok(chars
        .chunks(size)
        .map(|window| window.iter().collect::<String>())
        .collect())
}

pub fn chunk_by_paragraph(text: &str, size: usize) -> Result<Vec<String>, IngestError> {
    if size == 0 {
        return Err(IngestError::InvalidConfiguration(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in text.split_inclusive("\n\n") {
        let paragraph_len = paragraph.chars().count();

        if current_len + paragraph_len <= size {
            current.push_str(paragraph);
            current_len += paragraph_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if paragraph_len <= size {
            current.push_str(paragraph);
            current_len = paragraph_len;
        } else {
            let mut pieces = chunk_text(paragraph, size)?;
            if let Some(last) = pieces.pop() {
                current_len = last.chars().count();
                current = last;
            }
            chunks.extend(pieces);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    Ok(chunks)
}

pub fn chunk_document(
    document: &Document,
    size: usize,
    strategy: ChunkStrategy,
) -> Result<Vec<Chunk>, IngestError> {
    let segments = match strategy {
        ChunkStrategy::Fixed => chunk_text(&document.content, size)?,
        ChunkStrategy::Paragraph => chunk_by_paragraph(&document.content, size)?,
    };

    Ok(segments
        .into_iter()
        .filter(|segment| !segment.trim().is_empty())
        .enumerate()
        .map(|(index, content)| Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            chunk_index: index,
            content,
            metadata: document.metadata.clone(),
            source: document.source.clone(),
            doc_type: document.doc_type,
        })
        .collect())
}
