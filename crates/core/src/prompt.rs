use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::document::DocumentType;
use crate::input::InputRecord;

pub const DEFAULT_SUMMARY_CHARS: usize = 600;

/// Instruction/content pair sent to the generation provider for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPrompt {
    pub instructions: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPosition {
    Only,
    First,
    Middle,
    Last,
}

impl ChunkPosition {
    pub fn of(chunk: &Chunk) -> Self {
        match (chunk.is_first(), chunk.is_last()) {
            (true, true) => ChunkPosition::Only,
            (true, false) => ChunkPosition::First,
            (false, true) => ChunkPosition::Last,
            (false, false) => ChunkPosition::Middle,
        }
    }

    fn framing(&self) -> &'static str {
        match self {
            ChunkPosition::Only => {
                "This is the only part of the source material. Produce the complete document, from the first section through a short conclusion."
            }
            ChunkPosition::First => {
                "This is the first part of the source material. Begin the document: open with the first sections and do not write a conclusion yet."
            }
            ChunkPosition::Middle => {
                "This is a middle part of the source material. Continue the document without repeating prior content and maintain the flow of what has already been written."
            }
            ChunkPosition::Last => {
                "This is the final part of the source material. Continue without repeating prior content, then conclude the document."
            }
        }
    }
}

/// Builds the prompt for one chunk. Pure: identical arguments always yield
/// identical prompts.
pub fn build_chunk_prompt(
    doc_type: DocumentType,
    record: &InputRecord,
    chunk: &Chunk,
    previous_output: Option<&str>,
    summary_chars: usize,
) -> ChunkPrompt {
    let template = doc_type.template();
    let position = ChunkPosition::of(chunk);

    let mut instructions = String::new();
    instructions.push_str(template.role);
    instructions.push_str(&format!(
        "\n\nYou are writing a \"{}\" document. Use markdown headings for these sections, in order:\n",
        template.title
    ));
    for section in template.sections {
        instructions.push_str(&format!("- {section}\n"));
    }
    instructions.push_str(&format!("\nTone: {}\n", template.tone));
    instructions.push_str("Only use facts present in the source material; do not invent details.\n\n");
    instructions.push_str(&format!(
        "Part {} of {}. {}\n",
        chunk.index + 1,
        chunk.total_chunks,
        position.framing()
    ));

    let summary = record.summary(summary_chars);
    if !summary.is_empty() {
        instructions.push_str("\nKey facts from the full questionnaire:\n");
        instructions.push_str(&summary);
        instructions.push('\n');
    }

    if !chunk.is_first() {
        if let Some(previous) = previous_output.filter(|text| !text.trim().is_empty()) {
            instructions.push_str(
                "\nThe document so far ends with the text below. Pick up where it leaves off:\n<<<\n",
            );
            instructions.push_str(previous.trim());
            instructions.push_str("\n>>>\n");
        }
    }

    let content = format!(
        "Source material (part {} of {}):\n\n{}",
        chunk.index + 1,
        chunk.total_chunks,
        chunk.text
    );
    ChunkPrompt {
        instructions,
        content,
    }
}
