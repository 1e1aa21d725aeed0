//! Completion prompt assembly.

use crate::models::{AnalysisMode, Concept, PromptSpec, ScoredChunk};

const EXPLANATION_CLAUSE: &str =
    " Please provide a brief explanation of the results next to the result separated by a semicolon";

/// Render the instruction part of a prompt: the caller's messages, the
/// concept definition and the requested output format, one per line.
pub fn render(parts: &PromptSpec, concept: &Concept, mode: AnalysisMode) -> String {
    let concept_line = format!(
        "The concept '{}' is described as follows: {}",
        concept.name, concept.description
    );
    let mut prompt = [
        parts.system_message.as_str(),
        parts.user_message.as_str(),
        concept_line.as_str(),
        "Please provide the output in the following format:",
        parts.output_format.as_str(),
    ]
    .join("\n");

    match mode {
        AnalysisMode::Coding if parts.explanations => prompt.push_str(EXPLANATION_CLAUSE),
        AnalysisMode::Coding | AnalysisMode::Retrieval => {}
    }
    prompt
}

/// Prompt for a document small enough to send whole.
pub fn direct_request(rendered: &str, text: &str) -> String {
    format!("{}\nHere is the text of the document:\n{}", rendered, text)
}

/// Prompt carrying only the retrieved passages, in rank order.
pub fn retrieval_request(rendered: &str, evidence: &[ScoredChunk]) -> String {
    let passages: Vec<&str> = evidence.iter().map(|s| s.chunk.text.as_str()).collect();
    format!(
        "{}\nHere are the relevant chunks from the text:\n{}",
        rendered,
        passages.join("\n\n")
    )
}
