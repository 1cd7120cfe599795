use itertools::Itertools;

use crate::database::SimilarityMatch;

pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Join match contents in ranked order, separated by a blank line
#[inline]
pub fn assemble_context(matches: &[SimilarityMatch]) -> String {
    matches
        .iter()
        .map(|m| m.document.content.as_str())
        .join(CONTEXT_SEPARATOR)
}

#[inline]
pub fn build_prompt(context: &str, query: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {query}\n\nAnswer:")
}
