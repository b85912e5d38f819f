use super::Branch;

pub const SYSTEM_WITH_CONTEXT: &str = "You are an assistant answering questions about a PDF the user uploaded. \
Numbered excerpts from the document are given with each question. \
Base your answer on those excerpts and cite them inline as [n]. \
If the excerpts do not contain the answer, say that the document does not cover it.";

pub const SYSTEM_NO_CONTEXT: &str = "You are a helpful assistant. \
No document excerpts are available for this question, so answer from general knowledge \
and say so when you are unsure.";

pub fn system_prompt(branch: Branch) -> &'static str {
    match branch {
        Branch::WithContext => SYSTEM_WITH_CONTEXT,
        Branch::NoContext => SYSTEM_NO_CONTEXT,
    }
}

/// The final user turn; excerpts go in front of the question when present.
pub fn user_prompt(question: &str, context_text: &str, branch: Branch) -> String {
    match branch {
        Branch::WithContext if !context_text.trim().is_empty() => {
            format!("Excerpts:\n{}\n\nQuestion: {}", context_text.trim(), question)
        }
        _ => question.to_string(),
    }
}
