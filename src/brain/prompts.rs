//! Prompt assembly for the reasoning boundary.

/// Base instructions sent with every request. The response contract is
/// strict JSON so malformed output can be detected and recovered from.
pub const SYSTEM_CONTEXT: &str = "\
You are the reasoning service of a voice-driven software engineering \
assistant. The operator speaks short requests about their development \
work: running commands, managing tickets and projects, checking status.

Respond with a single JSON object and nothing else, using exactly these \
fields:
  \"speak\": string or null — short confirmation to read aloud
  \"action\": string or null — a shell command to execute, if any
  \"confidence\": number between 0 and 1
  \"needs_input\": boolean — true when you need clarification

If needs_input is true, action must be null. Prefer short spoken replies; \
the operator is listening, not reading.";

/// Assemble the full prompt for one request.
///
/// `workspace_context` carries live project/ticket summaries when a
/// context command is configured; `template` constrains template-matched
/// requests to the recognized task shape.
pub fn build_prompt(
    workspace_context: Option<&str>,
    history_lines: &[String],
    transcript: &str,
    template: Option<&str>,
) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(SYSTEM_CONTEXT);

    if let Some(context) = workspace_context {
        let context = context.trim();
        if !context.is_empty() {
            prompt.push_str("\n\nWorkspace context:\n");
            prompt.push_str(context);
        }
    }

    if !history_lines.is_empty() {
        prompt.push_str("\n\nRecent exchanges:\n");
        for line in history_lines {
            prompt.push_str("  ");
            prompt.push_str(line);
            prompt.push('\n');
        }
    }

    if let Some(name) = template {
        prompt.push_str(&format!(
            "\nThe request matches the known task template '{}'. \
             Stay within that task shape.\n",
            name
        ));
    }

    prompt.push_str("\nOperator request: ");
    prompt.push_str(transcript);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_transcript_and_contract() {
        let prompt = build_prompt(None, &[], "git status", None);
        assert!(prompt.contains("Operator request: git status"));
        assert!(prompt.contains("needs_input"));
    }

    #[test]
    fn test_prompt_includes_history_and_template() {
        let history = vec!["operator: run tests / assistant: running".to_string()];
        let prompt = build_prompt(None, &history, "again", Some("run-tests"));
        assert!(prompt.contains("Recent exchanges:"));
        assert!(prompt.contains("run-tests"));
    }

    #[test]
    fn test_empty_workspace_context_omitted() {
        let prompt = build_prompt(Some("  \n"), &[], "hello", None);
        assert!(!prompt.contains("Workspace context:"));
    }
}
