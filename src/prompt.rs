pub const INST_OPEN: &str = "[INST] ";
pub const INST_CLOSE: &str = " [/INST]";

pub const START_MARKER: &str = "<START>";
pub const END_MARKER: &str = "<END>";

pub const TASK_OPEN: &str = "<TASK>";
pub const TASK_CLOSE: &str = "</TASK>";

/// Wraps a user turn as `[INST] {text} [/INST]`.
pub fn wrap_instruction(text: &str) -> String {
    format!("{}{}{}", INST_OPEN, text, INST_CLOSE)
}

/// The user turn: task tag followed by the context block.
pub fn task_block(task: &str, context: &str) -> String {
    format!(
        "{}{}{}\n<CONTEXT>\n{}\n</CONTEXT>",
        TASK_OPEN, task, TASK_CLOSE, context
    )
}

/// Compiles the full prompt fed to the model for `task`:
///
/// ```text
/// [INST] <TASK>{task}</TASK>
/// <CONTEXT>
/// {context}
/// </CONTEXT> [/INST]
/// ```
pub fn compile_prompt(task: &str, context: &str) -> String {
    wrap_instruction(&task_block(task, context))
}

/// Wraps an expected answer in the start/end markers.
pub fn mark_response(response: &str) -> String {
    format!("{}{}{}", START_MARKER, response, END_MARKER)
}

/// Text between the first start marker and the following end marker,
/// trimmed. `None` unless both markers occur in `raw`.
pub fn extract_marked(raw: &str) -> Option<&str> {
    if !raw.contains(START_MARKER) || !raw.contains(END_MARKER) {
        return None;
    }

    let (_, after_start) = raw.split_once(START_MARKER)?;
    let inner = after_start
        .split_once(END_MARKER)
        .map(|(inner, _)| inner)
        .unwrap_or(after_start);

    Some(inner.trim())
}

/// The task name inside `<TASK>...</TASK>`, or `"unknown"`.
pub fn extract_task(user_turn: &str) -> &str {
    user_turn
        .split_once(TASK_OPEN)
        .and_then(|(_, rest)| rest.split_once(TASK_CLOSE))
        .map(|(task, _)| task)
        .unwrap_or("unknown")
}
