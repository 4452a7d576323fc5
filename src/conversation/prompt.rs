//! System and tool-result prompts

use std::fmt::Write;

use crate::tools::{ToolDefinition, ToolResponse};

/// Instructions describing the available tools, the call format and the end keyword
#[must_use]
pub fn tool_prompt(tools: &[ToolDefinition], end_keyword: &str) -> String {
    let mut prompt = String::new();

    if !tools.is_empty() {
        let listing = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
        let _ = write!(
            prompt,
            "You can call the following tools:\n{listing}\n\n\
             To call a tool, write a block in exactly this format:\n\
             <functionCall>\n  \
               <name>TOOL_NAME</name>\n  \
               <parameters>\n    \
                 <PARAM_NAME type=\"TYPE\">VALUE</PARAM_NAME>\n  \
               </parameters>\n\
             </functionCall>\n\
             TYPE is one of string, number, integer, boolean, array or object; \
             array and object values are written as JSON. You may call several \
             tools in one reply. Results come back in <functionResult> blocks; \
             use them to answer the user.\n"
        );
    }

    if !end_keyword.is_empty() {
        if !prompt.is_empty() {
            prompt.push('\n');
        }
        let _ = write!(
            prompt,
            "When the user says goodbye or the conversation is clearly over, \
             say goodbye and end your reply with {end_keyword} on its own line."
        );
    }

    prompt
}

/// Full system prompt: base instructions followed by the tool prompt
#[must_use]
pub fn system_prompt(base: &str, tools: &[ToolDefinition], end_keyword: &str) -> String {
    let suffix = tool_prompt(tools, end_keyword);
    match (base.trim().is_empty(), suffix.is_empty()) {
        (true, _) => suffix,
        (false, true) => base.trim().to_string(),
        (false, false) => format!("{}\n\n{suffix}", base.trim()),
    }
}

/// Prompt carrying tool results back to the model
#[must_use]
pub fn tool_results_prompt(results: &[(String, ToolResponse)]) -> String {
    let mut prompt = String::new();
    for (name, response) in results {
        let _ = writeln!(
            prompt,
            "<functionResult>\n  <name>{name}</name>\n  <response>{}</response>\n</functionResult>",
            response.text
        );
    }
    prompt.trim_end().to_string()
}
