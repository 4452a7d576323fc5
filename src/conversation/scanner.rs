//! Incremental extraction of sentences and tool calls from a reply stream
//!
//! The scanner keeps the whole raw reply and a cursor marking the start of
//! the unprocessed suffix. Items are emitted in text order.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::tools::ToolArguments;

const CALL_OPEN: &str = "<functionCall>";
const CALL_CLOSE: &str = "</functionCall>";
const PARAMS_OPEN: &str = "<parameters>";
const PARAMS_CLOSE: &str = "</parameters>";

/// Terminator, whitespace, then an uppercase letter starting the next sentence
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?](\s+)\p{Lu}").expect("valid sentence regex"));

/// Opening tag of one parameter inside `<parameters>`
static PARAM_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([A-Za-z_][\w.\-]*)(?:\s+type\s*=\s*["']([A-Za-z]+)["'])?\s*(/?)>"#)
        .expect("valid parameter regex")
});

/// A tool call parsed out of the stream
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub parameters: ToolArguments,
}

/// A completed structural unit
#[derive(Debug, Clone, PartialEq)]
pub enum ScanItem {
    Sentence(String),
    ToolCall(ParsedToolCall),
}

/// Scans a growing reply for sentences and `<functionCall>` blocks
#[derive(Debug, Default)]
pub struct StreamScanner {
    raw: String,
    cursor: usize,
}

impl StreamScanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The full reply received so far
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Append a delta and return every unit it completed
    pub fn push(&mut self, delta: &str) -> Vec<ScanItem> {
        self.raw.push_str(delta);
        let mut items = Vec::new();

        loop {
            let rest = &self.raw[self.cursor..];

            let Some(open) = rest.find(CALL_OPEN) else {
                let consumed = split_sentences(rest, &mut items);
                self.cursor += consumed;
                return items;
            };

            // Text ahead of the block is complete once the block starts
            if open > 0 {
                flush_text(&rest[..open], &mut items);
                self.cursor += open;
                continue;
            }

            let Some(close) = rest.find(CALL_CLOSE) else {
                return items;
            };
            let end = close + CALL_CLOSE.len();
            let block = &rest[CALL_OPEN.len()..close];

            if !block.contains(PARAMS_CLOSE) {
                tracing::warn!(block, "dropping function call without parameters");
                self.cursor += end;
                continue;
            }

            match parse_call(block) {
                Some(call) => items.push(ScanItem::ToolCall(call)),
                None => tracing::warn!(block, "dropping malformed function call"),
            }
            self.cursor += end;
        }
    }

    /// End of stream: emit the remaining text as a final sentence
    ///
    /// An unterminated function call block is dropped. Prose after its last
    /// complete tag is still emitted.
    pub fn finish(&mut self) -> Vec<ScanItem> {
        let mut items = Vec::new();
        let rest = &self.raw[self.cursor..];

        let Some(open) = rest.find(CALL_OPEN) else {
            flush_text(rest, &mut items);
            self.cursor = self.raw.len();
            return items;
        };

        flush_text(&rest[..open], &mut items);

        let pending = &rest[open..];
        let markup_end = pending.rfind('>').map_or(pending.len(), |i| i + 1);
        let trailing = &pending[markup_end..];
        let prose = trailing.find('<').map_or(trailing, |i| &trailing[..i]);
        tracing::warn!(
            pending = &pending[..markup_end],
            "dropping incomplete function call"
        );
        flush_text(prose, &mut items);

        self.cursor = self.raw.len();
        items
    }
}

/// Emit every sentence in `text`, including an unterminated final one
fn flush_text(text: &str, items: &mut Vec<ScanItem>) {
    let consumed = split_sentences(text, items);
    push_sentence(&text[consumed..], items);
}

/// Emit every sentence followed by a boundary, returning bytes consumed
fn split_sentences(text: &str, items: &mut Vec<ScanItem>) -> usize {
    let mut start = 0;
    for caps in SENTENCE_BOUNDARY.captures_iter(text) {
        let Some(space) = caps.get(1) else { continue };
        push_sentence(&text[start..space.start()], items);
        start = space.end();
    }
    start
}

fn push_sentence(text: &str, items: &mut Vec<ScanItem>) {
    let sentence = text.trim();
    if !sentence.is_empty() {
        items.push(ScanItem::Sentence(sentence.to_string()));
    }
}

/// Parse the inside of a `<functionCall>` block
fn parse_call(block: &str) -> Option<ParsedToolCall> {
    let name = between(block, "<name>", "</name>")?.trim();
    if name.is_empty() {
        return None;
    }

    let params = between(block, PARAMS_OPEN, PARAMS_CLOSE).unwrap_or_default();
    Some(ParsedToolCall {
        name: name.to_string(),
        parameters: parse_parameters(params),
    })
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    Some(&text[start..start + len])
}

fn parse_parameters(mut body: &str) -> ToolArguments {
    let mut parameters = ToolArguments::new();

    while let Some(caps) = PARAM_TAG.captures(body) {
        let (Some(tag), Some(whole)) = (caps.get(1), caps.get(0)) else {
            break;
        };
        let name = tag.as_str();
        let kind = caps.get(2).map_or("string", |m| m.as_str());
        let after_open = &body[whole.end()..];

        if caps.get(3).is_some_and(|m| !m.as_str().is_empty()) {
            parameters.insert(name.to_string(), typed_value("", kind));
            body = after_open;
            continue;
        }

        let close = format!("</{name}>");
        let Some(len) = after_open.find(&close) else {
            tracing::debug!(parameter = name, "unterminated parameter");
            break;
        };

        parameters.insert(name.to_string(), typed_value(&after_open[..len], kind));
        body = &after_open[len + close.len()..];
    }

    parameters
}

/// Convert a raw value by its declared type, falling back to a string
fn typed_value(raw: &str, kind: &str) -> Value {
    let trimmed = raw.trim();
    let parsed = match kind.to_ascii_lowercase().as_str() {
        "number" | "float" => trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "integer" | "int" => trimmed.parse::<i64>().ok().map(Value::from),
        "boolean" | "bool" => match trimmed.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        "array" | "object" => serde_json::from_str(trimmed).ok(),
        _ => None,
    };

    parsed.unwrap_or_else(|| Value::String(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sentence(text: &str) -> ScanItem {
        ScanItem::Sentence(text.to_string())
    }

    fn feed(scanner: &mut StreamScanner, deltas: &[&str]) -> Vec<ScanItem> {
        let mut items: Vec<ScanItem> = deltas.iter().flat_map(|d| scanner.push(d)).collect();
        items.extend(scanner.finish());
        items
    }

    #[test]
    fn sentences_wait_for_next_capital() {
        let mut scanner = StreamScanner::new();
        assert!(scanner.push("Hello there.").is_empty());
        assert!(scanner.push(" ").is_empty());
        assert_eq!(scanner.push("How are"), vec![sentence("Hello there.")]);
        assert_eq!(scanner.finish(), vec![sentence("How are")]);
    }

    #[test]
    fn lowercase_after_period_is_not_a_boundary() {
        let mut scanner = StreamScanner::new();
        let items = feed(&mut scanner, &["It costs 3. dollars? No. ", "Really."]);
        assert_eq!(
            items,
            vec![
                sentence("It costs 3. dollars?"),
                sentence("No."),
                sentence("Really."),
            ]
        );
    }

    #[test]
    fn mixed_stream_keeps_text_order() {
        let mut scanner = StreamScanner::new();
        let items = feed(
            &mut scanner,
            &[
                "Hello world. <functionCall><name>x</name>",
                "<parameters></parameters></functionCall> done.",
            ],
        );

        assert_eq!(
            items,
            vec![
                sentence("Hello world."),
                ScanItem::ToolCall(ParsedToolCall {
                    name: "x".to_string(),
                    parameters: ToolArguments::new(),
                }),
                sentence("done."),
            ]
        );
    }

    #[test]
    fn block_needs_both_closing_tags() {
        let mut scanner = StreamScanner::new();
        assert!(scanner.push("<functionCall><name>x</name><parameters>").is_empty());
        assert!(scanner.push("<q type=\"string\">a</q>").is_empty());
        let items = scanner.push("</parameters></functionCall>");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn parameters_are_typed() {
        let mut scanner = StreamScanner::new();
        let items = feed(
            &mut scanner,
            &[
                "<functionCall>\n  <name>search</name>\n  <parameters>\n",
                "    <query type=\"string\"> rust async </query>\n",
                "    <limit type=\"integer\">5</limit>\n",
                "    <ratio type=\"number\">0.5</ratio>\n",
                "    <exact type=\"boolean\">True</exact>\n",
                "    <tags type=\"array\">[\"a\", \"b\"]</tags>\n",
                "    <note>plain</note>\n",
                "    <bad type=\"integer\">many</bad>\n",
                "  </parameters>\n</functionCall>",
            ],
        );

        let [ScanItem::ToolCall(call)] = items.as_slice() else {
            panic!("expected one call, got {items:?}");
        };
        assert_eq!(call.name, "search");
        assert_eq!(call.parameters["query"], json!("rust async"));
        assert_eq!(call.parameters["limit"], json!(5));
        assert_eq!(call.parameters["ratio"], json!(0.5));
        assert_eq!(call.parameters["exact"], json!(true));
        assert_eq!(call.parameters["tags"], json!(["a", "b"]));
        assert_eq!(call.parameters["note"], json!("plain"));
        assert_eq!(call.parameters["bad"], json!("many"));
    }

    #[test]
    fn incomplete_block_is_dropped_at_finish() {
        let mut scanner = StreamScanner::new();
        let items = feed(&mut scanner, &["Checking. <functionCall><name>x</name><param"]);
        assert_eq!(items, vec![sentence("Checking.")]);
    }

    #[test]
    fn block_without_parameters_does_not_hold_back_text() {
        let mut scanner = StreamScanner::new();
        let streamed =
            scanner.push("<functionCall><name>x</name></functionCall> Then more. Okay here.");
        assert_eq!(streamed, vec![sentence("Then more.")]);
        assert_eq!(scanner.finish(), vec![sentence("Okay here.")]);
    }

    #[test]
    fn unclosed_literal_tag_keeps_following_prose() {
        let mut scanner = StreamScanner::new();
        let items = feed(
            &mut scanner,
            &["Use the ", "<functionCall> tag to call tools. It takes a name."],
        );
        assert_eq!(
            items,
            vec![
                sentence("Use the"),
                sentence("tag to call tools."),
                sentence("It takes a name."),
            ]
        );
    }

    #[test]
    fn consecutive_calls_are_both_extracted() {
        let call = "<functionCall><name>t</name><parameters></parameters></functionCall>";
        let mut scanner = StreamScanner::new();
        let items = feed(&mut scanner, &[call, call]);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| matches!(i, ScanItem::ToolCall(_))));
    }

    #[test]
    fn raw_keeps_everything() {
        let mut scanner = StreamScanner::new();
        feed(&mut scanner, &["Bye!", "\n<END>"]);
        assert_eq!(scanner.raw(), "Bye!\n<END>");
    }
}
