//! Post-processing of pseudo-tags embedded in the cumulative text.
//!
//! `<think>...</think>` spans move to the thinking channel. `<tool_call>...</tool_call>`
//! spans (with their `<arg_key>`/`<arg_value>` children) are wrapped in a fenced code
//! block so Markdown renderers show them literally.

use once_cell::sync::Lazy;
use regex::Regex;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
pub const TOOL_CALL_OPEN: &str = "<tool_call>";
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";

const FENCE_OPEN: &str = "\n```xml\n";
const FENCE_CLOSE: &str = "\n```\n";

static THINK_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("think span regex is valid"));

/// Display and thinking views of one cumulative text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    /// Visible text with think spans removed. Whitespace is left as is; see [`settle_display`].
    pub display: String,
    /// All thinking spans joined by a blank line; empty when there are none.
    pub thinking: String,
    /// The cumulative text contains a `<think>` tag, closed or not.
    pub has_think: bool,
}

/// Renders the cumulative text.
///
/// While the stream is live (`final_pass == false`) an unfinished tag prefix at the end
/// (`<`, `<thi`, `<tool_ca`, ...) is held back, and an unclosed `<think>` is treated as
/// thinking still in progress.
pub fn render(cumulative: &str, final_pass: bool) -> Rendered {
    let mut thinking: Vec<String> = THINK_SPAN
        .captures_iter(cumulative)
        .filter_map(|caps| caps.get(1))
        .map(|inner| inner.as_str().trim().to_string())
        .filter(|inner| !inner.is_empty())
        .collect();
    let mut had_think = !thinking.is_empty() || THINK_SPAN.is_match(cumulative);

    let stripped = THINK_SPAN.replace_all(cumulative, "");
    let mut visible: &str = &stripped;

    if let Some(open) = visible.find(THINK_OPEN) {
        had_think = true;
        let mut in_progress = &visible[open + THINK_OPEN.len()..];
        if !final_pass {
            in_progress = hold_back_partial(in_progress, &[THINK_CLOSE]);
        }
        let in_progress = in_progress.trim();
        if !in_progress.is_empty() {
            thinking.push(in_progress.to_string());
        }
        visible = &visible[..open];
    }

    if !final_pass {
        visible = hold_back_partial(visible, &[THINK_OPEN, TOOL_CALL_OPEN]);
    }

    Rendered {
        display: fence_tool_calls(visible),
        thinking: thinking.join("\n\n"),
        has_think: had_think,
    }
}

/// Applies the whitespace policy to a rendered display so delivered text is never
/// taken back.
///
/// Trailing whitespace is held back while the stream is live, since a think span may
/// still follow it. With think tags present, leading whitespace is dropped unless some
/// was already delivered, and trailing whitespace is dropped on the final pass.
pub fn settle_display<'a>(
    display: &'a str,
    has_think: bool,
    delivered: &str,
    final_pass: bool,
) -> &'a str {
    let mut settled = display;
    if has_think && !delivered.starts_with(char::is_whitespace) {
        settled = settled.trim_start();
    }
    if !final_pass || has_think {
        settled = settled.trim_end();
    }
    settled
}

/// Appended part of the display, or `None` when `current` does not extend `previous`.
pub fn display_delta<'a>(previous: &str, current: &'a str) -> Option<&'a str> {
    current.strip_prefix(previous)
}

/// Cuts a trailing prefix of any of `tags` off the end of `text`.
fn hold_back_partial<'a>(text: &'a str, tags: &[&str]) -> &'a str {
    let cut = tags
        .iter()
        .filter_map(|tag| {
            (1..tag.len())
                .rev()
                .find(|&len| text.ends_with(&tag[..len]))
        })
        .max()
        .unwrap_or(0);
    &text[..text.len() - cut]
}

fn fence_tool_calls(text: &str) -> String {
    if !text.contains(TOOL_CALL_OPEN) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 16);
    let mut rest = text;
    while let Some(open) = rest.find(TOOL_CALL_OPEN) {
        out.push_str(&rest[..open]);
        out.push_str(FENCE_OPEN);
        let span = &rest[open..];
        match span.find(TOOL_CALL_CLOSE) {
            Some(close) => {
                let end = close + TOOL_CALL_CLOSE.len();
                out.push_str(&span[..end]);
                out.push_str(FENCE_CLOSE);
                rest = &span[end..];
            }
            None => {
                out.push_str(span);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_think_span_moves_to_thinking() {
        let rendered = render("<think>plan</think>visible", false);
        assert_eq!(rendered.thinking, "plan");
        assert_eq!(rendered.display, "visible");
    }

    #[test]
    fn think_flag_tracks_open_tag() {
        assert!(render("<think>x", false).has_think);
        assert!(render("a<think>x</think>", false).has_think);
        assert!(!render("a <thi", false).has_think);
    }

    #[test]
    fn multiple_spans_join_with_blank_line() {
        let rendered = render("<think>one</think>A<think>\ntwo\n</think> B", true);
        assert_eq!(rendered.thinking, "one\n\ntwo");
        assert_eq!(rendered.display, "A B");
    }

    #[test]
    fn unclosed_think_is_in_progress_thinking() {
        let rendered = render("<think>still going</th", false);
        assert_eq!(rendered.thinking, "still going");
        assert_eq!(rendered.display, "");
    }

    #[test]
    fn partial_open_tag_is_held_back_while_live() {
        assert_eq!(render("Answer <th", false).display, "Answer ");
        assert_eq!(render("Answer <th", true).display, "Answer <th");
        assert_eq!(render("a < b", false).display, "a < b");
        assert_eq!(render("x <", false).display, "x ");
    }

    #[test]
    fn text_without_tags_passes_through() {
        let rendered = render("  plain text \n", false);
        assert_eq!(rendered.display, "  plain text \n");
        assert_eq!(rendered.thinking, "");
    }

    #[test]
    fn tool_call_is_fenced() {
        let text = "Calling<tool_call>search<arg_key>q</arg_key><arg_value>rust</arg_value></tool_call>done";
        assert_eq!(
            render(text, false).display,
            "Calling\n```xml\n<tool_call>search<arg_key>q</arg_key><arg_value>rust</arg_value></tool_call>\n```\ndone"
        );
    }

    #[test]
    fn unclosed_tool_call_fence_grows_by_append() {
        let open = render("Go<tool_call>search<arg_key>q", false).display;
        let closed = render("Go<tool_call>search<arg_key>q</arg_key></tool_call>", false).display;
        assert!(closed.starts_with(&open));
    }

    #[test]
    fn display_delta_only_reports_appends() {
        assert_eq!(display_delta("abc", "abcd"), Some("d"));
        assert_eq!(display_delta("abc", "abc"), Some(""));
        assert_eq!(display_delta("héllo", "hérmit"), None);
    }

    #[test]
    fn live_display_holds_back_trailing_whitespace() {
        assert_eq!(settle_display("Hello \n", false, "", false), "Hello");
        assert_eq!(settle_display("Hello \n", false, "", true), "Hello \n");
        assert_eq!(settle_display("  Hello", false, "", false), "  Hello");
    }

    #[test]
    fn think_strips_leading_whitespace_only_before_delivery() {
        assert_eq!(settle_display("  answer ", true, "", true), "answer");
        assert_eq!(settle_display("  answer more", true, "answer", false), "answer more");
        assert_eq!(
            settle_display(" Hello world", true, " Hello", false),
            " Hello world"
        );
    }
}
