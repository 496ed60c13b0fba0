//! Block-aware markdown splitter.
//!
//! The input is scanned line by line and cut into logical blocks: a fenced
//! code block, a run of list items, or a single paragraph line. Blank lines
//! only separate blocks and are never emitted. Each block becomes one chunk;
//! a block longer than the limit is split further without ever mixing its
//! pieces with another block:
//!
//! - fenced code keeps its opening line and a closing fence in every piece,
//! - paragraphs and lists are packed line by line,
//! - a single line that is still too long is cut at the last space before the
//!   limit, or hard-cut when it has no space.
//!
//! Lengths are counted in `char`s, so a cut never lands inside a UTF-8
//! sequence.

const FENCE: &str = "```";

/// Split `text` into chunks of at most `max_len` characters.
///
/// Total and deterministic: an empty input yields no chunks, and an
/// unterminated fence runs to the end of the input.
pub fn split_markdown(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let lines: Vec<&str> = text.split('\n').collect();
    let mut chunks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if is_blank(line) {
            i += 1;
            continue;
        }

        let (kind, end) = if is_fence(line) {
            (BlockKind::Fence, closing_fence(&lines, i))
        } else if is_list_item(line) {
            (BlockKind::List, end_of_list(&lines, i))
        } else {
            (BlockKind::Paragraph, i)
        };

        push_block(kind, &lines[i..=end], max_len, &mut chunks);
        i = end + 1;
    }

    chunks
}

/// Chunks of a still-growing `text` that no later append can revise.
///
/// Only complete lines are considered (the text after the last newline may
/// still change what block it belongs to), and the last chunk of those lines
/// is held back because its block may continue. The result is always a
/// prefix of `split_markdown` applied to any extension of `text`.
pub fn settled_chunks(text: &str, max_len: usize) -> Vec<String> {
    let Some(last_newline) = text.rfind('\n') else {
        return Vec::new();
    };
    let mut chunks = split_markdown(&text[..last_newline], max_len);
    chunks.pop();
    chunks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Fence,
    List,
    Paragraph,
}

fn push_block(kind: BlockKind, lines: &[&str], max_len: usize, out: &mut Vec<String>) {
    let block = lines.join("\n");
    if char_len(&block) <= max_len {
        out.push(block);
        return;
    }
    match kind {
        BlockKind::Fence => split_fence(lines, max_len, out),
        BlockKind::List | BlockKind::Paragraph => split_generic(lines, max_len, out),
    }
}

/// Split an oversized fenced block into pieces that are each a valid fence.
///
/// An unterminated block gets a synthetic closing fence on every piece.
fn split_fence(lines: &[&str], max_len: usize, out: &mut Vec<String>) {
    let header = lines[0];
    let body = match lines.split_last() {
        Some((last, rest)) if lines.len() > 1 && is_fence(last) => &rest[1..],
        _ => &lines[1..],
    };

    // Nothing to redistribute, or no room for body text next to the header
    // and closing fence: emit the block as-is.
    let overhead = char_len(header) + FENCE.len() + 2;
    if body.is_empty() || overhead >= max_len {
        out.push(lines.join("\n"));
        return;
    }

    let budget = max_len - overhead;
    let wrap = |content: &str| format!("{header}\n{content}\n{FENCE}");

    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;

    for &line in body {
        let len = char_len(line);
        let sep = usize::from(!current.is_empty());

        if current_len + sep + len <= budget {
            current.push(line);
            current_len += sep + len;
            continue;
        }

        if !current.is_empty() {
            out.push(wrap(&current.join("\n")));
            current.clear();
            current_len = 0;
        }

        if len <= budget {
            current.push(line);
            current_len = len;
        } else {
            for part in split_line(line, budget) {
                out.push(wrap(&part));
            }
        }
    }

    if !current.is_empty() {
        out.push(wrap(&current.join("\n")));
    }
}

/// Pack paragraph or list lines into chunks, flushing when the next line
/// would overflow. The tail of a cut line seeds the next chunk.
fn split_generic(lines: &[&str], max_len: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_len = 0;

    for &line in lines {
        let len = char_len(line);

        if len > max_len {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let mut parts = split_line(line, max_len);
            let tail = parts.pop().unwrap_or_default();
            out.extend(parts);
            current_len = char_len(&tail);
            current = tail;
            continue;
        }

        let sep = usize::from(!current.is_empty());
        if current_len + sep + len <= max_len {
            if sep == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_len += sep + len;
        } else {
            out.push(std::mem::replace(&mut current, line.to_string()));
            current_len = len;
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
}

/// Cut a single line into parts of at most `max_len` characters.
///
/// Each cut happens at the rightmost space at or before character index
/// `max_len`; the remainder has its leading whitespace trimmed. A token with
/// no space before the limit is hard-cut at exactly `max_len` characters.
pub(crate) fn split_line(line: &str, max_len: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = line;

    while let Some((cut, ch)) = rest.char_indices().nth(max_len) {
        let window = &rest[..cut + ch.len_utf8()];
        let split_at = match window.rfind(' ') {
            Some(pos) if pos > 0 => pos,
            _ => cut,
        };
        parts.push(rest[..split_at].to_string());
        rest = rest[split_at..].trim_start();
    }

    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

fn closing_fence(lines: &[&str], start: usize) -> usize {
    (start + 1..lines.len())
        .find(|&i| is_fence(lines[i]))
        .unwrap_or(lines.len() - 1)
}

/// A list runs until a blank line or a line without a list marker.
fn end_of_list(lines: &[&str], start: usize) -> usize {
    let mut end = start;
    while end + 1 < lines.len() {
        let next = lines[end + 1];
        if is_blank(next) || !is_list_item(next) {
            break;
        }
        end += 1;
    }
    end
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}

/// `- item`, `* item`, `+ item` or `12. item`, optionally indented.
fn is_list_item(line: &str) -> bool {
    let rest = line.trim_start();
    let after_marker = if let Some(r) = rest.strip_prefix(['-', '*', '+']) {
        r
    } else {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return false;
        }
        match rest[digits..].strip_prefix('.') {
            Some(r) => r,
            None => return false,
        }
    };
    after_marker.starts_with(char::is_whitespace)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
