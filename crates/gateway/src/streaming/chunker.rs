//! Long-reply chunking.
//!
//! Transforms a finished reply into an ordered list of chunks each within a
//! platform budget (Telegram 4096 − 100, Discord 2000 − 100, or a caller
//! override).  Splitting strategies, tried in order until one succeeds:
//!
//! 1. Preserve code fences: split between fenced and unfenced regions; an
//!    over-long fenced region is re-wrapped into multiple fences of the same
//!    language, splitting only on newline boundaries.
//! 2. Paragraph boundary (blank line).
//! 3. Sentence boundary (`.!?` followed by whitespace).
//! 4. Word boundary (last space within the budget).
//! 5. Hard cut at the budget.
//!
//! Lengths are counted in characters, not bytes.

use cb_domain::config::ChunkConfig;
use cb_domain::message::Transport;

/// The chunk budget for a transport: documented platform limits minus the
/// safety margin, or the configured default for everything else.
pub fn platform_budget(transport: Transport, config: &ChunkConfig) -> usize {
    match transport {
        Transport::Telegram => ChunkConfig::telegram_budget(),
        Transport::Discord => ChunkConfig::discord_budget(),
        _ => config.max_length,
    }
}

/// Smart message chunker for platform-limited transports.
#[derive(Debug, Clone)]
pub struct MessageChunker {
    config: ChunkConfig,
}

impl Default for MessageChunker {
    fn default() -> Self {
        Self::new(ChunkConfig::default())
    }
}

impl MessageChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Split `text` into chunks of at most `max_length` characters.
    pub fn chunk(&self, text: &str, max_length: Option<usize>) -> Vec<String> {
        let max_len = max_length.unwrap_or(self.config.max_length);
        if char_len(text) <= max_len {
            return vec![text.to_owned()];
        }

        if text.contains("```") {
            if let Some(chunks) = self.split_preserving_code_blocks(text, max_len) {
                return chunks;
            }
        }

        self.split_text(text, max_len)
    }

    /// Chunk for Telegram's message limit (minus margin).
    pub fn chunk_for_telegram(&self, text: &str) -> Vec<String> {
        self.chunk(text, Some(ChunkConfig::telegram_budget()))
    }

    /// Chunk for Discord's message limit (minus margin).
    pub fn chunk_for_discord(&self, text: &str) -> Vec<String> {
        self.chunk(text, Some(ChunkConfig::discord_budget()))
    }

    /// Prefix each chunk with a `[i/N]` indicator.
    pub fn add_indicators(&self, chunks: Vec<String>) -> Vec<String> {
        let total = chunks.len();
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| format!("[{}/{}]\n{}", i + 1, total, chunk))
            .collect()
    }

    /// Estimate how many chunks a text will produce.
    pub fn estimate_chunks(&self, text: &str, max_length: Option<usize>) -> usize {
        let max_len = max_length.unwrap_or(self.config.max_length);
        let len = char_len(text);
        if len <= max_len {
            1
        } else {
            len / max_len + 1
        }
    }

    // ── Code-fence-aware splitting ───────────────────────────────────

    fn split_preserving_code_blocks(&self, text: &str, max_len: usize) -> Option<Vec<String>> {
        let parts = split_fenced_regions(text)?;

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for part in parts {
            match part {
                Region::Code(code) => {
                    if char_len(&current) + char_len(&code) <= max_len {
                        current.push_str(&code);
                    } else {
                        if !current.trim().is_empty() {
                            chunks.push(current.trim().to_owned());
                        }
                        current = String::new();

                        if char_len(&code) <= max_len {
                            current = code;
                        } else {
                            let mut code_chunks = split_long_code_block(&code, max_len);
                            if let Some(last) = code_chunks.pop() {
                                chunks.extend(code_chunks);
                                current = last;
                            }
                        }
                    }
                }
                Region::Text(plain) => {
                    if char_len(&current) + char_len(&plain) <= max_len {
                        current.push_str(&plain);
                    } else {
                        if !current.trim().is_empty() {
                            chunks.push(current.trim().to_owned());
                        }
                        let mut text_chunks = self.split_text(&plain, max_len);
                        if let Some(last) = text_chunks.pop() {
                            chunks.extend(text_chunks);
                            current = last;
                        } else {
                            current = String::new();
                        }
                    }
                }
            }
        }

        if !current.trim().is_empty() {
            chunks.push(current.trim().to_owned());
        }

        (!chunks.is_empty()).then_some(chunks)
    }

    // ── Plain-text splitting (paragraph → sentence → word → hard) ────

    fn split_text(&self, text: &str, max_len: usize) -> Vec<String> {
        if let Some(chunks) = split_at_paragraphs(text, max_len) {
            return chunks;
        }
        if let Some(chunks) = split_at_sentences(text, max_len) {
            return chunks;
        }
        hard_split(text, max_len)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fenced regions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Region {
    Text(String),
    Code(String),
}

/// Split into alternating plain and fenced regions.  Returns `None` when
/// the fences are unbalanced (callers fall back to plain splitting).
fn split_fenced_regions(text: &str) -> Option<Vec<Region>> {
    let re = regex::Regex::new(r"```[\s\S]*?```").expect("static pattern");
    let mut parts = Vec::new();
    let mut last_end = 0;

    for m in re.find_iter(text) {
        if m.start() > last_end {
            parts.push(Region::Text(text[last_end..m.start()].to_owned()));
        }
        parts.push(Region::Code(m.as_str().to_owned()));
        last_end = m.end();
    }

    let tail = &text[last_end..];
    if tail.contains("```") {
        // Unterminated fence.
        return None;
    }
    if !tail.is_empty() {
        parts.push(Region::Text(tail.to_owned()));
    }

    Some(parts)
}

/// Re-wrap an over-long fenced block into multiple fences of the same
/// language, splitting only between lines.
fn split_long_code_block(code_block: &str, max_len: usize) -> Vec<String> {
    let re = regex::Regex::new(r"^```(\w*)\n?([\s\S]*?)```$").expect("static pattern");
    let Some(caps) = re.captures(code_block.trim()) else {
        return hard_split(code_block, max_len);
    };

    let lang = caps.get(1).map_or("", |m| m.as_str());
    let content = caps.get(2).map_or("", |m| m.as_str());

    // Room left for content once the fence wrapper and a small buffer are
    // accounted for.
    let wrapper_len = char_len(&format!("```{lang}\n\n```"));
    let content_max = max_len.saturating_sub(wrapper_len + 20).max(1);

    let mut chunks = Vec::new();
    let mut current_lines: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for line in content.split('\n') {
        let line_len = char_len(line) + 1;
        if current_len + line_len <= content_max || current_lines.is_empty() {
            current_lines.push(line);
            current_len += line_len;
        } else {
            chunks.push(wrap_fence(lang, &current_lines));
            current_lines = vec![line];
            current_len = line_len;
        }
    }
    if !current_lines.is_empty() {
        chunks.push(wrap_fence(lang, &current_lines));
    }

    chunks
}

fn wrap_fence(lang: &str, lines: &[&str]) -> String {
    let mut content = lines.join("\n");
    // Drop a trailing newline the fence itself will re-add.
    while content.ends_with('\n') {
        content.pop();
    }
    format!("```{lang}\n{content}\n```")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plain-text strategies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn split_at_paragraphs(text: &str, max_len: usize) -> Option<Vec<String>> {
    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    if paragraphs.len() == 1 {
        return None;
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in paragraphs {
        if char_len(&current) + char_len(para) + 2 <= max_len {
            if current.is_empty() {
                current = para.to_owned();
            } else {
                current.push_str("\n\n");
                current.push_str(para);
            }
        } else {
            if !current.trim().is_empty() {
                chunks.push(current.trim().to_owned());
            }
            if char_len(para) <= max_len {
                current = para.to_owned();
            } else {
                // Paragraph too long on its own; fall to sentences.
                let mut sub = split_at_sentences(para, max_len)
                    .unwrap_or_else(|| hard_split(para, max_len));
                if let Some(last) = sub.pop() {
                    chunks.extend(sub);
                    current = last;
                } else {
                    current = String::new();
                }
            }
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_owned());
    }

    (!chunks.is_empty()).then_some(chunks)
}

fn split_at_sentences(text: &str, max_len: usize) -> Option<Vec<String>> {
    let sentences = split_sentences(text);
    if sentences.len() == 1 {
        return None;
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if char_len(&current) + char_len(&sentence) + 1 <= max_len {
            if current.is_empty() {
                current = sentence;
            } else {
                current.push(' ');
                current.push_str(&sentence);
            }
        } else {
            if !current.trim().is_empty() {
                chunks.push(current.trim().to_owned());
            }
            if char_len(&sentence) <= max_len {
                current = sentence;
            } else {
                let mut sub = hard_split(&sentence, max_len);
                if let Some(last) = sub.pop() {
                    chunks.extend(sub);
                    current = last;
                } else {
                    current = String::new();
                }
            }
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_owned());
    }

    (!chunks.is_empty()).then_some(chunks)
}

/// Split after `.`, `!`, or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            if chars.peek().is_some_and(|n| n.is_whitespace()) {
                // Consume the whitespace run separating sentences.
                while chars.peek().is_some_and(|n| n.is_whitespace()) {
                    chars.next();
                }
                sentences.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Hard split at the budget, preferring a word or line boundary past the
/// halfway point.
fn hard_split(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        if char_len(rest) <= max_len {
            chunks.push(rest.to_owned());
            break;
        }

        let split_at = find_split_point(rest, max_len);
        let (head, tail) = split_at_char(rest, split_at);
        chunks.push(head.trim().to_owned());
        rest = tail.trim_start();
    }

    chunks
}

/// Pick a split index (in characters) at or before `max_len`.
fn find_split_point(text: &str, max_len: usize) -> usize {
    let prefix: String = text.chars().take(max_len).collect();

    let mut split = max_len;
    if let Some(pos) = prefix.rfind(' ') {
        let chars_before = char_len(&prefix[..pos]);
        if chars_before > max_len / 2 {
            split = chars_before;
        }
    }
    // A line break is an even better break point than a space.
    if let Some(pos) = prefix.rfind('\n') {
        let chars_before = char_len(&prefix[..pos]);
        if chars_before > max_len / 2 {
            split = chars_before;
        }
    }
    split.max(1)
}

fn split_at_char(text: &str, char_index: usize) -> (&str, &str) {
    match text.char_indices().nth(char_index) {
        Some((byte_index, _)) => text.split_at(byte_index),
        None => (text, ""),
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> MessageChunker {
        MessageChunker::default()
    }

    fn assert_size_bound(chunks: &[String], max: usize) {
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(
                char_len(chunk) <= max,
                "chunk {i} is {} chars, budget {max}",
                char_len(chunk)
            );
        }
    }

    fn assert_balanced_fences(chunks: &[String]) {
        for (i, chunk) in chunks.iter().enumerate() {
            let fences = chunk.matches("```").count();
            assert!(fences % 2 == 0, "chunk {i} has {fences} fence markers");
        }
    }

    fn normalize(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunker().chunk("hello", None);
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let text = format!("{}\n\n{}\n\n{}", "a".repeat(60), "b".repeat(60), "c".repeat(60));
        let chunks = chunker().chunk(&text, Some(130));
        assert_eq!(chunks.len(), 2);
        assert_size_bound(&chunks, 130);
        assert!(chunks[0].starts_with('a'));
        assert!(chunks[1].starts_with('c'));
    }

    #[test]
    fn sentences_split_when_no_paragraphs() {
        let text = "First sentence here. Second sentence follows! Third one asks? Fourth ends.";
        let chunks = chunker().chunk(text, Some(45));
        assert!(chunks.len() >= 2);
        assert_size_bound(&chunks, 45);
        assert_eq!(normalize(&chunks.join(" ")), normalize(text));
    }

    #[test]
    fn word_boundary_preferred_over_mid_word() {
        let text = "word ".repeat(100);
        let chunks = chunker().chunk(text.trim(), Some(48));
        assert_size_bound(&chunks, 48);
        for chunk in &chunks {
            assert!(!chunk.starts_with("ord"), "split mid-word: {chunk:?}");
        }
    }

    #[test]
    fn hard_cut_when_no_boundaries() {
        let text = "x".repeat(250);
        let chunks = chunker().chunk(&text, Some(100));
        assert_eq!(chunks.len(), 3);
        assert_size_bound(&chunks, 100);
        assert_eq!(chunks.join(""), text);
    }

    #[test]
    fn round_trip_modulo_whitespace() {
        let text = format!(
            "{} intro paragraph.\n\n{} middle part. {} more text here.\n\nclosing words.",
            "alpha ".repeat(30),
            "beta ".repeat(40),
            "gamma ".repeat(40),
        );
        let chunks = chunker().chunk(&text, Some(200));
        assert_size_bound(&chunks, 200);
        assert_eq!(normalize(&chunks.join(" ")), normalize(&text));
    }

    #[test]
    fn small_code_block_kept_intact() {
        let code = "```rust\nfn main() {}\n```";
        let text = format!("{}\n\n{}\n\n{}", "a".repeat(150), code, "b".repeat(150));
        let chunks = chunker().chunk(&text, Some(200));
        assert_balanced_fences(&chunks);
        assert!(chunks.iter().any(|c| c.contains("fn main() {}")));
        assert_size_bound(&chunks, 200);
    }

    #[test]
    fn long_code_block_rewrapped_with_language() {
        // S6: 9000 chars with a single 5000-char python fence in the middle,
        // budget 4000.
        let mut code_body = String::new();
        let mut i = 0;
        while char_len(&code_body) < 5000 - 60 {
            code_body.push_str(&format!("print('line {i} of the generated body')\n"));
            i += 1;
        }
        let prefix = "intro text. ".repeat(170);
        let suffix = "closing text. ".repeat(140);
        let text = format!("{prefix}\n\n```python\n{code_body}```\n\n{suffix}");
        assert!(char_len(&text) > 8500);

        let chunks = chunker().chunk(&text, Some(4000));
        assert!(chunks.len() >= 3, "expected >= 3 chunks, got {}", chunks.len());
        assert_size_bound(&chunks, 4000);
        assert_balanced_fences(&chunks);

        // Every re-wrapped fence keeps the language tag.
        let fenced: Vec<&String> = chunks.iter().filter(|c| c.contains("```")).collect();
        assert!(fenced.len() >= 2);
        for chunk in &fenced {
            assert!(chunk.contains("```python"), "fence lost its language: {chunk:?}");
        }

        // Fenced content round-trips (modulo whitespace).
        let mut fenced_content = String::new();
        let re = regex::Regex::new(r"```python\n([\s\S]*?)```").unwrap();
        for chunk in &chunks {
            for caps in re.captures_iter(chunk) {
                fenced_content.push_str(&caps[1]);
                fenced_content.push('\n');
            }
        }
        assert_eq!(normalize(&fenced_content), normalize(&code_body));

        // Non-fenced content round-trips too.
        let strip = |s: &str| re.replace_all(s, " ").into_owned();
        let original_plain = normalize(&strip(&text));
        let chunked_plain = normalize(&strip(&chunks.join(" ")));
        assert_eq!(chunked_plain, original_plain);
    }

    #[test]
    fn unbalanced_fence_falls_back_to_plain_split() {
        let text = format!("{} ```python\nunterminated", "words ".repeat(100));
        let chunks = chunker().chunk(&text, Some(200));
        assert_size_bound(&chunks, 200);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn platform_budgets() {
        let text = "a".repeat(5000);
        let tg = chunker().chunk_for_telegram(&text);
        assert_size_bound(&tg, 4096 - 100);
        let dc = chunker().chunk_for_discord(&text);
        assert_size_bound(&dc, 2000 - 100);
        assert!(dc.len() > tg.len());
    }

    #[test]
    fn indicators_are_prefixed() {
        let chunks = chunker().add_indicators(vec!["one".into(), "two".into()]);
        assert_eq!(chunks[0], "[1/2]\none");
        assert_eq!(chunks[1], "[2/2]\ntwo");
    }

    #[test]
    fn estimate_is_at_least_one() {
        let c = chunker();
        assert_eq!(c.estimate_chunks("short", None), 1);
        assert!(c.estimate_chunks(&"x".repeat(9000), Some(4000)) >= 3);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "好словоmix ".repeat(60);
        let chunks = chunker().chunk(text.trim(), Some(50));
        assert_size_bound(&chunks, 50);
        // Joining loses nothing but whitespace.
        assert_eq!(normalize(&chunks.join(" ")), normalize(text.trim()));
    }
}
