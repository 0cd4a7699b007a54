//! File-type-aware text chunking. Markdown and source files split on blank
//! lines so fenced blocks and paragraphs stay whole; plain text splits on
//! sentence boundaries. Either way a chunk never exceeds the configured
//! character cap.

/// A chunk of source text with its character offset into the original.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub offset: usize,
}

const BLOCK_EXTENSIONS: &[&str] = &[
    "md", "markdown", "rs", "py", "js", "ts", "java", "go", "c", "cpp", "h", "toml", "yaml",
    "yml", "json", "html", "css", "sh",
];

pub fn chunk_file(file_name: &str, content: &str, max_chars: usize) -> Vec<TextChunk> {
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let blocks = if BLOCK_EXTENSIONS.contains(&ext.as_str()) {
        split_blocks(content)
    } else {
        split_sentences(content)
    };
    pack(blocks, max_chars)
}

/// Split on runs of blank lines, keeping each block's char offset.
fn split_blocks(content: &str) -> Vec<TextChunk> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut offset = 0usize;
    let mut start = 0usize;
    let mut blank_run = true;

    for line in content.split_inclusive('\n') {
        let is_blank = line.trim().is_empty();
        if is_blank {
            if !current.trim().is_empty() {
                blocks.push(TextChunk {
                    text: current.trim_end().to_string(),
                    offset: start,
                });
            }
            current.clear();
            blank_run = true;
        } else {
            if blank_run {
                start = offset;
                blank_run = false;
            }
            current.push_str(line);
        }
        offset += line.chars().count();
    }
    if !current.trim().is_empty() {
        blocks.push(TextChunk {
            text: current.trim_end().to_string(),
            offset: start,
        });
    }
    blocks
}

/// Split on sentence-terminating punctuation (Latin and CJK).
fn split_sentences(content: &str) -> Vec<TextChunk> {
    let terminators = ['.', '!', '?', '。', '！', '？'];
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut start = 0usize;
    let mut offset = 0usize;

    for ch in content.chars() {
        if current.is_empty() {
            start = offset;
        }
        current.push(ch);
        if terminators.contains(&ch) {
            let text = current.trim().to_string();
            if !text.is_empty() {
                sentences.push(TextChunk { text, offset: start });
            }
            current.clear();
        }
        offset += 1;
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(TextChunk {
            text: tail,
            offset: start,
        });
    }
    sentences
}

/// Merge consecutive pieces up to the cap; hard-split any piece that is
/// itself over the cap.
fn pack(pieces: Vec<TextChunk>, max_chars: usize) -> Vec<TextChunk> {
    let mut chunks: Vec<TextChunk> = Vec::new();

    for piece in pieces {
        if piece.text.chars().count() > max_chars {
            for split in hard_split(&piece, max_chars) {
                chunks.push(split);
            }
            continue;
        }
        match chunks.last_mut() {
            Some(last)
                if last.text.chars().count() + 1 + piece.text.chars().count() <= max_chars =>
            {
                last.text.push('\n');
                last.text.push_str(&piece.text);
            }
            _ => chunks.push(piece),
        }
    }
    chunks
}

fn hard_split(piece: &TextChunk, max_chars: usize) -> Vec<TextChunk> {
    let chars: Vec<char> = piece.text.chars().collect();
    chars
        .chunks(max_chars)
        .enumerate()
        .map(|(i, window)| TextChunk {
            text: window.iter().collect(),
            offset: piece.offset + i * max_chars,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_splits_on_blank_lines() {
        let content = "# Title\n\nFirst paragraph.\n\nSecond paragraph.";
        let chunks = chunk_file("notes.md", content, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "# Title");
        assert_eq!(chunks[1].text, "First paragraph.");
        assert!(chunks[2].offset > chunks[1].offset);
    }

    #[test]
    fn test_small_blocks_merge_up_to_cap() {
        let content = "a\n\nb\n\nc";
        let chunks = chunk_file("x.md", content, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "a\nb\nc");
    }

    #[test]
    fn test_plain_text_splits_on_sentences() {
        let content = "One sentence. Another one! A third? tail without end";
        let chunks = chunk_file("plain.txt", content, 16);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].text, "One sentence.");
    }

    #[test]
    fn test_oversized_block_hard_splits() {
        let content = "x".repeat(250);
        let chunks = chunk_file("big.txt", &content, 100);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 100));
        assert_eq!(chunks[1].offset, 100);
    }

    #[test]
    fn test_cap_respected_with_cjk() {
        let content = "中文句子。".repeat(50);
        let chunks = chunk_file("cn.txt", &content, 30);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 30));
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(chunk_file("a.md", "", 100).is_empty());
        assert!(chunk_file("a.txt", "   \n ", 100).is_empty());
    }
}
