use proptest::prelude::*;
use relay_delivery::{settled_chunks, split_markdown};

#[derive(Debug, Clone)]
enum Block {
    Paragraph(String),
    List(Vec<String>),
    Fence(Vec<String>),
}

impl Block {
    fn render(&self) -> String {
        match self {
            Block::Paragraph(line) => line.clone(),
            Block::List(items) => items
                .iter()
                .map(|item| format!("- {item}"))
                .collect::<Vec<_>>()
                .join("\n"),
            Block::Fence(body) => format!("```rs\n{}\n```", body.join("\n")),
        }
    }
}

fn line() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,8}", 1..12).prop_map(|words| words.join(" "))
}

fn block() -> impl Strategy<Value = Block> {
    prop_oneof![
        line().prop_map(Block::Paragraph),
        prop::collection::vec(line(), 1..5).prop_map(Block::List),
        prop::collection::vec(line(), 1..6).prop_map(Block::Fence),
    ]
}

fn document() -> impl Strategy<Value = Vec<Block>> {
    prop::collection::vec(block(), 1..8)
}

fn render(blocks: &[Block]) -> String {
    blocks.iter().map(Block::render).collect::<Vec<_>>().join("\n\n")
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Words of every non-fence line, in order.
fn words(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| !is_fence(l))
        .flat_map(str::split_whitespace)
        .map(String::from)
        .collect()
}

proptest! {
    #[test]
    fn chunks_respect_limit(blocks in document(), max_len in 20usize..200) {
        for chunk in split_markdown(&render(&blocks), max_len) {
            prop_assert!(chunk.chars().count() <= max_len, "{} > {}", chunk.chars().count(), max_len);
        }
    }

    #[test]
    fn blocks_map_one_to_one_when_they_fit(blocks in document()) {
        let expected: Vec<String> = blocks.iter().map(Block::render).collect();
        prop_assert_eq!(split_markdown(&render(&blocks), 10_000), expected);
    }

    #[test]
    fn fenced_chunks_are_balanced(blocks in document(), max_len in 20usize..200) {
        for chunk in split_markdown(&render(&blocks), max_len) {
            let fences = chunk.lines().filter(|l| is_fence(l)).count();
            prop_assert_eq!(fences % 2, 0, "unbalanced chunk: {:?}", chunk);
            if chunk.starts_with("```") {
                prop_assert!(chunk.ends_with("```"), "unclosed chunk: {:?}", chunk);
            }
        }
    }

    #[test]
    fn split_at_block_boundary_is_stable(blocks in document(), max_len in 20usize..200) {
        let full = split_markdown(&render(&blocks), max_len);
        for k in 1..blocks.len() {
            let prefix = split_markdown(&render(&blocks[..k]), max_len);
            prop_assert!(prefix.len() <= full.len());
            prop_assert_eq!(&full[..prefix.len()], &prefix[..]);
        }
    }

    #[test]
    fn no_words_are_lost(blocks in document(), max_len in 20usize..200) {
        let text = render(&blocks);
        let chunks = split_markdown(&text, max_len);
        prop_assert_eq!(words(&chunks.join("\n")), words(&text));
    }

    #[test]
    fn settled_chunks_never_change(
        blocks in document(),
        max_len in 20usize..200,
        cut in any::<prop::sample::Index>(),
    ) {
        let text = render(&blocks);
        let full = split_markdown(&text, max_len);
        let partial = &text[..cut.index(text.len() + 1)];
        let settled = settled_chunks(partial, max_len);
        prop_assert!(settled.len() <= full.len());
        prop_assert_eq!(&full[..settled.len()], &settled[..]);
    }
}
