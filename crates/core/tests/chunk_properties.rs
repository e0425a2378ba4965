use contextdoc_core::{chunk_text, token_windows, CoreError, TokenizerKind};
use proptest::prelude::*;

proptest! {
    #[test]
    fn windows_cover_every_token(len in 0usize..20_000, max in 1usize..3_000, overlap_seed in 0usize..3_000) {
        let overlap = overlap_seed % max;
        let windows = token_windows(len, max, overlap);
        if len == 0 {
            prop_assert!(windows.is_empty());
            return Ok(());
        }
        prop_assert_eq!(windows.first().unwrap().0, 0);
        prop_assert_eq!(windows.last().unwrap().1, len);
        for (start, end) in &windows {
            prop_assert!(start < end);
            prop_assert!(end - start <= max);
        }
        for pair in windows.windows(2) {
            let (prev_start, prev_end) = pair[0];
            let (next_start, _) = pair[1];
            prop_assert!(next_start > prev_start);
            prop_assert_eq!(prev_end - next_start, overlap);
        }
        prop_assert!(windows.len() <= len);
    }

    #[test]
    fn chunk_text_windows_decode_their_token_range(words in prop::collection::vec("[a-z]{1,10}", 1..400), max in 8usize..120, overlap_seed in 0usize..120) {
        let overlap = overlap_seed % max;
        let text = words.join(" ");
        let chunks = chunk_text(&text, "gpt-4", max, overlap).unwrap();
        let tokens = TokenizerKind::Cl100k.encode(&text).unwrap();
        prop_assert_eq!(chunks.first().unwrap().token_start, 0);
        prop_assert_eq!(chunks.last().unwrap().token_end, tokens.len());
        for chunk in &chunks {
            prop_assert_eq!(chunk.total_chunks, chunks.len());
            let expected = TokenizerKind::Cl100k
                .decode_window(&tokens[chunk.token_start..chunk.token_end])
                .unwrap();
            prop_assert_eq!(&chunk.text, &expected);
        }
    }

    #[test]
    fn overlap_at_least_window_fails_fast(max in 0usize..500, extra in 0usize..500) {
        let err = chunk_text("some words to split", "gpt-4", max, max + extra).unwrap_err();
        prop_assert!(matches!(err, CoreError::Configuration(_)));
    }
}

#[test]
fn three_chunks_for_4500_tokens() {
    // " a" is a single cl100k token, so the text is exactly 4500 tokens long.
    let text = " a".repeat(4500);
    assert_eq!(TokenizerKind::Cl100k.count(&text).unwrap(), 4500);
    let chunks = chunk_text(&text, "gpt-4", 2000, 200).unwrap();
    let bounds: Vec<(usize, usize)> = chunks
        .iter()
        .map(|chunk| (chunk.token_start, chunk.token_end))
        .collect();
    assert_eq!(bounds, vec![(0, 2000), (1800, 3800), (3600, 4500)]);
    assert!(chunks.iter().all(|chunk| chunk.total_chunks == 3));
}
