//! Property tests for the recursive splitter.

use libre_chat_core::chunk::RecursiveSplitter;
use libre_chat_core::models::DocumentRecord;
use proptest::prelude::*;

/// Words joined by a mix of spaces, newlines and paragraph breaks.
fn arb_text() -> impl Strategy<Value = (String, Vec<String>)> {
    proptest::collection::vec(
        ("[a-z]{1,8}", prop_oneof![Just(" "), Just("\n"), Just("\n\n"), Just(". ")]),
        0..120,
    )
    .prop_map(|parts| {
        let words: Vec<String> = parts.iter().map(|(w, _)| w.clone()).collect();
        let text: String = parts
            .iter()
            .map(|(w, sep)| format!("{}{}", w, sep))
            .collect();
        (text, words)
    })
}

fn arb_params() -> impl Strategy<Value = (usize, usize)> {
    (12usize..200).prop_flat_map(|size| (Just(size), 0..size / 2))
}

/// Distinct words (`<letters><position>X`) joined by single separators, so
/// every chunk occurs exactly once in the source.
fn arb_distinct_words() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        ("[a-z]{1,8}", prop_oneof![Just(" "), Just("\n"), Just("\n\n"), Just(". ")]),
        1..120,
    )
    .prop_map(|parts| {
        let mut text = String::new();
        for (i, (word, sep)) in parts.iter().enumerate() {
            if i > 0 {
                text.push_str(sep);
            }
            text.push_str(&format!("{}{}X", word, i));
        }
        text
    })
}

/// Sizes large enough that no single word is ever split.
fn arb_word_params() -> impl Strategy<Value = (usize, usize)> {
    (24usize..200).prop_flat_map(|size| (Just(size), 0..size / 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn chunks_never_exceed_chunk_size(
        (text, _) in arb_text(),
        (size, overlap) in arb_params(),
    ) {
        let splitter = RecursiveSplitter::new(size, overlap).unwrap();
        for chunk in splitter.split_text(&text) {
            prop_assert!(chunk.chars().count() <= size, "{:?} longer than {}", chunk, size);
            prop_assert!(!chunk.trim().is_empty());
        }
    }

    #[test]
    fn splitting_is_deterministic(
        (text, _) in arb_text(),
        (size, overlap) in arb_params(),
    ) {
        let splitter = RecursiveSplitter::new(size, overlap).unwrap();
        let record = DocumentRecord::new("doc.txt", text);
        let first = splitter.split_documents(std::slice::from_ref(&record));
        let second = splitter.split_documents(std::slice::from_ref(&record));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn every_word_survives_in_some_chunk(
        (text, words) in arb_text(),
        (size, overlap) in arb_params(),
    ) {
        let splitter = RecursiveSplitter::new(size, overlap).unwrap();
        let chunks = splitter.split_text(&text);
        for word in &words {
            prop_assert!(
                chunks.iter().any(|c| c.contains(word.as_str())),
                "word {:?} missing from chunks", word
            );
        }
    }

    #[test]
    fn consecutive_chunks_share_at_most_the_overlap(
        text in arb_distinct_words(),
        (size, overlap) in arb_word_params(),
    ) {
        let splitter = RecursiveSplitter::new(size, overlap).unwrap();
        let chunks = splitter.split_text(&text);
        prop_assert!(!chunks.is_empty());

        let mut rebuilt = String::new();
        let mut covered = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            let start = text.find(chunk.as_str()).expect("chunk is a slice of the source");
            let end = start + chunk.len();
            if i == 0 {
                prop_assert!(text[..start].trim().is_empty());
                rebuilt.push_str(chunk);
            } else if start >= covered {
                let gap = &text[covered..start];
                prop_assert!(gap.trim().is_empty(), "{:?} dropped before chunk {}", gap, i);
                rebuilt.push_str(gap);
                rebuilt.push_str(chunk);
            } else {
                let shared = covered - start;
                prop_assert!(
                    shared <= overlap,
                    "chunk {} repeats {} chars, overlap is {}", i, shared, overlap
                );
                rebuilt.push_str(chunk.get(shared..).unwrap_or(""));
            }
            covered = covered.max(end);
        }
        prop_assert!(text[covered..].trim().is_empty());
        prop_assert_eq!(rebuilt.as_str(), text.trim());
    }
}
