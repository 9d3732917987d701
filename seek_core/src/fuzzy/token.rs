use std::collections::BTreeSet;

use super::ratio::{partial_ratio, ratio};

/// Lowercases the input, turns every non-alphanumeric character into a space and
/// collapses runs of whitespace.
pub fn full_process(input: &str) -> String {
    let replaced: String = input
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compares the shared tokens of both strings against each side's full token set.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    token_set(a, b, ratio)
}

/// Like `token_set_ratio` but scored with `partial_ratio`.
///
/// Any shared token scores 100, so callers that need precision must pair this with
/// a stricter guard.
pub fn partial_token_set_ratio(a: &str, b: &str) -> u8 {
    token_set(a, b, partial_ratio)
}

fn token_set(a: &str, b: &str, scorer: fn(&str, &str) -> u8) -> u8 {
    let processed_a = full_process(a);
    let processed_b = full_process(b);
    if processed_a.is_empty() || processed_b.is_empty() {
        return 0;
    }

    let tokens_a: BTreeSet<&str> = processed_a.split(' ').collect();
    let tokens_b: BTreeSet<&str> = processed_b.split(' ').collect();

    let intersection = join(tokens_a.intersection(&tokens_b));
    let only_a = join(tokens_a.difference(&tokens_b));
    let only_b = join(tokens_b.difference(&tokens_a));

    let combined_a = concat(&intersection, &only_a);
    let combined_b = concat(&intersection, &only_b);

    [
        scorer(&intersection, &combined_a),
        scorer(&intersection, &combined_b),
        scorer(&combined_a, &combined_b),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

fn join<'a, 'b: 'a>(tokens: impl Iterator<Item = &'a &'b str>) -> String {
    tokens.copied().collect::<Vec<_>>().join(" ")
}

fn concat(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{} {}", head, tail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_process() {
        assert_eq!(full_process("  Track 1 (Remix)!! "), "track 1 remix");
        assert_eq!(full_process("AC/DC"), "ac dc");
        assert_eq!(full_process("--"), "");
    }

    #[test]
    fn test_token_set_ratio_reordered() {
        assert_eq!(token_set_ratio("Album Y Artist X", "artist x album y"), 100);
    }

    #[test]
    fn test_partial_token_set_ratio_shared_token() {
        assert_eq!(partial_token_set_ratio("Artist X", "artist x feat. someone"), 100);
        assert_eq!(partial_token_set_ratio("track 1", "Track 1 (Remix)"), 100);
    }

    #[test]
    fn test_partial_token_set_ratio_unrelated() {
        assert!(partial_token_set_ratio("metallica", "taylor swift") < 80);
    }

    #[test]
    fn test_token_set_empty() {
        assert_eq!(partial_token_set_ratio("", "abc"), 0);
        assert_eq!(token_set_ratio("()", "abc"), 0);
    }
}
