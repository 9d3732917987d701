use std::collections::BTreeSet;

use super::token::full_process;

/// Words that mark an alternative take of a track.
const VERSION_QUALIFIERS: [&str; 21] = [
    "acoustic",
    "bootleg",
    "club",
    "cover",
    "demo",
    "dub",
    "edit",
    "extended",
    "instrumental",
    "karaoke",
    "live",
    "mix",
    "remaster",
    "remastered",
    "remix",
    "reprise",
    "rework",
    "radio",
    "unplugged",
    "version",
    "vip",
];

/// Checks that both strings contain the same runs of digits in the same order.
///
/// Leading zeros are ignored, so `"01"` equals `"1"`. Returns `false` when either side is
/// blank.
pub fn exact_number_match(a: &str, b: &str) -> bool {
    if a.trim().is_empty() || b.trim().is_empty() {
        return false;
    }
    digit_runs(a) == digit_runs(b)
}

fn digit_runs(input: &str) -> Vec<&str> {
    input
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .map(|run| {
            let trimmed = run.trim_start_matches('0');
            if trimmed.is_empty() { "0" } else { trimmed }
        })
        .collect()
}

/// Checks that every version qualifier in `candidate` also appears in `target`.
pub fn version_qualifiers_match(target: &str, candidate: &str) -> bool {
    let wanted = version_qualifiers(target);
    version_qualifiers(candidate).is_subset(&wanted)
}

fn version_qualifiers(input: &str) -> BTreeSet<&'static str> {
    let processed = full_process(input);
    processed
        .split(' ')
        .filter_map(|token| VERSION_QUALIFIERS.iter().find(|q| **q == token).copied())
        .collect()
}
