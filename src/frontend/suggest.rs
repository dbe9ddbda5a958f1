use strsim::levenshtein;

/// Rank `candidates` by edit distance from `needle`, keeping close matches
/// only. Used to propose directory names when a module string resolves to
/// nothing.
pub fn suggest(needle: &str, candidates: impl IntoIterator<Item = String>) -> Vec<String> {
    let needle = needle.trim();
    if needle.is_empty() {
        return vec![];
    }

    let max_dist = match needle.len() {
        0..=3 => 1,
        4..=6 => 2,
        7..=10 => 3,
        _ => 4,
    };

    let mut scored: Vec<(usize, String)> = candidates
        .into_iter()
        .filter(|c| !c.is_empty() && c != needle)
        .map(|c| (levenshtein(needle, &c), c))
        .filter(|(d, _)| *d <= max_dist)
        .collect();

    scored.sort_by(|(da, a), (db, b)| da.cmp(db).then(a.len().cmp(&b.len())).then(a.cmp(b)));
    scored.into_iter().take(3).map(|(_, s)| s).collect()
}

pub fn did_you_mean(needle: &str, candidates: impl IntoIterator<Item = String>) -> Option<String> {
    let found = suggest(needle, candidates);
    match found.len() {
        0 => None,
        1 => Some(format!("did you mean \"{}\"?", found[0])),
        _ => Some(format!(
            "did you mean one of: {}?",
            found
                .iter()
                .map(|s| format!("\"{}\"", s))
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_names_are_suggested() {
        let dirs = ["builtin", "collections", "net"].map(String::from);
        assert_eq!(suggest("builtn", dirs.clone()), vec!["builtin"]);
        assert!(suggest("zzzzzz", dirs).is_empty());
    }

    #[test]
    fn did_you_mean_formats_one_or_many() {
        let dirs = ["lists", "list"].map(String::from);
        let msg = did_you_mean("lst", dirs).unwrap();
        assert!(msg.starts_with("did you mean"));
    }
}
