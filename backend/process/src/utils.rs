use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;

use crate::models::MenuEntry;

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_]").expect("valid pattern"));
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9- ]").expect("valid pattern"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").expect("valid pattern"));

/// Canonical form of an item name, used to spot duplicates. Empty means gibberish.
pub fn sanitize(input: &str) -> String {
    let s = SEPARATORS.replace_all(input, " ");
    let s = DISALLOWED.replace_all(&s, "");

    SPACES.replace_all(s.trim(), " ").to_lowercase()
}

/// Splits a menu file into entries worth inserting and the count of skipped ones.
///
/// An entry is skipped when its name sanitizes to nothing or collides with a name in `known` or with
/// an earlier entry of the same file.
pub fn fresh_entries(
    entries: Vec<MenuEntry>,
    known: &mut HashSet<String>,
) -> (Vec<MenuEntry>, usize) {
    let mut skipped = 0;
    let mut fresh = Vec::new();

    for entry in entries {
        let key = sanitize(&entry.name);

        if key.is_empty() || !known.insert(key) {
            skipped += 1;
            continue;
        }

        fresh.push(entry);
    }

    (fresh, skipped)
}
