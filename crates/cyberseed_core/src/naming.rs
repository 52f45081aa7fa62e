use once_cell::sync::Lazy;
use regex::Regex;

static NON_SLUG_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercase the title and collapse every run of characters outside `[a-z0-9]`
/// into a single `-`.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    NON_SLUG_RUNS
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

pub fn subdistrict_name(title: &str) -> String {
    title.replace("(2077)", "").trim().to_string()
}

pub fn cyberware_name(title: &str) -> String {
    title.replace("(Cyberware)", "").trim().to_string()
}

pub fn item_name(title: &str) -> String {
    title.trim().to_string()
}
