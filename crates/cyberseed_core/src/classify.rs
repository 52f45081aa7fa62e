//! Category-driven guesses for domain fields.
//!
//! Every rule is a plain substring test over category titles supplied by the
//! wiki. Pages outside the known vocabulary simply yield `None`.

pub const KNOWN_DISTRICTS: [&str; 8] = [
    "Watson",
    "Westbrook",
    "City Center",
    "Santo Domingo",
    "Heywood",
    "Pacifica",
    "Dogtown",
    "Badlands",
];

/// Checked in order; the first needle found in the joined categories wins.
const SLOT_RULES: [(&str, &str); 5] = [
    ("arms", "Arms"),
    ("operating system", "Operating System"),
    ("cyberdecks", "Operating System / Cyberdeck"),
    ("sandevistan", "Operating System / Sandevistan"),
    ("berserk", "Operating System / Berserk"),
];

pub const CONSUMABLE_CATEGORY: &str = "Consumable";

/// First district of [`KNOWN_DISTRICTS`] mentioned by any category title.
///
/// Iterates the vocabulary in the outer loop, so vocabulary order decides
/// between districts found in different categories.
pub fn infer_parent_district(categories: &[String]) -> Option<&'static str> {
    let lowered = categories
        .iter()
        .map(|title| title.to_lowercase())
        .collect::<Vec<_>>();
    KNOWN_DISTRICTS.iter().copied().find(|district| {
        let needle = district.to_lowercase();
        lowered.iter().any(|title| title.contains(&needle))
    })
}

pub fn infer_slot(categories: &[String]) -> Option<&'static str> {
    if categories.is_empty() {
        return None;
    }
    let joined = joined_lowercase(categories);
    SLOT_RULES
        .iter()
        .find(|(needle, _)| joined.contains(needle))
        .map(|(_, slot)| *slot)
}

pub fn infer_item_category(categories: &[String]) -> Option<&'static str> {
    if joined_lowercase(categories).contains("consumables") {
        Some(CONSUMABLE_CATEGORY)
    } else {
        None
    }
}

fn joined_lowercase(categories: &[String]) -> String {
    categories.join(" | ").to_lowercase()
}
