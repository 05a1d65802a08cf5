//! Static lookup data backing the deterministic enrichment fallbacks and
//! the dossier matcher's public-official policy.

use crate::models::event::Category;

/// Known locations: (name, admin region, lat, lon). Seed set covering the
/// regions the default feeds report on.
/// TODO: load operator-supplied gazetteer extensions from the store.
pub const KNOWN_LOCATIONS: &[(&str, &str, f64, f64)] = &[
    ("Brussels", "Belgium", 50.8503, 4.3517),
    ("Antwerp", "Belgium", 51.2194, 4.4025),
    ("Amsterdam", "Netherlands", 52.3676, 4.9041),
    ("Paris", "France", 48.8566, 2.3522),
    ("Lyon", "France", 45.7640, 4.8357),
    ("Berlin", "Germany", 52.5200, 13.4050),
    ("Munich", "Germany", 48.1351, 11.5820),
    ("Madrid", "Spain", 40.4168, -3.7038),
    ("Barcelona", "Spain", 41.3874, 2.1686),
    ("Lisbon", "Portugal", 38.7223, -9.1393),
    ("Rome", "Italy", 41.9028, 12.4964),
    ("Milan", "Italy", 45.4642, 9.1900),
    ("Vienna", "Austria", 48.2082, 16.3738),
    ("Warsaw", "Poland", 52.2297, 21.0122),
    ("Prague", "Czech Republic", 50.0755, 14.4378),
    ("Budapest", "Hungary", 47.4979, 19.0402),
    ("Athens", "Greece", 37.9838, 23.7275),
    ("London", "United Kingdom", 51.5074, -0.1278),
    ("Dublin", "Ireland", 53.3498, -6.2603),
    ("Stockholm", "Sweden", 59.3293, 18.0686),
    ("Copenhagen", "Denmark", 55.6761, 12.5683),
    ("Oslo", "Norway", 59.9139, 10.7522),
    ("Helsinki", "Finland", 60.1699, 24.9384),
    ("Kyiv", "Ukraine", 50.4501, 30.5234),
    ("Istanbul", "Turkey", 41.0082, 28.9784),
    ("Ankara", "Turkey", 39.9334, 32.8597),
    ("Cairo", "Egypt", 30.0444, 31.2357),
    ("Lagos", "Nigeria", 6.5244, 3.3792),
    ("Abuja", "Nigeria", 9.0765, 7.3986),
    ("Nairobi", "Kenya", -1.2921, 36.8219),
    ("Addis Ababa", "Ethiopia", 9.0192, 38.7525),
    ("Johannesburg", "South Africa", -26.2041, 28.0473),
    ("New York", "United States", 40.7128, -74.0060),
    ("Washington", "United States", 38.9072, -77.0369),
    ("Mexico City", "Mexico", 19.4326, -99.1332),
    ("Bogota", "Colombia", 4.7110, -74.0721),
    ("Sao Paulo", "Brazil", -23.5505, -46.6333),
    ("Buenos Aires", "Argentina", -34.6037, -58.3816),
    ("New Delhi", "India", 28.6139, 77.2090),
    ("Mumbai", "India", 19.0760, 72.8777),
    ("Dhaka", "Bangladesh", 23.8103, 90.4125),
    ("Jakarta", "Indonesia", -6.2088, 106.8456),
    ("Manila", "Philippines", 14.5995, 120.9842),
    ("Bangkok", "Thailand", 13.7563, 100.5018),
    ("Tokyo", "Japan", 35.6762, 139.6503),
    ("Seoul", "South Korea", 37.5665, 126.9780),
    ("Beirut", "Lebanon", 33.8938, 35.5018),
    ("Amman", "Jordan", 31.9454, 35.9284),
    ("Baghdad", "Iraq", 33.3152, 44.3661),
    ("Sydney", "Australia", -33.8688, 151.2093),
];

pub fn lookup_location(name: &str) -> Option<(&'static str, &'static str, f64, f64)> {
    let lower = name.to_lowercase();
    KNOWN_LOCATIONS
        .iter()
        .find(|(n, _, _, _)| n.to_lowercase() == lower)
        .copied()
}

/// Keyword lists per category, checked in declaration order; first hit wins.
/// `other` is the terminal default and has no keywords.
pub const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Protest,
        &[
            "protest", "demonstration", "march", "rally", "strike", "riot", "picket",
            "walkout", "sit-in",
        ],
    ),
    (
        Category::Crime,
        &[
            "murder", "robbery", "assault", "theft", "shooting", "stabbing", "kidnap",
            "arson", "homicide", "burglary", "smuggling", "trafficking",
        ],
    ),
    (
        Category::ReligiousFreedom,
        &[
            "church", "mosque", "synagogue", "temple", "worship", "blasphemy",
            "persecution", "religious", "congregation", "missionary",
        ],
    ),
    (
        Category::CulturalTension,
        &[
            "ethnic", "sectarian", "discrimination", "xenophobia", "hate crime",
            "minority", "tension", "clashes",
        ],
    ),
    (
        Category::Infrastructure,
        &[
            "power outage", "blackout", "bridge", "pipeline", "water supply", "road closure",
            "railway", "grid", "telecom", "collapse",
        ],
    ),
    (
        Category::Health,
        &[
            "outbreak", "epidemic", "pandemic", "cholera", "measles", "hospital",
            "vaccination", "disease", "virus", "quarantine",
        ],
    ),
    (
        Category::Migration,
        &[
            "migrant", "refugee", "asylum", "border crossing", "displacement",
            "deportation", "resettlement", "migration",
        ],
    ),
    (
        Category::Economic,
        &[
            "inflation", "unemployment", "currency", "recession", "market crash",
            "food prices", "shortage", "economy", "sanctions",
        ],
    ),
    (
        Category::Weather,
        &[
            "storm", "flood", "earthquake", "hurricane", "wildfire", "drought",
            "heatwave", "typhoon", "landslide", "tornado",
        ],
    ),
    (
        Category::Political,
        &[
            "election", "parliament", "coup", "government", "minister", "referendum",
            "legislation", "opposition", "cabinet",
        ],
    ),
    (
        Category::CommunityEvent,
        &[
            "festival", "parade", "concert", "fair", "celebration", "gathering",
            "commemoration", "anniversary",
        ],
    ),
];

/// Topic dictionary for the entity-extraction fallback's `topics` axis.
pub const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("migration", &["migration", "migrant", "refugee", "asylum", "border"]),
    ("public safety", &["police", "crime", "violence", "security"]),
    ("civil unrest", &["protest", "riot", "demonstration", "strike"]),
    ("public health", &["outbreak", "hospital", "disease", "vaccination"]),
    ("elections", &["election", "ballot", "vote", "campaign"]),
    ("energy", &["power", "electricity", "grid", "fuel", "pipeline"]),
    ("food security", &["food prices", "harvest", "famine", "shortage"]),
    ("natural disaster", &["flood", "earthquake", "storm", "wildfire"]),
    ("religion", &["church", "mosque", "worship", "faith"]),
    ("transport", &["railway", "metro", "transit", "airport", "traffic"]),
];

pub const POSITIVE_WORDS: &[&str] = &[
    "peaceful", "resolved", "agreement", "celebrate", "success", "improve", "recovery",
    "reopen", "aid", "support", "relief", "rescue", "safe", "progress", "welcome",
    "donate", "restore", "growth",
];

pub const NEGATIVE_WORDS: &[&str] = &[
    "killed", "dead", "death", "injured", "attack", "violence", "crisis", "threat",
    "clash", "riot", "destroy", "fear", "arrest", "collapse", "outbreak", "victim",
    "damage", "disaster", "emergency", "wounded", "shortage", "unrest", "looting",
];

/// Stop words excluded from text similarity and keyword extraction.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in",
    "is", "it", "its", "of", "on", "or", "over", "that", "the", "their", "this", "to",
    "was", "were", "will", "with", "after", "amid", "against", "about", "into", "near",
    "new", "more", "than", "been", "they", "he", "she", "his", "her", "who", "which",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Title keywords that designate a public official. A `person` dossier must
/// name one of these roles; private individuals are rejected and unmatched.
const OFFICIAL_TITLES: &[&str] = &[
    "president", "prime minister", "minister", "chancellor", "mayor", "governor",
    "senator", "ambassador", "commissioner", "secretary of state", "deputy",
    "councillor", "member of parliament", "mp ",
];

pub fn is_public_official(name: &str) -> bool {
    let lower = name.to_lowercase();
    OFFICIAL_TITLES.iter().any(|t| lower.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_lookup_is_case_insensitive() {
        let (name, region, lat, _) = lookup_location("brussels").unwrap();
        assert_eq!(name, "Brussels");
        assert_eq!(region, "Belgium");
        assert!((lat - 50.8503).abs() < 1e-6);
        assert!(lookup_location("Atlantis").is_none());
    }

    #[test]
    fn officials_are_title_based() {
        assert!(is_public_official("Mayor Anne Janssens"));
        assert!(is_public_official("prime minister of belgium"));
        assert!(!is_public_official("Jan Peeters"));
    }
}
