//! Rule-based detectors for the `tables` group
//!
//! Detectors are pure and infallible: they read the extracted facts and
//! always produce a verdict. They are CPU-bound and run on the blocking pool.

use crate::models::{LabelFacts, Verdict};

/// Detector output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub verdict: Verdict,
    pub evidence: Vec<String>,
}

impl Detection {
    fn new(verdict: Verdict, evidence: Vec<String>) -> Self {
        Self { verdict, evidence }
    }
}

/// Synchronous rule-based check
pub trait Detector: Send + Sync {
    fn detect(&self, check_id: &str, facts: &LabelFacts) -> Detection;
}

const INGREDIENTS_FIELD: &str = "ingredients_list";
const NFT_FIELD: &str = "nft_text_block";
const NFT_PANEL: &str = "nutrition";

/// Polyols must be declared with a quantity in the nutrition table
const SWEETENERS_WITH_QUANTITY: &[&str] = &[
    "polydextrose",
    "erythritol",
    "isomalt",
    "lactitol",
    "maltitol",
    "mannitol",
    "sorbitol",
    "xylitol",
    "hydrogenated starch hydrolysates",
];

const SWEETENERS_NO_QUANTITY: &[&str] = &[
    "acesulfame potassium",
    "advantame",
    "aspartame",
    "neotame",
    "sucralose",
    "thaumatin",
    "saccharin",
    "steviol glycosides",
    "stevia extract",
    "stevia leaf extract",
    "rebaudioside a",
    "rebaudioside m",
    "monk fruit extract",
];

/// Supplemental ingredients that make a product a supplemented food
const SUPPLEMENTS: &[&str] = &[
    "l arginine",
    "l citrulline",
    "l glutamine",
    "l leucine",
    "l isoleucine",
    "l valine",
    "taurine",
    "caffeine",
    "green tea extract",
    "inositol",
    "panax ginseng extract",
    "coenzyme q10",
    "glucosamine",
    "chondroitin sulfate",
    "choline",
    "lutein",
    "lycopene",
];

const ADDITIVES: &[&str] = &[
    "sodium benzoate",
    "potassium sorbate",
    "calcium propionate",
    "citric acid",
    "ascorbic acid",
    "xanthan gum",
    "guar gum",
    "carrageenan",
    "soy lecithin",
    "monosodium glutamate",
    "sodium nitrite",
    "sodium phosphate",
    "tartrazine",
    "allura red",
    "sunset yellow",
    "caramel colour",
    "tbhq",
    "bht",
    "bha",
];

/// Nutrients every nutrition facts table must declare (alternatives separated by `|`)
const CORE_NUTRIENTS: &[&str] = &[
    "calories",
    "fat",
    "saturated",
    "trans",
    "carbohydrate",
    "fibre|fiber",
    "sugars",
    "protein",
    "cholesterol",
    "sodium",
];

/// Detectors for nutrition facts, sweeteners, supplements and additives
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleDetector;

impl Detector for RuleDetector {
    fn detect(&self, check_id: &str, facts: &LabelFacts) -> Detection {
        match check_id {
            "nutrition_facts" => detect_nutrition_facts(facts),
            "sweeteners" => detect_sweeteners(facts),
            "supplements" => detect_supplements(facts),
            "additives" => detect_additives(facts),
            other => Detection::new(
                Verdict::NeedsReview,
                vec![format!("no detector registered for {}", other)],
            ),
        }
    }
}

fn nft_text(facts: &LabelFacts) -> Option<&str> {
    facts
        .field_text(NFT_FIELD)
        .or_else(|| facts.panel_text(NFT_PANEL))
}

/// Lowercase, keep ASCII alphanumerics, collapse everything else to single spaces
pub fn normalize_text(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word containment on normalized text
fn contains_term(normalized: &str, term: &str) -> bool {
    let padded = format!(" {} ", normalized);
    padded.contains(&format!(" {} ", term))
}

/// Numeric value following `keyword` in the nutrition table (e.g. "fat 8 g" → 8.0)
fn value_after(normalized: &str, keyword: &str) -> Option<f64> {
    let tokens: Vec<&str> = normalized.split(' ').collect();
    let start = tokens.iter().position(|t| *t == keyword)?;
    tokens
        .iter()
        .skip(start + 1)
        .take(4)
        .find_map(|t| leading_number(t))
}

fn leading_number(token: &str) -> Option<f64> {
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn detect_nutrition_facts(facts: &LabelFacts) -> Detection {
    let Some(table) = nft_text(facts) else {
        return Detection::new(
            Verdict::NeedsReview,
            vec!["no nutrition facts table extracted".to_string()],
        );
    };
    let normalized = normalize_text(table);

    let missing: Vec<&str> = CORE_NUTRIENTS
        .iter()
        .filter(|n| !n.split('|').any(|alt| normalized.contains(alt)))
        .copied()
        .collect();

    let mut evidence = Vec::new();
    let mut verdict = Verdict::Pass;

    if !missing.is_empty() {
        verdict = Verdict::Fail;
        evidence.push(format!("missing core nutrients: {}", missing.join(", ")));
    }

    let macros = (
        value_after(&normalized, "fat"),
        value_after(&normalized, "carbohydrate"),
        value_after(&normalized, "protein"),
        value_after(&normalized, "calories"),
    );
    if let (Some(fat), Some(carbs), Some(protein), Some(declared)) = macros {
        let calculated = fat * 9.0 + carbs * 4.0 + protein * 4.0;
        let tolerance = (calculated * 0.20).abs().max(20.0);
        let diff = (declared - calculated).abs();
        evidence.push(format!(
            "declared {} Cal, calculated {:.1} Cal (tolerance ±{:.1})",
            declared, calculated, tolerance
        ));
        if diff > tolerance {
            verdict = Verdict::Fail;
        }
    } else if verdict == Verdict::Pass {
        verdict = Verdict::NeedsReview;
        evidence.push("could not read calorie and macronutrient values".to_string());
    }

    Detection::new(verdict, evidence)
}

fn detect_sweeteners(facts: &LabelFacts) -> Detection {
    let ingredients = normalize_text(facts.field_text(INGREDIENTS_FIELD).unwrap_or(""));
    let table = normalize_text(nft_text(facts).unwrap_or(""));

    let mut evidence = Vec::new();
    let mut verdict = Verdict::Pass;

    for name in SWEETENERS_WITH_QUANTITY {
        if !(contains_term(&ingredients, name) || contains_term(&table, name)) {
            continue;
        }
        let quantity = name
            .split(' ')
            .last()
            .and_then(|last| value_after(&table, last));
        match quantity {
            Some(q) => evidence.push(format!("{} declared with quantity {} g", name, q)),
            None => {
                verdict = Verdict::NeedsReview;
                evidence.push(format!("{} requires a quantity declaration; none found", name));
            }
        }
    }

    for name in SWEETENERS_NO_QUANTITY {
        if contains_term(&ingredients, name) || contains_term(&table, name) {
            evidence.push(format!("{} present", name));
        }
    }

    if contains_term(&ingredients, "aspartame")
        && !normalize_text(facts.full_text()).contains("phenylalanine")
    {
        verdict = Verdict::Fail;
        evidence.push("aspartame present without phenylalanine statement".to_string());
    }

    if evidence.is_empty() {
        evidence.push("no sweeteners detected".to_string());
    }
    Detection::new(verdict, evidence)
}

fn detect_supplements(facts: &LabelFacts) -> Detection {
    let ingredients = normalize_text(facts.field_text(INGREDIENTS_FIELD).unwrap_or(""));
    let table = normalize_text(nft_text(facts).unwrap_or(""));

    let found: Vec<&str> = SUPPLEMENTS
        .iter()
        .filter(|s| contains_term(&ingredients, s) || contains_term(&table, s))
        .copied()
        .collect();

    if found.is_empty() {
        return Detection::new(Verdict::Pass, vec!["no supplemental ingredients".to_string()]);
    }

    let mut evidence: Vec<String> = found
        .iter()
        .map(|s| format!("supplemental ingredient: {}", s))
        .collect();
    let full = normalize_text(facts.full_text());
    if full.contains("supplemented food facts") {
        evidence.push("supplemented food facts table present".to_string());
        Detection::new(Verdict::Pass, evidence)
    } else {
        evidence.push("supplemented food facts table not found".to_string());
        Detection::new(Verdict::NeedsReview, evidence)
    }
}

/// True for tokens like "e211" or "e150d"
fn is_e_number(token: &str) -> bool {
    let mut chars = token.chars();
    if chars.next() != Some('e') {
        return false;
    }
    let digits: String = chars.clone().take_while(|c| c.is_ascii_digit()).collect();
    let suffix: String = chars.skip(digits.len()).collect();
    digits.len() == 3 && suffix.len() <= 1 && suffix.chars().all(|c| c.is_ascii_lowercase())
}

fn detect_additives(facts: &LabelFacts) -> Detection {
    let ingredients = normalize_text(facts.field_text(INGREDIENTS_FIELD).unwrap_or(""));

    let mut evidence: Vec<String> = ADDITIVES
        .iter()
        .filter(|a| contains_term(&ingredients, a))
        .map(|a| format!("additive declared by common name: {}", a))
        .collect();

    let codes: Vec<&str> = ingredients.split(' ').filter(|t| is_e_number(t)).collect();
    if !codes.is_empty() {
        evidence.push(format!(
            "additives declared by code instead of common name: {}",
            codes.join(", ")
        ));
        return Detection::new(Verdict::Fail, evidence);
    }

    if evidence.is_empty() {
        evidence.push("no additives detected".to_string());
    }
    Detection::new(Verdict::Pass, evidence)
}
