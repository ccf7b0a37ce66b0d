/// Synonym table for the vocabulary medical students actually type. Keys are
/// lowercase; single-word keys match whole words only so "mi" does not fire
/// inside "migraine".
const MEDICAL_LEXICON: &[(&str, &[&str])] = &[
    ("anemia", &["low hemoglobin", "iron deficiency"]),
    (
        "copd",
        &["chronic obstructive pulmonary disease", "emphysema"],
    ),
    (
        "diabetes",
        &["diabetes mellitus", "hyperglycemia", "insulin resistance"],
    ),
    (
        "heart attack",
        &["myocardial infarction", "acute coronary syndrome"],
    ),
    (
        "heart failure",
        &["congestive heart failure", "reduced ejection fraction"],
    ),
    (
        "high blood pressure",
        &["hypertension", "elevated blood pressure"],
    ),
    (
        "hypertension",
        &["high blood pressure", "elevated blood pressure"],
    ),
    ("kidney", &["renal"]),
    ("liver", &["hepatic"]),
    ("mi", &["myocardial infarction", "heart attack"]),
    ("stroke", &["cerebrovascular accident", "brain ischemia"]),
    ("uti", &["urinary tract infection", "cystitis"]),
];

/// Clinical facets rotated across retrieval retries so a second round does not
/// just replay the first round's nearest neighbours.
const RETRY_FACETS: &[&str] = &[
    "definition pathophysiology mechanism",
    "diagnosis clinical findings treatment",
    "causes risk factors complications",
];

/// Expands queries with medical synonyms. Expansion is additive: the original
/// query text always survives, so a lexicon miss can only cost recall it never
/// had, not recall it did.
pub struct QueryExpander {
    lexicon: &'static [(&'static str, &'static [&'static str])],
}

impl QueryExpander {
    pub fn new() -> Self {
        Self {
            lexicon: MEDICAL_LEXICON,
        }
    }

    /// Returns the query followed by any synonyms its terms triggered.
    /// Deterministic for a given input.
    pub fn expand(&self, query: &str) -> String {
        let lower = query.to_lowercase();
        let mut additions: Vec<&str> = Vec::new();

        for &(term, synonyms) in self.lexicon {
            let matched = if term.contains(' ') {
                lower.contains(term)
            } else {
                has_word(&lower, term)
            };
            if !matched {
                continue;
            }
            for &synonym in synonyms {
                if !lower.contains(synonym) && !additions.contains(&synonym) {
                    additions.push(synonym);
                }
            }
        }

        if additions.is_empty() {
            query.to_string()
        } else {
            format!("{} {}", query, additions.join(" "))
        }
    }

    /// Variant of the query for retry round `attempt` (1-based). Each round
    /// leads with a different clinical facet.
    pub fn reformulate(&self, original: &str, attempt: u32) -> String {
        let expanded = self.expand(original);
        let facet = RETRY_FACETS[(attempt as usize).saturating_sub(1) % RETRY_FACETS.len()];
        format!("{} {}", expanded, facet)
    }
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::new()
    }
}

fn has_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}
