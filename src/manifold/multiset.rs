//! Letter-multiset family
//!
//! Candidate and target are letter multisets; the violation surface is their
//! symmetric difference. An optional lexicon and optional phonetic transforms
//! tighten or loosen the geometry per manifest.

use std::collections::{BTreeMap, HashSet};

use crate::config::{FamilySpec, GovernorThresholds};
use crate::manifold::{
    Candidate, Manifold, ProjectionSpec, ValidationFault, ValidationResult, Violation,
};

/// A pure candidate-to-candidate rewrite, fixed at instantiation.
#[derive(Clone, Copy)]
struct Transform {
    name: &'static str,
    apply: fn(&str) -> String,
}

fn i_j_interchange(text: &str) -> String {
    text.replace('J', "I")
}

fn builtin_transform(name: &str) -> Option<Transform> {
    match name {
        "i_j_interchange" => Some(Transform {
            name: "i_j_interchange",
            apply: i_j_interchange,
        }),
        _ => None,
    }
}

pub struct MultisetManifold {
    id: String,
    /// Target bag after transforms, uppercase letters only.
    letters: Vec<char>,
    lexicon: Option<HashSet<String>>,
    transforms: Vec<Transform>,
    ruin_terms: Vec<String>,
    thresholds: GovernorThresholds,
    max_retries: usize,
}

impl MultisetManifold {
    pub fn new(tag: &str, letters: &str, spec: &FamilySpec) -> Self {
        let transforms: Vec<Transform> = spec
            .transforms
            .iter()
            .filter_map(|name| builtin_transform(name))
            .collect();

        let mut bag: String = letters
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();
        for transform in &transforms {
            bag = (transform.apply)(&bag);
        }

        Self {
            id: format!("multiset:{tag}"),
            letters: bag.chars().collect(),
            lexicon: spec
                .lexicon
                .as_ref()
                .map(|words| words.iter().map(|w| w.to_uppercase()).collect()),
            transforms,
            ruin_terms: spec.ruin_terms.iter().map(|t| t.to_uppercase()).collect(),
            thresholds: spec.thresholds.clone(),
            max_retries: spec.max_retries,
        }
    }

    fn normalize(&self, candidate: &Candidate) -> String {
        let mut text: String = candidate
            .stripped_text()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();
        for transform in &self.transforms {
            text = (transform.apply)(&text);
        }
        text
    }

    fn counts(chars: impl Iterator<Item = char>) -> BTreeMap<char, usize> {
        let mut counts = BTreeMap::new();
        for c in chars {
            *counts.entry(c).or_insert(0) += 1;
        }
        counts
    }

    pub fn active_transforms(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name).collect()
    }
}

impl Manifold for MultisetManifold {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> &'static str {
        "multiset"
    }

    fn projection(&self) -> ProjectionSpec {
        let bag: String = self.letters.iter().collect();
        ProjectionSpec {
            system_instruction:
                "You rearrange letter banks into words. Output exactly one UPPERCASE word and nothing else."
                    .to_string(),
            user_prompt: format!("Rearrange every letter of the bank {bag} into a single word."),
            invariants: vec![
                format!("Use only letters from {bag}."),
                "Use every letter exactly as often as it appears in the bank.".to_string(),
                "Output one word in UPPERCASE with no commentary.".to_string(),
            ],
        }
    }

    fn ruin_check(&self, candidate: &Candidate) -> bool {
        let text = candidate.as_text().to_uppercase();
        self.ruin_terms.iter().any(|term| text.contains(term))
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<ValidationResult, ValidationFault> {
        let word = self.normalize(candidate);

        if word.is_empty() {
            return Ok(ValidationResult::failing(
                1.0,
                0.0,
                vec![Violation::error("empty_candidate", "Candidate is empty.")],
            )
            .with_hints(vec!["Provide a non-empty uppercase word.".to_string()]));
        }

        let target = Self::counts(self.letters.iter().copied());
        let got = Self::counts(word.chars());

        let mut extra: BTreeMap<char, usize> = BTreeMap::new();
        let mut missing: BTreeMap<char, usize> = BTreeMap::new();
        for (c, n) in &got {
            let allowed = target.get(c).copied().unwrap_or(0);
            if *n > allowed {
                extra.insert(*c, n - allowed);
            }
        }
        for (c, n) in &target {
            let used = got.get(c).copied().unwrap_or(0);
            if *n > used {
                missing.insert(*c, n - used);
            }
        }

        let mut violations = Vec::new();
        let mut hints = Vec::new();

        if !extra.is_empty() {
            for (c, n) in &extra {
                let allowed = target.get(c).copied().unwrap_or(0);
                hints.push(format!(
                    "CONSTRAINT BREACH: you used '{c}' {} time(s) beyond the bank's {allowed}.",
                    n
                ));
            }
            violations.push(
                Violation::error("letters_extra", "Candidate uses letters beyond the bank.")
                    .with_metadata(serde_json::to_value(&extra).unwrap_or_default()),
            );
        }
        if !missing.is_empty() {
            let letters: String = missing.keys().collect();
            hints.push(format!("Unused bank letters remain: {letters}."));
            violations.push(
                Violation::error("letters_missing", "Candidate leaves bank letters unused.")
                    .with_metadata(serde_json::to_value(&missing).unwrap_or_default()),
            );
        }

        if let Some(lexicon) = &self.lexicon {
            if !lexicon.contains(&word) {
                hints.push(format!("'{word}' is not in the accepted lexicon."));
                violations.push(Violation::error(
                    "unknown_word",
                    format!("'{word}' is not an accepted word."),
                ));
            }
        }

        let target_mass: usize = target.values().sum();
        let edit_mass: usize = extra.values().sum::<usize>() + missing.values().sum::<usize>();
        let blue = 1.0 - edit_mass as f64 / target_mass.max(1) as f64;
        let distance = edit_mass as f64 / target_mass.max(1) as f64;

        if violations.is_empty() {
            Ok(ValidationResult::passing(blue))
        } else {
            Ok(ValidationResult::failing(distance, blue, violations).with_hints(hints))
        }
    }

    fn thresholds(&self) -> &GovernorThresholds {
        &self.thresholds
    }

    fn max_retries(&self) -> usize {
        self.max_retries
    }
}
