//! Sign risk heuristics
//!
//! Lightweight estimates of ruin risk and utility potential for an incoming
//! sign, used by the triage gate. Deliberately simple; domain evaluators can
//! replace them without touching the pipeline.

use regex::Regex;

const RISK_TERMS: [&str; 6] = ["delete", "drop", "format", "shutdown", "wipe", "destroy"];

/// Estimate ruin risk in [0, 1]. Destructive verbs raise it from a small base.
pub fn risk_score(text: &str) -> f64 {
    let lowered = text.to_lowercase();
    let hits = RISK_TERMS.iter().filter(|term| lowered.contains(*term)).count();
    (0.05 + 0.15 * hits as f64).clamp(0.0, 1.0)
}

/// Estimate utility potential in [0, 1]. Longer, more specific asks score higher.
pub fn utility_score(text: &str) -> f64 {
    let length_bonus = (text.len() as f64 / 200.0).min(0.6);
    (0.3 + length_bonus).clamp(0.0, 1.0)
}

/// Extract an uppercase letter block from free text, preferring explicit
/// blocks of 3+ letters; falls back to all alphabetic characters.
pub fn extract_letter_bag(text: &str) -> String {
    let block = Regex::new(r"[A-Z]{3,}").expect("static pattern");
    if let Some(found) = block.find(text) {
        return found.as_str().to_string();
    }
    text.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_uppercase()
}
