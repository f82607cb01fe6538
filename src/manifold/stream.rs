//! Stream-validity family
//!
//! Decodes the candidate as a raw byte stream and enforces UTF-8
//! well-formedness: lead-byte length patterns, continuation ranges, no
//! overlong forms, no surrogate-range code points, nothing above U+10FFFF.
//! The first malformed sequence is reported by byte offset.

use serde::{Deserialize, Serialize};

use crate::config::{FamilySpec, GovernorThresholds};
use crate::manifold::{
    Candidate, Manifold, ProjectionSpec, ValidationFault, ValidationResult, Violation,
};

/// A malformed byte span: `offset..offset + len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedSpan {
    pub offset: usize,
    pub len: usize,
}

/// Scan a byte stream for malformed UTF-8 sequences. On a bad continuation
/// the span covers the maximal valid subpart; scanning resumes at the first
/// offending byte.
pub fn scan_utf8(bytes: &[u8]) -> Vec<MalformedSpan> {
    let mut errors = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let lead = bytes[i];
        let (len, cont_range): (usize, fn(usize, u8) -> bool) = match lead {
            0x00..=0x7f => {
                i += 1;
                continue;
            }
            0xc2..=0xdf => (2, |_, b| (0x80..=0xbf).contains(&b)),
            0xe0 => (3, |idx, b| {
                if idx == 1 {
                    (0xa0..=0xbf).contains(&b) // reject overlong 3-byte forms
                } else {
                    (0x80..=0xbf).contains(&b)
                }
            }),
            0xe1..=0xec | 0xee..=0xef => (3, |_, b| (0x80..=0xbf).contains(&b)),
            0xed => (3, |idx, b| {
                if idx == 1 {
                    (0x80..=0x9f).contains(&b) // reject surrogate range
                } else {
                    (0x80..=0xbf).contains(&b)
                }
            }),
            0xf0 => (4, |idx, b| {
                if idx == 1 {
                    (0x90..=0xbf).contains(&b) // reject overlong 4-byte forms
                } else {
                    (0x80..=0xbf).contains(&b)
                }
            }),
            0xf1..=0xf3 => (4, |_, b| (0x80..=0xbf).contains(&b)),
            0xf4 => (4, |idx, b| {
                if idx == 1 {
                    (0x80..=0x8f).contains(&b) // reject beyond U+10FFFF
                } else {
                    (0x80..=0xbf).contains(&b)
                }
            }),
            // 0x80..=0xc1 (stray continuation / overlong lead) and 0xf5..=0xff
            _ => {
                errors.push(MalformedSpan { offset: i, len: 1 });
                i += 1;
                continue;
            }
        };

        let mut consumed = 1usize;
        while consumed < len {
            match bytes.get(i + consumed) {
                Some(&b) if cont_range(consumed, b) => consumed += 1,
                _ => break,
            }
        }
        if consumed == len {
            i += len;
        } else {
            errors.push(MalformedSpan {
                offset: i,
                len: consumed,
            });
            i += consumed;
        }
    }

    errors
}

pub struct StreamManifold {
    id: String,
    thresholds: GovernorThresholds,
    max_retries: usize,
}

impl StreamManifold {
    pub fn new(tag: &str, spec: &FamilySpec) -> Self {
        Self {
            id: format!("stream:{tag}"),
            thresholds: spec.thresholds.clone(),
            max_retries: spec.max_retries,
        }
    }
}

impl Manifold for StreamManifold {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> &'static str {
        "stream"
    }

    fn projection(&self) -> ProjectionSpec {
        ProjectionSpec {
            system_instruction: "You emit byte-clean text.".to_string(),
            user_prompt: "Re-emit the payload as well-formed UTF-8.".to_string(),
            invariants: vec![
                "Every code point must be well-formed UTF-8.".to_string(),
                "No overlong sequences.".to_string(),
                "No surrogate-range code points.".to_string(),
                "No invalid continuation bytes.".to_string(),
            ],
        }
    }

    fn ruin_check(&self, _candidate: &Candidate) -> bool {
        false
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<ValidationResult, ValidationFault> {
        let errors = scan_utf8(candidate.as_bytes());
        if errors.is_empty() {
            return Ok(ValidationResult::passing(1.0));
        }

        let first = errors[0];
        let violations = vec![Violation::error(
            "malformed_sequence",
            format!(
                "Invalid UTF-8 sequence at byte offset {} ({} byte(s)); {} error(s) total.",
                first.offset,
                first.len,
                errors.len()
            ),
        )
        .with_metadata(serde_json::json!({
            "first_offset": first.offset,
            "error_count": errors.len(),
        }))];

        Ok(
            ValidationResult::failing(errors.len() as f64, 0.0, violations).with_hints(vec![
                format!("Fix the byte sequence starting at offset {}.", first.offset),
            ]),
        )
    }

    fn thresholds(&self) -> &GovernorThresholds {
        &self.thresholds
    }

    fn max_retries(&self) -> usize {
        self.max_retries
    }
}
