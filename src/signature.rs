//! Error-signature derivation.
//!
//! A signature is a truncated slice of an error message or log line used
//! as a matching key for the pattern store and the cooldown tracker. It
//! is deliberately not a structured error code.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::FailedJob;

/// Maximum signature length kept for matching.
const SIGNATURE_MAX_LEN: usize = 200;

/// First plausible error line in a raw log.
static LOG_ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^.*\berror\b.*$").unwrap());

/// Generic messages that are useless as matching keys.
const GENERIC_PREFIXES: &[&str] = &["Process completed with exit code"];

/// Derive the run's primary error signature.
///
/// Preference order: the first error-level annotation message, then the
/// first annotation of any severity, then the first log line mentioning
/// an error. Whitespace is collapsed and the result truncated.
#[must_use]
pub fn derive(jobs: &[FailedJob]) -> Option<String> {
    for job in jobs {
        if let Some(annotation) = job.annotations.iter().find(|a| a.is_error()) {
            return Some(normalize(&annotation.message));
        }
    }
    for job in jobs {
        if let Some(annotation) = job.annotations.first() {
            return Some(normalize(&annotation.message));
        }
    }
    for job in jobs {
        if let Some(m) = LOG_ERROR_LINE.find(&job.log_text) {
            return Some(normalize(m.as_str()));
        }
    }
    None
}

/// Check whether a signature is too generic or too short to be stored.
#[must_use]
pub fn is_storable(signature: &str, min_len: usize) -> bool {
    if signature.len() < min_len {
        return false;
    }
    !GENERIC_PREFIXES
        .iter()
        .any(|prefix| signature.starts_with(prefix))
}

fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = collapsed;
    if out.len() > SIGNATURE_MAX_LEN {
        // Truncate on a char boundary
        let mut cut = SIGNATURE_MAX_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Annotation, FailedJob};

    fn job_with_annotation(severity: &str, message: &str) -> FailedJob {
        FailedJob {
            id: 1,
            name: "build".into(),
            annotations: vec![Annotation {
                path: "src/A.cs".into(),
                start_line: 1,
                end_line: 1,
                severity: severity.into(),
                message: message.into(),
            }],
            log_text: String::new(),
        }
    }

    #[test]
    fn test_prefers_error_annotations() {
        let jobs = vec![
            job_with_annotation("warning", "CS0414: unused field"),
            job_with_annotation("failure", "CS0101: duplicate definition of 'Order'"),
        ];
        let sig = derive(&jobs).unwrap();
        assert!(sig.contains("CS0101"));
    }

    #[test]
    fn test_falls_back_to_log_error_line() {
        let jobs = vec![FailedJob {
            id: 1,
            name: "build".into(),
            annotations: vec![],
            log_text: "restoring\nnpm ERR! error while resolving dependencies\ndone".into(),
        }];
        let sig = derive(&jobs).unwrap();
        assert!(sig.contains("resolving dependencies"));
    }

    #[test]
    fn test_generic_and_short_signatures_rejected() {
        assert!(!is_storable("Process completed with exit code 1.", 10));
        assert!(!is_storable("CS0101", 10));
        assert!(is_storable("CS0101: duplicate definition of 'Order'", 10));
    }

    #[test]
    fn test_signature_truncated_and_whitespace_collapsed() {
        let long = format!("error   X{}", "y".repeat(400));
        let sig = normalize(&long);
        assert!(sig.len() <= 200);
        assert!(sig.starts_with("error X"));
    }
}
