//! Citation validation for retrieval-grounded responses.
//!
//! The study agent numbers its retrieved sources `[1]..[n]` and requires
//! every bracketed citation in the generated text to resolve to one of them.
//! Unresolvable citations invalidate the response.

use regex::Regex;
use serde::Serialize;

/// Result of validating one generated response.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub citations_found: Vec<usize>,
    pub invalid_citations: Vec<usize>,
    pub source_count: usize,
}

pub struct CitationValidator {
    citation_re: Regex,
}

impl Default for CitationValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CitationValidator {
    pub fn new() -> Self {
        Self {
            citation_re: Regex::new(r"\[(\d{1,3})\]").expect("citation pattern is valid"),
        }
    }

    /// Extract the distinct citation indices appearing in a response.
    pub fn extract(&self, response: &str) -> Vec<usize> {
        let mut seen = Vec::new();
        for capture in self.citation_re.captures_iter(response) {
            if let Ok(index) = capture[1].parse::<usize>() {
                if !seen.contains(&index) {
                    seen.push(index);
                }
            }
        }
        seen
    }

    /// Validate a response against the number of retrieved sources. Index 0
    /// and indices past the source count cannot be resolved.
    pub fn validate(&self, response: &str, source_count: usize) -> ValidationReport {
        let citations_found = self.extract(response);
        let invalid_citations: Vec<usize> = citations_found
            .iter()
            .copied()
            .filter(|&index| index == 0 || index > source_count)
            .collect();

        ValidationReport {
            is_valid: invalid_citations.is_empty(),
            citations_found,
            invalid_citations,
            source_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_distinct_citations_in_order() {
        let validator = CitationValidator::new();
        let found = validator.extract("First [1], then [2], then [1] again.");
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn accepts_citations_within_source_range() {
        let validator = CitationValidator::new();
        let report = validator.validate("Supported claim [1][2].", 3);
        assert!(report.is_valid);
        assert!(report.invalid_citations.is_empty());
    }

    #[test]
    fn rejects_out_of_range_citations() {
        let validator = CitationValidator::new();
        let report = validator.validate("Fabricated claim [7].", 2);
        assert!(!report.is_valid);
        assert_eq!(report.invalid_citations, vec![7]);
    }

    #[test]
    fn rejects_zero_index() {
        let validator = CitationValidator::new();
        let report = validator.validate("Odd claim [0].", 2);
        assert!(!report.is_valid);
    }

    #[test]
    fn uncited_text_is_valid() {
        let validator = CitationValidator::new();
        let report = validator.validate("No citations here.", 0);
        assert!(report.is_valid);
        assert!(report.citations_found.is_empty());
    }
}
