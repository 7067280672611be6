//! Best-effort parsers over free-form model output.
//!
//! Everything the stages read back from the backend goes through here, so a stricter
//! output format only has to change this module.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

static FAULT_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#### Fault (\d+):").expect("FAULT_HEADING regex should compile")
});

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:[a-zA-Z]*)?\r?\n([\s\S]*?)```").expect("CODE_BLOCK regex should compile")
});

static STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\**\s*status\s*\**\s*[:.]?\s*\**\s*`?\[?\s*(good|bad)\b")
        .expect("STATUS regex should compile")
});

static SECTION_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*\*\*[ \t]*(status|issues|security vulnerabilities found|corrections|explanation)[ \t]*\**[ \t]*:[ \t]*\**",
    )
    .expect("SECTION_HEADING regex should compile")
});

pub const NONE_PROVIDED: &str = "None provided";

/// One `#### Fault N:` block of a localization report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultEntry {
    /// The `N` of the heading
    pub ordinal: usize,
    /// Heading through to the next heading, trimmed
    pub raw_text: String,
}

/// Split a report into its `#### Fault N:` sections, in order of appearance
pub fn extract_faults(report: &str) -> Vec<FaultEntry> {
    let headings: Vec<(usize, usize)> = FAULT_HEADING
        .captures_iter(report)
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let ordinal = caps.get(1)?.as_str().parse().ok()?;
            Some((start, ordinal))
        })
        .collect();

    let faults: Vec<FaultEntry> = headings
        .iter()
        .enumerate()
        .map(|(idx, &(start, ordinal))| {
            let end = headings
                .get(idx + 1)
                .map_or(report.len(), |&(next, _)| next);
            FaultEntry {
                ordinal,
                raw_text: report[start..end].trim().to_string(),
            }
        })
        .collect();

    log::info!("Found {} faults in report", faults.len());
    faults
}

/// Inner text of the first fenced code block, or an empty string when there is none
pub fn return_code_block(text: &str) -> String {
    match CODE_BLOCK.captures(text).and_then(|caps| caps.get(1)) {
        Some(block) => block.as_str().to_string(),
        None => {
            log::warn!("No code block found in response");
            String::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Good,
    Bad,
    Unknown,
}

impl ValidationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Good => "GOOD",
            ValidationStatus::Bad => "BAD",
            ValidationStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review verdict decoded from a validation response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub issues: String,
    pub security: String,
    pub corrections: String,
    pub explanation: String,
}

impl ValidationResult {
    pub fn render_markdown(&self) -> String {
        format!(
            "### Status: {}\n\n### Overview:\n\n{}",
            self.status, self.issues
        )
    }
}

/// Decode the status line and labelled sections of a review response.
///
/// Each section runs from its heading to the next known heading; missing ones
/// read as [`NONE_PROVIDED`].
pub fn parse_validation(response: &str) -> ValidationResult {
    let response = response.trim();

    let status = STATUS
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map_or(ValidationStatus::Unknown, |m| {
            if m.as_str().eq_ignore_ascii_case("good") {
                ValidationStatus::Good
            } else {
                ValidationStatus::Bad
            }
        });

    let headings: Vec<(String, usize, usize)> = SECTION_HEADING
        .captures_iter(response)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1)?.as_str().to_ascii_lowercase();
            Some((label, whole.start(), whole.end()))
        })
        .collect();

    let section = |label: &str| -> String {
        headings
            .iter()
            .enumerate()
            .find(|(_, (name, _, _))| name == label)
            .map(|(idx, (_, _, body_start))| {
                let body_end = headings
                    .get(idx + 1)
                    .map_or(response.len(), |(_, next, _)| *next);
                response[*body_start..body_end].trim().to_string()
            })
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| NONE_PROVIDED.to_string())
    };

    let result = ValidationResult {
        status,
        issues: section("issues"),
        security: section("security vulnerabilities found"),
        corrections: section("corrections"),
        explanation: section("explanation"),
    };
    log::info!("Extracted validation status: {}", result.status);
    log::debug!(
        "Issues provided: {}, corrections provided: {}",
        result.issues != NONE_PROVIDED,
        result.corrections != NONE_PROVIDED
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const REPORT: &str = "### High-Level Overview:\n- parses input\n\n### Detected Faults:\n\n\
#### Fault 1:\n- **Fault Detected**: unchecked index\n- **Cause**: `v[i]`\n\n\
#### Fault 2:\n- **Fault Detected**: unwrap on IO\n\n\
#### Fault 3:\n- **Fault Detected**: silent error\n";

    #[test]
    fn extract_faults_in_order() {
        let faults = extract_faults(REPORT);
        assert_eq!(faults.len(), 3);
        for (idx, fault) in faults.iter().enumerate() {
            assert_eq!(fault.ordinal, idx + 1);
            assert!(fault
                .raw_text
                .starts_with(&format!("#### Fault {}:", idx + 1)));
        }
        assert!(faults[0].raw_text.ends_with("`v[i]`"));
        assert!(!faults[0].raw_text.contains("Fault 2"));
        assert_eq!(
            faults[2].raw_text,
            "#### Fault 3:\n- **Fault Detected**: silent error"
        );
    }

    #[test]
    fn extract_faults_without_headings() {
        assert!(extract_faults("").is_empty());
        assert!(extract_faults("The code appears to be fault-free.").is_empty());
        assert!(extract_faults("#### Fault one: not numbered").is_empty());
    }

    #[test]
    fn code_block_with_and_without_language() {
        assert_eq!(
            return_code_block("Fix:\n```python\ndef f():\n    return 1\n```\nDone"),
            "def f():\n    return 1\n"
        );
        assert_eq!(return_code_block("```\nx = 1\n```"), "x = 1\n");
        assert_eq!(return_code_block("```rust\r\nfn a() {}\n```"), "fn a() {}\n");
    }

    #[test]
    fn code_block_first_match_only() {
        let text = "```js\nfirst()\n```\n\n```js\nsecond()\n```";
        assert_eq!(return_code_block(text), "first()\n");
    }

    #[test]
    fn code_block_missing() {
        assert_eq!(return_code_block("no fences here"), "");
        assert_eq!(return_code_block("```unterminated\ncode"), "");
    }

    #[test]
    fn parse_full_review() {
        let response = "**Status:** GOOD\n\n**Issues:**\n```\nNone\n```\n\n\
**Security Vulnerabilities Found:**\n```\nNone.\n```\n\n\
**Corrections:**\nNot needed\n\n**Explanation:**\nAll faults resolved.";
        let result = parse_validation(response);
        assert_eq!(result.status, ValidationStatus::Good);
        assert_eq!(result.issues, "```\nNone\n```");
        assert_eq!(result.security, "```\nNone.\n```");
        assert_eq!(result.corrections, "Not needed");
        assert_eq!(result.explanation, "All faults resolved.");
    }

    #[test]
    fn parse_status_variants() {
        assert_eq!(parse_validation("status: bad").status, ValidationStatus::Bad);
        assert_eq!(
            parse_validation("**Status:** `[BAD]`").status,
            ValidationStatus::Bad
        );
        assert_eq!(
            parse_validation("**STATUS** . Good").status,
            ValidationStatus::Good
        );
        assert_eq!(
            parse_validation("Status: unclear").status,
            ValidationStatus::Unknown
        );
        assert_eq!(parse_validation("").status, ValidationStatus::Unknown);
    }

    #[test]
    fn missing_sections_default() {
        let result = parse_validation("**Status:** BAD");
        assert_eq!(result.issues, NONE_PROVIDED);
        assert_eq!(result.corrections, NONE_PROVIDED);
        assert_eq!(result.explanation, NONE_PROVIDED);
        assert_eq!(
            result.render_markdown(),
            "### Status: BAD\n\n### Overview:\n\nNone provided"
        );
    }
}
