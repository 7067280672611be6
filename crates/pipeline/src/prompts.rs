//! Prompt templates for each stage.

pub fn analysis_prompt(code: &str) -> String {
    format!(
        r#"Review the code below for faults and security vulnerabilities. Report your findings in this structure:

### High-Level Overview:
- What the file does: its purpose and main functionality.

### Detected Faults:
Describe every fault with exactly this layout. Always write the word "Fault" followed by its number:

#### Fault 1:
- **Fault Detected**: [one-line description]
- **Cause**: [which part of the code is responsible, and how]
- **Impact**: [consequences for behaviour or security]
- **Solution**: [how to fix it, explained in prose with no code block]

Continue with Fault 2, Fault 3 and so on for further issues. If nothing is wrong, say plainly that the code appears to be fault-free.

### Output Requirements:
- Use bullet points and the headings above.
- Keep each explanation short and actionable.

Code:
{code}
"#
    )
}

/// Merge per-chunk analyses into one report with a single fault numbering
pub fn consolidation_prompt(analyses: &str) -> String {
    format!(
        r#"The fault analyses below were written for consecutive parts of one file. Merge them into a single report with this structure:

### High-Level Overview:
- One summary of the whole file's purpose and functionality.

### Detected Faults:
Number the faults again from 1, dropping duplicates:

#### Fault 1:
- **Fault Detected**: precise description
- **Cause**: concise root cause
- **Impact**: risks or consequences
- **Solution**: an actionable fix

Continue with Fault 2, Fault 3 and so on. If no part reported a fault, say plainly that the code appears to be fault-free.

### Output Requirements:
- Consistent formatting and terminology.
- Clear and complete, without repetition.

Analyses:
{analyses}
"#
    )
}

pub fn synthesis_prompt(fault: &str, context: &str) -> String {
    format!(
        r#"You are an expert software engineer. Using the fault and the surrounding code below, write the fix.

**Fault Details (Do NOT include in response):**
{fault}

**Context Information (Do NOT include in response):**
{context}

Return only the small code change that fixes this fault, not the entire file, in this format:

### High-Level Explanation:
A short explanation of the change.

### Implementation Plan:
#### Code Changes:
```[language]
// the changed code
```

Do not repeat or refer to the fault details or the context in your answer.
"#
    )
}

/// Apply `fragment` to the running code, keeping every earlier fix
pub fn integration_prompt(current_code: &str, fragment: &str, language: &str) -> String {
    format!(
        r#"Apply the fix below to the current code while keeping every fix already in it.
Always follow the output format exactly and always close the code block.

Instructions:
- Integrate only the changes the fix needs.
- Keep the structure and formatting of the file.
- Return the whole updated file, not a diff.
- No explanations, comments or extra formatting.

Current code:
{current_code}

Fix to apply:
{fragment}

Output format:
```{language}
// the whole updated file
```
"#
    )
}

/// Variant used when there is no running code to build on
pub fn first_integration_prompt(original: &str, fragment: &str, language: &str) -> String {
    format!(
        r#"Apply the fix below to the file contents and return the entire updated file.
Always follow the output format exactly and always close the code block.

Instructions:
- Integrate only the changes the fix needs.
- Keep the structure and formatting of the file.
- Return the whole corrected file, not only the changed lines.
- No explanations, comments or extra formatting.

File contents:
{original}

Fix to apply:
{fragment}

Output format:
```{language}
// the whole updated file
```
"#
    )
}

pub fn validation_prompt(final_patch: &str, fault_report: &str, language: &str) -> String {
    format!(
        r#"### Code Review and Fault Verification

You are an expert reviewer of `{language}` code. The file below was modified to fix a list of reported faults. Decide whether those faults are fully resolved, then review the file as a whole.

File:
{final_patch}

Faults that were addressed:
{fault_report}

### Review Criteria:

1. **Compilation and syntax**: the file must build as `{language}`. Name exact errors, with line numbers where possible.
2. **Security**: report any vulnerability, including injection, memory corruption, broken authentication or authorization, insecure data handling, denial-of-service risks, race conditions and unsafe dependencies.
3. **Maintainability**: idiomatic `{language}`, sensible structure and naming, no redundant or inefficient logic.
4. **Correctness**: the code does what it intends, including on edge cases.
5. **Fault resolution**: for each listed fault, say whether it is resolved, partially resolved or still present, and why.

### Response Format (follow exactly):

**Status:** `[GOOD / BAD]`
(GOOD only if every fault is resolved and no criterion fails; otherwise BAD.)

**Issues:**
```
[Every issue found with an explanation, or "None".]
```

**Security Vulnerabilities Found:**
```
[Every vulnerability, or "None".]
```

**Corrections:**
```
[A corrected version of the code when needed.]
```

**Explanation:**
```
[A concise explanation tying the issues to the criteria above.]
```

Be specific and cite line numbers where possible. Do not assume the fault list is exhaustive.
"#
    )
}

pub fn syntax_repair_prompt(code: &str, language: &str) -> String {
    format!(
        r#"You are a software engineer. Correct any syntax errors in the following `{language}` code without changing its behaviour.

**Code:**
```{language}
{code}
```

Output:
```{language}
// the corrected code
```
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_prompt_embeds_fault_and_context() {
        let prompt = synthesis_prompt("#### Fault 1: overflow", "fn add(a: u8, b: u8) -> u8");
        assert!(prompt.contains("Fault Details (Do NOT include in response)"));
        assert!(prompt.contains("#### Fault 1: overflow"));
        assert!(prompt.contains("Context Information (Do NOT include in response)"));
        assert!(prompt.contains("fn add(a: u8, b: u8) -> u8"));
    }

    #[test]
    fn integration_prompts_carry_language_fence() {
        assert!(integration_prompt("x = 1", "x = 2", "python").contains("```python\n"));
        assert!(first_integration_prompt("x = 1", "x = 2", "python").contains("File contents:\nx = 1"));
    }

    #[test]
    fn validation_prompt_asks_for_status_template() {
        let prompt = validation_prompt("code", "#### Fault 1: bug", "rust");
        assert!(prompt.contains("**Status:**"));
        assert!(prompt.contains("**Issues:**"));
        assert!(prompt.contains("#### Fault 1: bug"));
    }

    #[test]
    fn analysis_prompt_requests_numbered_faults() {
        let prompt = analysis_prompt("def f(): pass");
        assert!(prompt.contains("#### Fault 1:"));
        assert!(prompt.ends_with("def f(): pass\n"));
    }
}
