// All agent prompt constants for the generation pipeline. Every prompt
// demands JSON-only output; the runner still tolerates fences and prose.

/// collect-data: condense the request context into the structured facts the
/// writing steps work from. Replace `{context_json}` before sending.
pub const COLLECT_DATA_PROMPT: &str = r#"You are preparing source material for tailored job-application documents.

From the request context below, produce a JSON object with this EXACT schema:
{
  "job": {"title": "...", "company": "...", "url": "...", "requirements": ["..."]},
  "company_facts": ["..."],
  "candidate_highlights": ["..."],
  "keywords": ["..."]
}

Only use facts present in the context. Do NOT invent employers, dates, or skills.
Respond with ONLY the JSON object.

REQUEST CONTEXT:
{context_json}"#;

/// generate-resume. Replace `{context_json}` and `{collected_json}`.
// r## because the markdown example inside contains a `"#` sequence.
pub const GENERATE_RESUME_PROMPT: &str = r##"Write a tailored one-page resume in Markdown for the job below.

Ground every line in the candidate highlights; do NOT invent facts.
Weave in the keywords where they are truthful.

Return a JSON object with this EXACT schema:
{
  "markdown": "# Name\n...",
  "keywords_used": ["..."]
}

REQUEST CONTEXT:
{context_json}

COLLECTED DATA:
{collected_json}"##;

/// generate-cover-letter. Replace `{context_json}` and `{collected_json}`.
pub const GENERATE_COVER_LETTER_PROMPT: &str = r#"Write a tailored cover letter in Markdown for the job below.

Three short paragraphs: hook, evidence, close. Ground every claim in the
candidate highlights; do NOT invent facts.

Return a JSON object with this EXACT schema:
{
  "markdown": "Dear ...",
  "keywords_used": ["..."]
}

REQUEST CONTEXT:
{context_json}

COLLECTED DATA:
{collected_json}"#;

/// render-pdf: turn the generated documents into PDF bytes.
/// Replace `{documents_json}` with `[{"name": "resume", "markdown": "..."}]`.
pub const RENDER_PDF_PROMPT: &str = r#"Render each Markdown document below to a single-page PDF.

Return a JSON object with this EXACT schema:
{
  "files": [
    {"name": "resume", "pdf_base64": "..."}
  ]
}

Use US letter, 1 inch margins, a clean serif body face.
Respond with ONLY the JSON object.

DOCUMENTS:
{documents_json}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_carry_their_placeholders() {
        assert!(COLLECT_DATA_PROMPT.contains("{context_json}"));
        for prompt in [GENERATE_RESUME_PROMPT, GENERATE_COVER_LETTER_PROMPT] {
            assert!(prompt.contains("{context_json}"));
            assert!(prompt.contains("{collected_json}"));
        }
        assert!(RENDER_PDF_PROMPT.contains("{documents_json}"));
    }

    #[test]
    fn test_resume_prompt_keeps_markdown_schema_example() {
        // The schema example starts a markdown heading inside a quoted
        // string; the full line must survive in the literal.
        assert!(GENERATE_RESUME_PROMPT.contains(r##""markdown": "# Name\n...""##));
        assert!(GENERATE_RESUME_PROMPT.trim_end().ends_with("{collected_json}"));
    }
}
