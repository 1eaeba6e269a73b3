//! Prompts for the extraction workflow and the OCR instruction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the three-pass protocol and the OCR reply
//!    grammar are contracts between prompt text and parsing code; changing
//!    either means editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without
//!    spinning up a real model, so a drifted label or dropped rule is caught
//!    immediately.

/// Sentinel the OCR model answers in the VALUE field when nothing was found.
/// The reply parser treats it (case-insensitively) as "no data".
pub const OCR_NO_ANSWER: &str = "NONE";

/// Three-pass extraction prompt for the primary model.
///
/// Pass 1 and 2 are pure reasoning instructions — no tool use. Pass 3 drives
/// the `ask_ocr` tool for every entry of the registry built in pass 2, and
/// declares OCR results authoritative over the model's own reading.
pub const PROMPT_TEXT: &str = r#"You are analysing the pages of a document. Work in three passes.

## PAGE NUMBERING
Pages are supplied in order; the list of their 1-based numbers follows this
prompt. When calling ask_ocr, pass that exact number as page_num.

## PASS 1 — Transcription
Read ALL pages and extract the COMPLETE text: headings, paragraphs, lists,
tables. Do this yourself, from the images — do NOT call OCR for general text.

## PASS 2 — Registry of precision-critical values
Go over the extracted text and list every value you may have misread:
- URLs and email addresses
- Identifiers: registration numbers, tax IDs, document numbers
- Personal names (exact spelling)
- Phone numbers, postal addresses
- Codes, article numbers, account numbers

For each value remember its page number and a nearby textual anchor
(the words just before or after it).

## PASS 3 — OCR verification
Call ask_ocr for EVERY value in the registry, grouping calls by page.
Call format: ask_ocr(page_num=N, prompt="find <exactly what>, anchor: <nearby text>")

When the OCR results arrive, SUBSTITUTE them for your own readings wherever
they disagree. The OCR result ALWAYS wins over your reading.

## Final answer format
Return the FULL document text as plain text, preserving structure (headings,
lists, paragraphs). Every precision-critical value must come from OCR."#;

/// Structure-extraction prompt. Sent in an independent invocation; the reply
/// is expected to be a single JSON object.
pub const PROMPT_STRUCTURE: &str = r#"Analyse these pages and describe the hierarchical structure of the document.
For every heading give:
- Level (1 for top-level sections, 2 for subsections, and so on)
- Heading text
- Page number

Answer format (JSON):
{
  "headers": [
    {"level": 1, "title": "1. Introduction", "page": 1},
    {"level": 2, "title": "1.1. Background", "page": 2}
  ]
}"#;

/// System instruction fixing the OCR reply grammar.
///
/// The three labels and the `NONE` sentinel are the contract the parser in
/// [`crate::client::ocr`] matches on; examples keep weaker model snapshots on
/// the rails.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are a precise OCR assistant. Your task is to extract one specific value from a document page image.

ANSWER FORMAT (follow strictly):
VALUE: <the extracted value in full, or NONE if not found>
CONTEXT: <the text fragment surrounding the found value>
EXPLANATION: <where you looked and what you found or did not find>

RULES:
- Return the value EXACTLY as it appears in the document; never alter or shorten it
- Return URLs in full, including the protocol and the whole path
- Numbers, names, addresses — exactly as written
- If the value is not found, answer VALUE: NONE

EXAMPLE (URL):
VALUE: https://example.com/path/to/page
CONTEXT: See details: https://example.com/path/to/page (section 3)
EXPLANATION: Found the URL near the bottom of the page after the word 'details'

EXAMPLE (identifier):
VALUE: 1234567890123
CONTEXT: Reg. no: 1234567890123
EXPLANATION: Found after the 'Reg. no:' label in the document header

EXAMPLE (not found):
VALUE: NONE
CONTEXT: -
EXPLANATION: Searched the page but the requested value is absent"#;

/// Suffix appended to workflow prompts listing the pages in play.
pub fn page_context(page_numbers: &[u32]) -> String {
    format!("\n\nPage numbers: {page_numbers:?}")
}
