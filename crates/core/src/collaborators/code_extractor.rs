//! # Code Extractor
//!
//! Local code-extraction collaborator. Pulls fenced (or, failing that,
//! indented) code blocks out of the retrieved chunks, labels their language
//! and keeps the ones most relevant to the query, target language first.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

use crate::contracts::{
    CodeExample, CodeExtractionRequest, CodeExtractionResponse, CollaboratorKind, DocumentChunk,
};
use crate::swarm::Collaborator;

const MAX_EXAMPLES: usize = 5;
const MIN_INDENTED_LEN: usize = 20;
const DESCRIPTION_CHARS: usize = 150;

const LANGUAGE_PATTERNS: &[(&str, &[&str])] = &[
    (
        "solidity",
        &[
            r"pragma solidity",
            r"contract\s+\w+",
            r"function\s+\w+.*\s+(public|private|internal|external)",
        ],
    ),
    (
        "javascript",
        &[
            r"const\s+\w+\s*=",
            r"function\s+\w+\s*\(",
            r"async\s+function",
            r"=>\s*\{",
            r"require\(",
            r"import\s+",
        ],
    ),
    (
        "typescript",
        &[
            r"interface\s+\w+",
            r"type\s+\w+\s*=",
            r":\s*(string|number|boolean)",
            r"<.*>",
        ],
    ),
    ("python", &[r"def\s+\w+\s*\(", r"class\s+\w+", r"import\s+\w+", r"from\s+\w+\s+import"]),
    ("bash", &[r"^\s*#\s*!", r"npm\s+install", r"yarn\s+add", r"cd\s+", r"mkdir", r"^\$\s+"]),
    ("json", &[r"^\s*\{", r":\s*\{", r":\s*\[", r"\}\s*,?\s*$"]),
    ("yaml", &[r"^\s*\w+:", r":\s*$", r"^\s*-\s+"]),
];

fn fenced_block() -> Option<&'static Regex> {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    FENCED
        .get_or_init(|| {
            RegexBuilder::new(r"```(\w+)?[^\n]*\n(.*?)```")
                .dot_matches_new_line(true)
                .build()
                .ok()
        })
        .as_ref()
}

fn language_patterns() -> &'static [(&'static str, Vec<Regex>)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Vec<Regex>)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        LANGUAGE_PATTERNS
            .iter()
            .map(|(lang, patterns)| {
                let compiled = patterns
                    .iter()
                    .filter_map(|p| {
                        RegexBuilder::new(p)
                            .multi_line(true)
                            .case_insensitive(true)
                            .build()
                            .ok()
                    })
                    .collect();
                (*lang, compiled)
            })
            .collect()
    })
}

/// Canonical name for a fence hint, if it names a known language
pub fn normalize_hint(hint: &str) -> Option<&'static str> {
    let canonical = match hint.to_lowercase().as_str() {
        "sol" | "solidity" => "solidity",
        "js" | "jsx" | "javascript" | "node" => "javascript",
        "ts" | "tsx" | "typescript" => "typescript",
        "py" | "python" => "python",
        "sh" | "shell" | "bash" | "console" | "zsh" => "bash",
        "json" => "json",
        "yml" | "yaml" => "yaml",
        _ => return None,
    };
    Some(canonical)
}

/// Language of a snippet: the fence hint when recognised, else the
/// language whose patterns match most often, else `text`
pub fn detect_language(code: &str, hint: Option<&str>) -> String {
    if let Some(lang) = hint.and_then(normalize_hint) {
        return lang.to_string();
    }

    let mut best: Option<(&str, usize)> = None;
    for (lang, patterns) in language_patterns() {
        let score = patterns.iter().filter(|re| re.is_match(code)).count();
        if score > 0 && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((*lang, score));
        }
    }
    best.map(|(lang, _)| lang).unwrap_or("text").to_string()
}

#[derive(Debug, Clone, PartialEq)]
struct CodeBlock {
    code: String,
    language: String,
}

fn fenced_blocks(content: &str) -> Vec<CodeBlock> {
    let Some(fenced) = fenced_block() else {
        return Vec::new();
    };
    fenced
        .captures_iter(content)
        .filter_map(|caps| {
            let code = caps.get(2)?.as_str().trim();
            if code.is_empty() {
                return None;
            }
            let hint = caps.get(1).map(|m| m.as_str());
            Some(CodeBlock {
                code: code.to_string(),
                language: detect_language(code, hint),
            })
        })
        .collect()
}

fn indented_blocks(content: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        let code = current.join("\n").trim().to_string();
        if code.len() > MIN_INDENTED_LEN {
            blocks.push(CodeBlock {
                language: detect_language(&code, None),
                code,
            });
        }
        current.clear();
    };

    for line in content.lines() {
        if let Some(stripped) = line.strip_prefix("    ").or_else(|| line.strip_prefix('\t')) {
            current.push(stripped);
        } else if !current.is_empty() {
            flush(&mut current);
        }
    }
    if !current.is_empty() {
        flush(&mut current);
    }
    blocks
}

/// Code blocks in a chunk; indented blocks only count when nothing is fenced
fn extract_blocks(content: &str) -> Vec<CodeBlock> {
    let fenced = fenced_blocks(content);
    if fenced.is_empty() {
        indented_blocks(content)
    } else {
        fenced
    }
}

fn relevance(block: &CodeBlock, query_words: &[String], target_language: &str) -> u32 {
    let mut score = 0;
    if block.language == target_language {
        score += 10;
    }
    let code = block.code.to_lowercase();
    score += 2 * query_words.iter().filter(|w| code.contains(w.as_str())).count() as u32;
    if block.code.len() > 100 {
        score += 1;
    }
    if block.code.len() > 300 {
        score += 2;
    }
    score
}

/// The last sentence before the code in its chunk
fn describe(code: &str, content: &str) -> String {
    let preceding = match content.find(code) {
        Some(idx) if idx > 0 => {
            let before = &content[..idx];
            // Drop this block's opening fence, then anything up to the previous block
            let before = before.rfind("```").map(|i| &before[..i]).unwrap_or(before);
            before.rsplit("```").next().unwrap_or_default()
        }
        _ => "",
    };
    let sentence = preceding
        .split_inclusive(|c: char| matches!(c, '.' | '!' | '?'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or_default()
        .trim_end_matches(':');

    if sentence.is_empty() {
        return "Code example".to_string();
    }
    if sentence.chars().count() > DESCRIPTION_CHARS {
        let cut: String = sentence.chars().take(DESCRIPTION_CHARS - 3).collect();
        return format!("{cut}...");
    }
    sentence.to_string()
}

/// Rank code from `chunks` for `query`, best first
pub fn extract_examples(
    query: &str,
    chunks: &[DocumentChunk],
    target_language: &str,
    limit: usize,
) -> Vec<CodeExample> {
    let query_words: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    let target_language = target_language.to_lowercase();

    let mut ranked: Vec<(u32, CodeBlock, &DocumentChunk)> = chunks
        .iter()
        .flat_map(|chunk| {
            extract_blocks(&chunk.content)
                .into_iter()
                .map(move |block| (block, chunk))
        })
        .map(|(block, chunk)| (relevance(&block, &query_words, &target_language), block, chunk))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    ranked
        .into_iter()
        .take(limit)
        .map(|(_, block, chunk)| CodeExample {
            description: describe(&block.code, &chunk.content),
            code: block.code,
            language: block.language,
            source_project: chunk.project_name.clone(),
        })
        .collect()
}

/// In-process code-extraction collaborator
#[derive(Debug, Clone)]
pub struct CodeExtractor {
    max_examples: usize,
}

impl CodeExtractor {
    pub fn new() -> Self {
        Self {
            max_examples: MAX_EXAMPLES,
        }
    }

    pub fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = max_examples;
        self
    }
}

impl Default for CodeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collaborator for CodeExtractor {
    type Request = CodeExtractionRequest;
    type Response = CodeExtractionResponse;

    fn kind(&self) -> CollaboratorKind {
        CollaboratorKind::CodeExtraction
    }

    async fn call(&self, request: CodeExtractionRequest) -> anyhow::Result<CodeExtractionResponse> {
        let examples = extract_examples(
            &request.query,
            &request.chunks,
            &request.target_language,
            self.max_examples,
        );
        tracing::debug!(
            correlation_id = %request.correlation_id,
            examples = examples.len(),
            "Extracted code examples"
        );
        Ok(CodeExtractionResponse {
            correlation_id: request.correlation_id,
            examples,
        })
    }
}
