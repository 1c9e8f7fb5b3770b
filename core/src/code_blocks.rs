use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const FENCE: &str = "```";
const SUPPORTED_LANGUAGES: [&str; 8] = ["tsx", "jsx", "typescript", "javascript", "ts", "js", "html", "css"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Prose(String),
    Code {
        language: Option<String>,
        code: String,
    },
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Self::Prose(text) => text,
            Self::Code { code, .. } => code,
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self, Self::Code { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
    pub is_component: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
}

enum ScanState {
    InProse,
    InFence {
        language: Option<String>,
        open_start: usize,
        body_start: usize,
    },
}

/// Ordered prose and code segments covering `text`, fence lines excluded.
pub fn segments(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut state = ScanState::InProse;
    let mut prose_start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let start = offset;
        let end = offset + line.len();
        offset = end;
        let bare = line.trim_end_matches(['\n', '\r']);

        match &state {
            ScanState::InProse => {
                if let Some(language) = opening_fence(bare) {
                    push_prose(&mut out, &text[prose_start..start]);
                    state = ScanState::InFence {
                        language,
                        open_start: start,
                        body_start: end,
                    };
                }
            }
            ScanState::InFence {
                language,
                body_start,
                ..
            } => {
                if bare.trim_end() == FENCE {
                    out.push(Segment::Code {
                        language: language.clone(),
                        code: text[*body_start..start].to_string(),
                    });
                    prose_start = end;
                    state = ScanState::InProse;
                }
            }
        }
    }

    match state {
        ScanState::InProse => push_prose(&mut out, &text[prose_start..]),
        // Still open: everything from the opening marker on is prose for now.
        ScanState::InFence { open_start, .. } => {
            push_prose(&mut out, &text[prose_start..open_start]);
            push_prose(&mut out, &text[open_start..]);
        }
    }
    out
}

fn opening_fence(line: &str) -> Option<Option<String>> {
    let tag = line.trim_end().strip_prefix(FENCE)?;
    if tag.chars().any(|ch| ch.is_whitespace() || ch == '`') {
        return None;
    }
    Some((!tag.is_empty()).then(|| tag.to_string()))
}

fn push_prose(out: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Prose(previous)) = out.last_mut() {
        previous.push_str(text);
    } else {
        out.push(Segment::Prose(text.to_string()));
    }
}

/// Code blocks in supported web languages, classified.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    segments(text)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Code { language, code } => {
                let language = language
                    .unwrap_or_else(|| "typescript".to_string())
                    .to_ascii_lowercase();
                if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
                    return None;
                }
                Some(classify(normalize_language(&language), code.trim()))
            }
            Segment::Prose(_) => None,
        })
        .collect()
}

pub fn classify(language: &str, code: &str) -> CodeBlock {
    let is_component = is_component_like(code);
    CodeBlock {
        language: language.to_string(),
        code: code.to_string(),
        is_component,
        component_name: if is_component {
            component_name(code)
        } else {
            None
        },
    }
}

fn normalize_language(language: &str) -> &'static str {
    match language {
        "ts" | "typescript" => "typescript",
        "js" | "javascript" => "javascript",
        "jsx" => "jsx",
        "html" => "html",
        "css" => "css",
        _ => "tsx",
    }
}

struct Heuristics {
    signals: [Regex; 4],
    names: [Regex; 3],
}

fn heuristics() -> &'static Heuristics {
    static HEURISTICS: OnceLock<Heuristics> = OnceLock::new();
    HEURISTICS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("component heuristic pattern");
        Heuristics {
            signals: [
                compile(r"<[A-Z][\w.]*"),
                compile(r"\bexport\s+(?:default\s+function|const)\b"),
                compile(r"(?s)(?:\bfunction\b[^{]*|=>\s*)\{.*\breturn\s*\("),
                compile(
                    r#"\bimport\b[^;]*?\bfrom\s*['"](?:react|react-dom|preact|solid-js|vue|svelte|next)(?:/[^'"]*)?['"]"#,
                ),
            ],
            names: [
                compile(r"\bexport\s+default\s+function\s+([A-Za-z_$][\w$]*)"),
                compile(r"\bexport\s+const\s+([A-Za-z_$][\w$]*)"),
                compile(r"\bfunction\s+([A-Za-z_$][\w$]*)"),
            ],
        }
    })
}

/// Any single structural signal is enough; false positives only cost a
/// preview button.
pub fn is_component_like(code: &str) -> bool {
    heuristics().signals.iter().any(|signal| signal.is_match(code))
}

pub fn component_name(code: &str) -> Option<String> {
    heuristics().names.iter().find_map(|pattern| {
        pattern
            .captures(code)
            .and_then(|captures| captures.get(1))
            .map(|name| name.as_str().to_string())
    })
}

pub fn should_show_playground(text: &str) -> bool {
    extract_code_blocks(text)
        .iter()
        .any(|block| block.is_component)
}

/// The first component block, or the first block of any kind.
pub fn primary_code_block(text: &str) -> Option<CodeBlock> {
    let blocks = extract_code_blocks(text);
    blocks
        .iter()
        .position(|block| block.is_component)
        .or(if blocks.is_empty() { None } else { Some(0) })
        .map(|idx| blocks[idx].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejoin(segments: &[Segment]) -> String {
        segments.iter().map(Segment::text).collect()
    }

    #[test]
    fn plain_text_is_one_prose_segment() {
        assert_eq!(
            segments("just words\nmore words"),
            vec![Segment::Prose("just words\nmore words".into())]
        );
        assert!(segments("").is_empty());
    }

    #[test]
    fn segments_preserve_order_and_content() {
        let input = "Here you go:\n```tsx\nconst a = 1;\n```\nAnd css:\n```css\n.x { color: red; }\n```\nDone.";
        let parts = segments(input);
        assert_eq!(parts.len(), 5);
        assert_eq!(
            parts[1],
            Segment::Code {
                language: Some("tsx".into()),
                code: "const a = 1;\n".into()
            }
        );
        assert_eq!(parts[4], Segment::Prose("Done.".into()));
        assert_eq!(
            rejoin(&parts),
            "Here you go:\nconst a = 1;\nAnd css:\n.x { color: red; }\nDone."
        );
    }

    #[test]
    fn unterminated_fence_is_prose() {
        let input = "hello ```tsx\nconst x = 1;";
        assert_eq!(segments(input), vec![Segment::Prose(input.into())]);

        let at_line_start = "intro\n```tsx\nconst x = 1;";
        assert_eq!(
            segments(at_line_start),
            vec![Segment::Prose(at_line_start.into())]
        );
    }

    #[test]
    fn growing_prefix_only_yields_closed_blocks() {
        let full = "a\n```tsx\nexport default function A() { return (<div/>); }\n```\nb";
        let mut seen_code = false;
        for end in 0..=full.len() {
            if !full.is_char_boundary(end) {
                continue;
            }
            let parts = segments(&full[..end]);
            let has_code = parts.iter().any(Segment::is_code);
            assert!(!seen_code || has_code, "code block vanished at {end}");
            seen_code |= has_code;
        }
        assert!(seen_code);
    }

    #[test]
    fn fence_markers_must_start_the_line() {
        let input = "use ``` inline\nand ```tsx too";
        assert_eq!(segments(input), vec![Segment::Prose(input.into())]);
        // A tag separated by whitespace is not an opening fence.
        let spaced = "``` tsx\nx\n```";
        assert_eq!(segments(spaced), vec![Segment::Prose(spaced.into())]);
    }

    #[test]
    fn crlf_fences_are_accepted() {
        let parts = segments("```css\r\n.a {}\r\n```\r\ntail");
        assert_eq!(
            parts,
            vec![
                Segment::Code {
                    language: Some("css".into()),
                    code: ".a {}\r\n".into()
                },
                Segment::Prose("tail".into())
            ]
        );
    }

    #[test]
    fn component_signals() {
        assert!(is_component_like(
            "export default function Foo() { return (<div/>); }"
        ));
        assert!(!is_component_like("const x = 1 + 2;"));
        assert!(is_component_like("const App = () => <Layout />;"));
        assert!(is_component_like("import { useState } from 'react';"));
        assert!(is_component_like(
            "function card() {\n  return (\n    <div/>\n  );\n}"
        ));
    }

    #[test]
    fn component_name_priority() {
        assert_eq!(
            component_name("function helper() {}\nexport default function Page() {}").as_deref(),
            Some("Page")
        );
        assert_eq!(
            component_name("export const Button = () => null;").as_deref(),
            Some("Button")
        );
        assert_eq!(component_name("function Card() {}").as_deref(), Some("Card"));
        assert_eq!(component_name("const x = 1;"), None);
    }

    #[test]
    fn extraction_filters_and_normalizes_languages() {
        let input = "```ts\nconst n: number = 1;\n```\n```bash\nnpm i\n```\n```\nexport const Hero = () => null;\n```";
        let blocks = extract_code_blocks(input);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language, "typescript");
        assert!(!blocks[0].is_component);
        assert_eq!(blocks[1].component_name.as_deref(), Some("Hero"));
    }

    #[test]
    fn primary_block_prefers_components() {
        let input = "```css\n.a{}\n```\n```tsx\nexport default function Btn(){return <button>Hi</button>;}\n```";
        let primary = primary_code_block(input).expect("block");
        assert_eq!(primary.component_name.as_deref(), Some("Btn"));
        assert!(should_show_playground(input));
        assert!(primary_code_block("no code").is_none());
    }
}
