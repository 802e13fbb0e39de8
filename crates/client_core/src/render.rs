//! Client-side acceptance of returned Mermaid source.

use thiserror::Error;

const DIAGRAM_KEYWORDS: &[&str] = &[
    "flowchart",
    "graph",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram-v2",
    "stateDiagram",
    "erDiagram",
    "gantt",
    "pie",
    "journey",
    "mindmap",
    "timeline",
    "gitGraph",
    "quadrantChart",
    "requirementDiagram",
    "C4Context",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("diagram source is empty")]
    Empty,
    #[error("unrecognised diagram type in line '{0}'")]
    UnknownDiagramType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDiagram {
    pub kind: String,
    pub source: String,
}

pub fn render_mermaid(source: &str) -> Result<RenderedDiagram, RenderError> {
    let header = first_meaningful_line(source).ok_or(RenderError::Empty)?;
    let keyword = header.split_whitespace().next().unwrap_or_default();
    let kind = DIAGRAM_KEYWORDS
        .iter()
        .find(|known| **known == keyword)
        .ok_or_else(|| RenderError::UnknownDiagramType(header.to_string()))?;

    Ok(RenderedDiagram {
        kind: (*kind).to_string(),
        source: source.to_string(),
    })
}

/// Skips blank lines, `%%` comments and a leading `---` front-matter block.
fn first_meaningful_line(source: &str) -> Option<&str> {
    let mut lines = source.lines().map(str::trim).peekable();
    if lines.peek() == Some(&"---") {
        lines.next();
        for line in lines.by_ref() {
            if line == "---" {
                break;
            }
        }
    }
    lines.find(|line| !line.is_empty() && !line.starts_with("%%"))
}
