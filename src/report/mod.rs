//! report document model & output
//!
//! A [`Document`] is built once per run and rendered by one of the format
//! modules. Nothing touches the output path until rendering is complete: the
//! file is swapped in from a temp file in the same directory.

pub mod docx;
pub mod html;
pub mod paged;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::{OutputConfig, ReportFormat};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Align {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub cells: Vec<String>,
    pub bold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub caption: Option<String>,
    /// spanning headers over the column headers: (label, columns spanned)
    pub groups: Vec<(String, usize)>,
    pub headers: Vec<String>,
    pub align: Vec<Align>,
    pub rows: Vec<TableRow>,
}

impl Table {
    /// first column left aligned, the rest right aligned
    pub fn new(headers: Vec<String>) -> Self {
        let align = (0..headers.len())
            .map(|i| if i == 0 { Align::Left } else { Align::Right })
            .collect();
        Self {
            caption: None,
            groups: Vec::new(),
            headers,
            align,
            rows: Vec::new(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_groups(mut self, groups: Vec<(String, usize)>) -> Self {
        self.groups = groups;
        self
    }

    pub fn push_row(&mut self, cells: Vec<String>, bold: bool) {
        self.rows.push(TableRow { cells, bold });
    }

    pub fn align(&self, column: usize) -> Align {
        self.align.get(column).copied().unwrap_or(Align::Left)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub id: String,
    pub caption: String,
    #[serde(skip)]
    pub svg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum Block {
    Paragraph(String),
    Table(Table),
    Figure(Figure),
    Preformatted(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub level: u8,
    pub title: String,
    pub id: String,
    pub blocks: Vec<Block>,
}

impl Section {
    pub fn new(level: u8, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            level: level.clamp(1, 3),
            id: slug(&title),
            title,
            blocks: Vec::new(),
        }
    }

    pub fn paragraph(mut self, text: impl Into<String>) -> Self {
        self.blocks.push(Block::Paragraph(text.into()));
        self
    }

    pub fn table(mut self, table: Table) -> Self {
        self.blocks.push(Block::Table(table));
        self
    }

    pub fn figure(mut self, id: impl Into<String>, caption: impl Into<String>, svg: String) -> Self {
        self.blocks.push(Block::Figure(Figure {
            id: id.into(),
            caption: caption.into(),
            svg,
        }));
        self
    }

    pub fn preformatted(mut self, text: impl Into<String>) -> Self {
        self.blocks.push(Block::Preformatted(text.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub title: String,
    pub author: Option<String>,
    pub date: Option<String>,
    pub sections: Vec<Section>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: None,
            date: None,
            sections: Vec::new(),
        }
    }

    pub fn push(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub fn figures(&self) -> impl Iterator<Item = &Figure> {
        self.sections.iter().flat_map(|s| &s.blocks).filter_map(|b| match b {
            Block::Figure(f) => Some(f),
            _ => None,
        })
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.sections.iter().flat_map(|s| &s.blocks).filter_map(|b| match b {
            Block::Table(t) => Some(t),
            _ => None,
        })
    }

    /// sections at or above `depth`, for a table of contents
    pub fn outline(&self, depth: u8) -> Vec<&Section> {
        self.sections.iter().filter(|s| s.level <= depth).collect()
    }
}

/// lowercase, alphanumerics kept, runs of anything else become one '-'
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// the output file's bytes
pub fn render(document: &Document, options: &OutputConfig) -> Result<Vec<u8>> {
    Ok(match options.format {
        ReportFormat::Html => html::render(document, options).into_bytes(),
        ReportFormat::Paged => paged::render(document, options).into_bytes(),
        ReportFormat::Docx => docx::render(document, options)?,
    })
}

/// render & write; the output file only appears once everything succeeded
pub fn write_report(document: &Document, options: &OutputConfig, output: &Path) -> Result<PathBuf> {
    let bytes = render(document, options)?;
    if let Some(dir) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    write_atomic(output, &bytes)?;
    tracing::info!(
        path = %output.display(),
        bytes = bytes.len(),
        format = ?options.format,
        "wrote report"
    );
    Ok(output.to_path_buf())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
