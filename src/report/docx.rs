//! word-processor output: a .docx with native tables and the figures as png

use std::io::Cursor;

use docx_rs::{
    AlignmentType, BreakType, Docx, Footer, Header, PageMargin, Paragraph, Pic, Run, RunFonts, Style, StyleType,
    Table as DocxTable, TableCell, TableRow as DocxRow,
};
use resvg::{tiny_skia, usvg};

use super::{Align, Block, Document, Figure, Table};
use crate::config::OutputConfig;
use crate::error::{Result, SurvError};

/// pixels per css pixel when rasterizing figures
const RASTER_SCALE: f32 = 2.0;
const EMU_PER_PX: u32 = 9_525;
/// widest a figure may be on the page, 6 inches
const MAX_FIGURE_EMU: u32 = 5_486_400;
const TWIPS_PER_MM: f64 = 56.692_9;

/// a rasterized figure: png bytes plus pixel and display sizes
#[derive(Debug)]
pub(crate) struct Raster {
    pub png: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    /// display size in css pixels
    pub css_size: (f32, f32),
}

pub(crate) fn rasterize(svg: &str) -> Result<Raster> {
    let mut options = usvg::Options::default();
    options.fontdb_mut().load_system_fonts();
    let tree = usvg::Tree::from_str(svg, &options).map_err(SurvError::render)?;

    let size = tree.size();
    let width_px = (size.width() * RASTER_SCALE).ceil() as u32;
    let height_px = (size.height() * RASTER_SCALE).ceil() as u32;
    let mut pixmap = tiny_skia::Pixmap::new(width_px, height_px)
        .ok_or_else(|| SurvError::render(format!("figure of {width_px}x{height_px} px")))?;
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(RASTER_SCALE, RASTER_SCALE),
        &mut pixmap.as_mut(),
    );
    let png = pixmap.encode_png().map_err(SurvError::render)?;

    Ok(Raster {
        png,
        width_px,
        height_px,
        css_size: (size.width(), size.height()),
    })
}

fn styles(docx: Docx) -> Docx {
    docx.add_style(Style::new("Title", StyleType::Paragraph).name("Title").size(40).bold())
        .add_style(Style::new("Heading1", StyleType::Paragraph).name("Heading 1").size(32).bold().color("2C3E50"))
        .add_style(Style::new("Heading2", StyleType::Paragraph).name("Heading 2").size(26).bold().color("2C3E50"))
        .add_style(Style::new("Heading3", StyleType::Paragraph).name("Heading 3").size(22).bold().color("2C3E50"))
        .add_style(Style::new("Caption", StyleType::Paragraph).name("Caption").size(18).italic())
}

fn text(content: &str) -> Paragraph {
    Paragraph::new().add_run(Run::new().add_text(content))
}

fn cell(content: &str, bold: bool, align: Align) -> TableCell {
    let run = if bold { Run::new().add_text(content).bold() } else { Run::new().add_text(content) };
    let align = match align {
        Align::Left => AlignmentType::Left,
        Align::Right => AlignmentType::Right,
        Align::Center => AlignmentType::Center,
    };
    TableCell::new().add_paragraph(Paragraph::new().add_run(run).align(align))
}

fn table_docx(table: &Table) -> DocxTable {
    let mut rows = Vec::with_capacity(table.rows.len() + 2);

    if !table.groups.is_empty() {
        let groups = table
            .groups
            .iter()
            .map(|(label, span)| cell(label, true, Align::Center).grid_span(*span))
            .collect();
        rows.push(DocxRow::new(groups));
    }

    let headers = table
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| cell(h, true, table.align(i)))
        .collect();
    rows.push(DocxRow::new(headers));

    for row in &table.rows {
        let cells = row
            .cells
            .iter()
            .enumerate()
            .map(|(i, c)| cell(c, row.bold, table.align(i)))
            .collect();
        rows.push(DocxRow::new(cells));
    }
    DocxTable::new(rows)
}

fn figure_docx(figure: &Figure) -> Result<Paragraph> {
    let raster = rasterize(&figure.svg)?;
    let (w, h) = raster.css_size;
    let mut width_emu = (w.round() as u32).saturating_mul(EMU_PER_PX);
    let mut height_emu = (h.round() as u32).saturating_mul(EMU_PER_PX);
    if width_emu > MAX_FIGURE_EMU {
        height_emu = (f64::from(height_emu) * f64::from(MAX_FIGURE_EMU) / f64::from(width_emu)) as u32;
        width_emu = MAX_FIGURE_EMU;
    }

    let pic = Pic::new_with_dimensions(raster.png, raster.width_px, raster.height_px).size(width_emu, height_emu);
    Ok(Paragraph::new().add_run(Run::new().add_image(pic)).align(AlignmentType::Center))
}

fn preformatted(content: &str) -> Paragraph {
    let mut run = Run::new().fonts(RunFonts::new().ascii("Courier New")).size(17);
    for (i, line) in content.lines().enumerate() {
        if i > 0 {
            run = run.add_break(BreakType::TextWrapping);
        }
        run = run.add_text(line);
    }
    Paragraph::new().add_run(run)
}

fn build(document: &Document, options: &OutputConfig) -> Result<Docx> {
    let page = &options.page;
    let (width, height) = page.size.twips();
    let margin = (page.margin_mm * TWIPS_PER_MM).round() as i32;
    let header_text = page.header.as_deref().unwrap_or(&document.title);

    let mut docx = styles(Docx::new())
        .page_size(width, height)
        .page_margin(PageMargin::new().top(margin).bottom(margin).left(margin).right(margin))
        .header(Header::new().add_paragraph(text(header_text).align(AlignmentType::Center)))
        .add_paragraph(text(&document.title).style("Title"));
    if let Some(footer) = &page.footer {
        docx = docx.footer(Footer::new().add_paragraph(text(footer)));
    }

    let byline: Vec<&str> = [document.author.as_deref(), document.date.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !byline.is_empty() {
        docx = docx.add_paragraph(text(&byline.join(" - ")));
    }

    if options.toc.enabled {
        docx = docx.add_paragraph(text("Contents").style("Heading1"));
        for section in document.outline(options.toc.depth) {
            let indent = "    ".repeat(usize::from(section.level - 1));
            docx = docx.add_paragraph(text(&format!("{indent}{}", section.title)));
        }
    }

    for section in &document.sections {
        let heading = text(&section.title).style(&format!("Heading{}", section.level));
        docx = if section.level == 1 {
            docx.add_paragraph(Paragraph::new().add_run(Run::new().add_break(BreakType::Page)))
                .add_paragraph(heading)
        } else {
            docx.add_paragraph(heading)
        };

        for block in &section.blocks {
            docx = match block {
                Block::Paragraph(content) => docx.add_paragraph(text(content)),
                Block::Table(table) => match &table.caption {
                    Some(caption) => docx.add_paragraph(text(caption).style("Caption")),
                    None => docx,
                }
                .add_table(table_docx(table)),
                Block::Figure(figure) => docx
                    .add_paragraph(figure_docx(figure)?)
                    .add_paragraph(text(&figure.caption).style("Caption")),
                Block::Preformatted(content) => docx.add_paragraph(preformatted(content)),
            };
        }
    }
    Ok(docx)
}

/// the packed .docx archive
pub fn render(document: &Document, options: &OutputConfig) -> Result<Vec<u8>> {
    let docx = build(document, options)?;
    let mut out = Cursor::new(Vec::new());
    docx.build().pack(&mut out).map_err(SurvError::render)?;
    Ok(out.into_inner())
}
