//! self-contained html page, figures inlined as svg

use std::fmt::Write as _;

use super::{Align, Block, Document, Table};
use crate::config::{OutputConfig, Theme};
use crate::plot::escape;

const BASE_CSS: &str = r#"
body { margin: 0; line-height: 1.5; color: #222; }
main { max-width: 980px; margin: 0 auto; padding: 24px; }
table { border-collapse: collapse; margin: 12px 0 20px; font-size: 0.9em; }
caption { caption-side: top; text-align: left; font-weight: bold; padding-bottom: 6px; }
th, td { padding: 3px 10px; }
thead tr:last-child th { border-bottom: 2px solid #444; }
thead th.group { border-bottom: 1px solid #999; text-align: center; }
tbody tr.bold td { font-weight: bold; }
tbody tr:last-child td { border-bottom: 1px solid #444; }
figure { margin: 16px 0; overflow-x: auto; }
figure svg { max-width: 100%; height: auto; }
figcaption { font-size: 0.9em; color: #555; }
pre { background: #f6f6f6; padding: 10px; overflow-x: auto; font-size: 0.85em; }
nav.toc ul { list-style: none; padding-left: 1em; }
nav.toc li.level-2 { padding-left: 1em; }
nav.toc li.level-3 { padding-left: 2em; }
.meta { color: #666; }
"#;

const FLOAT_CSS: &str = r#"
.layout { display: grid; grid-template-columns: 240px 1fr; }
nav.toc { position: sticky; top: 0; align-self: start; max-height: 100vh; overflow-y: auto;
          padding: 24px 8px; border-right: 1px solid #ddd; font-size: 0.9em; }
"#;

pub(crate) fn theme_css(theme: Theme) -> &'static str {
    match theme {
        Theme::Flatly => {
            r#"
body { font-family: "Lato", "Helvetica Neue", Arial, sans-serif; }
h1, h2, h3 { color: #2c3e50; }
a { color: #18bc9c; }
"#
        }
        Theme::Journal => {
            r#"
body { font-family: Georgia, "Times New Roman", serif; }
h1, h2, h3 { font-family: "News Cycle", "Arial Narrow", Arial, sans-serif; color: #000; }
a { color: #eb6864; }
"#
        }
        Theme::Plain => "body { font-family: sans-serif; }\n",
    }
}

fn align_css(align: Align) -> &'static str {
    match align {
        Align::Left => "left",
        Align::Right => "right",
        Align::Center => "center",
    }
}

pub(crate) fn table_html(table: &Table) -> String {
    let mut out = String::from("<table>\n");
    if let Some(caption) = &table.caption {
        let _ = writeln!(out, "<caption>{}</caption>", escape(caption));
    }
    out.push_str("<thead>\n");
    if !table.groups.is_empty() {
        out.push_str("<tr>");
        for (label, span) in &table.groups {
            let class = if label.is_empty() { "" } else { r#" class="group""# };
            let _ = write!(out, r#"<th colspan="{span}"{class}>{}</th>"#, escape(label));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("<tr>");
    for (i, header) in table.headers.iter().enumerate() {
        let _ = write!(out, r#"<th style="text-align:{}">{}</th>"#, align_css(table.align(i)), escape(header));
    }
    out.push_str("</tr>\n</thead>\n<tbody>\n");
    for row in &table.rows {
        out.push_str(if row.bold { r#"<tr class="bold">"# } else { "<tr>" });
        for (i, cell) in row.cells.iter().enumerate() {
            let _ = write!(out, r#"<td style="text-align:{}">{}</td>"#, align_css(table.align(i)), escape(cell));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n");
    out
}

/// title block + every section, shared with the paged renderer
pub(crate) fn body_html(document: &Document) -> String {
    let mut out = String::new();
    let _ = writeln!(out, r#"<header class="title-block"><h1 class="title">{}</h1>"#, escape(&document.title));
    if let Some(author) = &document.author {
        let _ = writeln!(out, r#"<p class="meta author">{}</p>"#, escape(author));
    }
    if let Some(date) = &document.date {
        let _ = writeln!(out, r#"<p class="meta date">{}</p>"#, escape(date));
    }
    out.push_str("</header>\n");

    for section in &document.sections {
        let h = section.level + 1;
        let _ = writeln!(
            out,
            r#"<section id="{id}" class="level{level}"><h{h}>{title}</h{h}>"#,
            id = section.id,
            level = section.level,
            title = escape(&section.title)
        );
        for block in &section.blocks {
            match block {
                Block::Paragraph(text) => {
                    let _ = writeln!(out, "<p>{}</p>", escape(text));
                }
                Block::Table(table) => out.push_str(&table_html(table)),
                Block::Figure(figure) => {
                    let _ = writeln!(
                        out,
                        "<figure id=\"fig-{}\">\n{}<figcaption>{}</figcaption>\n</figure>",
                        figure.id,
                        figure.svg,
                        escape(&figure.caption)
                    );
                }
                Block::Preformatted(text) => {
                    let _ = writeln!(out, "<pre>{}</pre>", escape(text));
                }
            }
        }
        out.push_str("</section>\n");
    }
    out
}

fn toc_html(document: &Document, depth: u8) -> String {
    let mut out = String::from("<nav class=\"toc\">\n<ul>\n");
    for section in document.outline(depth) {
        let _ = writeln!(
            out,
            r##"<li class="level-{}"><a href="#{}">{}</a></li>"##,
            section.level,
            section.id,
            escape(&section.title)
        );
    }
    out.push_str("</ul>\n</nav>\n");
    out
}

pub fn render(document: &Document, options: &OutputConfig) -> String {
    let toc = &options.toc;
    let floating = toc.enabled && toc.float;

    let mut css = String::from(BASE_CSS);
    css.push_str(theme_css(options.theme));
    if floating {
        css.push_str(FLOAT_CSS);
    }

    let body = body_html(document);
    let nav = if toc.enabled { toc_html(document, toc.depth) } else { String::new() };
    let content = if floating {
        format!("<div class=\"layout\">\n{nav}<main>\n{body}</main>\n</div>")
    } else {
        format!("<main>\n{nav}{body}</main>")
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>{css}</style>
</head>
<body>
{content}
</body>
</html>
"#,
        title = escape(&document.title),
    )
}
