//! print-ready html: paged-media css with page size, margins & running strings

use std::fmt::Write as _;

use super::html::{body_html, theme_css};
use super::Document;
use crate::config::{OutputConfig, PageOptions};
use crate::plot::escape;

/// css string literal, quotes & backslashes escaped
fn css_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push(' '),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn page_css(page: &PageOptions, title: &str) -> String {
    let header = page.header.as_deref().unwrap_or(title);
    let mut css = String::new();
    let _ = write!(
        css,
        r#"
@page {{
  size: {size};
  margin: {margin}mm;
  @top-center {{ content: {header}; font-size: 9pt; color: #666; }}
  @bottom-right {{ content: counter(page) " / " counter(pages); font-size: 9pt; }}
"#,
        size = page.size.css(),
        margin = page.margin_mm,
        header = css_string(header),
    );
    if let Some(footer) = &page.footer {
        let _ = writeln!(css, "  @bottom-left {{ content: {}; font-size: 9pt; }}", css_string(footer));
    }
    css.push_str("}\n");
    css.push_str(
        r#"@page :first { @top-center { content: none; } }
body { margin: 0; font-size: 10.5pt; line-height: 1.4; }
section.level1 { break-before: page; }
table, figure { break-inside: avoid; }
h1, h2, h3 { break-after: avoid; }
table { border-collapse: collapse; margin: 8pt 0 12pt; font-size: 9pt; }
caption { caption-side: top; text-align: left; font-weight: bold; padding-bottom: 4pt; }
th, td { padding: 2pt 6pt; }
thead tr:last-child th { border-bottom: 1.5pt solid #444; }
thead th.group { border-bottom: 0.75pt solid #999; text-align: center; }
tbody tr.bold td { font-weight: bold; }
tbody tr:last-child td { border-bottom: 0.75pt solid #444; }
figure { margin: 8pt 0; }
figure svg { width: 100%; height: auto; }
figcaption { font-size: 9pt; color: #555; }
pre { font-size: 8.5pt; white-space: pre-wrap; }
.title-block { text-align: center; margin-bottom: 24pt; }
"#,
    );
    css
}

pub fn render(document: &Document, options: &OutputConfig) -> String {
    let mut css = page_css(&options.page, &document.title);
    css.push_str(theme_css(options.theme));

    // static contents list, no floating sidebar on paper
    let mut toc = String::new();
    if options.toc.enabled {
        toc.push_str("<nav class=\"toc\"><h2>Contents</h2>\n<ol>\n");
        for section in document.outline(options.toc.depth) {
            let _ = writeln!(
                toc,
                r##"<li class="level-{}"><a href="#{}">{}</a></li>"##,
                section.level,
                section.id,
                escape(&section.title)
            );
        }
        toc.push_str("</ol>\n</nav>\n");
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>{css}</style>
</head>
<body>
{toc}{body}</body>
</html>
"#,
        title = escape(&document.title),
        body = body_html(document),
    )
}
