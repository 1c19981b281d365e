//! Text clean-up applied before any pattern matching.
//!
//! Bank alerts arrive as HTML or plain text, frequently re-encoded along the
//! way, and the label/value pairs the extractors look for are often split
//! over several lines. [`normalize`] produces one `Label: value` pair per
//! line with the encoding repaired.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node};

/// Labels of a single-transaction alert, in canonical spelling.
pub const ALERT_LABELS: [&str; 5] = [
    "Fecha",
    "Hora",
    "Valor Transacción",
    "Clase de Movimiento",
    "Lugar de Transacción",
];

const CLASS_LABEL: &str = "Clase de Movimiento";

const SKIPPED_ELEMENTS: [&str; 4] = ["head", "style", "script", "title"];

const BLOCK_ELEMENTS: [&str; 14] = [
    "p", "div", "tr", "li", "ul", "ol", "table", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
];

const CELL_ELEMENTS: [&str; 2] = ["td", "th"];

/// UTF-8 read as Windows-1252 or Mac Roman, as seen in forwarded alerts.
const MOJIBAKE: [(&str, &str); 26] = [
    ("Ã¡", "á"),
    ("Ã©", "é"),
    ("Ã\u{ad}", "í"),
    ("Ã³", "ó"),
    ("Ãº", "ú"),
    ("Ã±", "ñ"),
    ("Ã¼", "ü"),
    ("Ã\u{81}", "Á"),
    ("Ã‰", "É"),
    ("Ã\u{8d}", "Í"),
    ("Ã“", "Ó"),
    ("Ãš", "Ú"),
    ("Ã‘", "Ñ"),
    ("√°", "á"),
    ("√©", "é"),
    ("√≠", "í"),
    ("√≥", "ó"),
    ("√∫", "ú"),
    ("√±", "ñ"),
    ("Â\u{a0}", " "),
    ("Â¿", "¿"),
    ("Â¡", "¡"),
    ("\u{a0}", " "),
    ("\u{200b}", ""),
    ("\r\n", "\n"),
    ("\r", "\n"),
];

static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

static LABEL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(fecha|hora|valor\s+(?:de\s+la\s+)?transacci[oó]n|clase\s+de\s+movimiento|lugar\s+de\s+transacci[oó]n)\s*:\s*(.*)$",
    )
    .expect("valid label regex")
});

/// Full normalization for label-based alerts.
pub fn normalize(raw: &str) -> String {
    let repaired = repair_encoding(raw);
    let text = if looks_like_html(&repaired) {
        strip_markup(&repaired)
    } else {
        repaired
    };
    join_label_lines(clean_lines(&text)).join("\n")
}

/// Encoding repair plus per-line whitespace collapsing, without label
/// handling. Suitable for statement text where layout columns matter only
/// as separators.
pub fn normalize_document(raw: &str) -> String {
    clean_lines(&repair_encoding(raw)).join("\n")
}

pub fn repair_encoding(raw: &str) -> String {
    let mut text = raw.to_string();
    for (broken, fixed) in MOJIBAKE {
        if text.contains(broken) {
            text = text.replace(broken, fixed);
        }
    }
    text
}

fn looks_like_html(text: &str) -> bool {
    ANY_TAG.is_match(text) && (text.contains("</") || text.contains("/>") || text.contains("<br"))
}

/// Text content of an HTML body with entities decoded. Block elements and
/// `<br>` become line breaks; `head`, `style` and `script` are dropped.
pub fn strip_markup(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::with_capacity(html.len() / 2);
    collect_text(document.root_element(), &mut text);
    text
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let Some(child_element) = ElementRef::wrap(child) else {
                    continue;
                };
                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    out.push('\n');
                }
                collect_text(child_element, out);
                if block {
                    out.push('\n');
                } else if CELL_ELEMENTS.contains(&name) {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Trims every line, collapses inner whitespace and drops empty lines.
fn clean_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect()
}

fn canonical_label(raw: &str) -> &'static str {
    let lowered = raw.to_lowercase();
    if lowered.starts_with("fecha") {
        "Fecha"
    } else if lowered.starts_with("hora") {
        "Hora"
    } else if lowered.starts_with("valor") {
        "Valor Transacción"
    } else if lowered.starts_with("clase") {
        CLASS_LABEL
    } else {
        "Lugar de Transacción"
    }
}

fn split_label(line: &str) -> Option<(&'static str, String)> {
    LABEL_LINE.captures(line).map(|caps| {
        let label = canonical_label(&caps[1]);
        let value = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
        (label, value)
    })
}

/// Rewrites label lines as `Label: value`, pulling values that wrapped onto
/// the following lines back next to their label. The movement class always
/// ends with a comma, which the alert layout uses as its terminator.
fn join_label_lines(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut iter = lines.into_iter().peekable();

    while let Some(line) = iter.next() {
        let Some((label, mut value)) = split_label(&line) else {
            out.push(line);
            continue;
        };

        let is_class = label == CLASS_LABEL;
        loop {
            let needs_more = value.is_empty() || (is_class && !value.ends_with(','));
            if !needs_more {
                break;
            }
            match iter.peek() {
                Some(next) if split_label(next).is_none() => {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(next);
                    iter.next();
                }
                _ => break,
            }
        }

        if is_class {
            value = value.trim_end_matches(',').trim_end().to_string();
            value.push(',');
        }

        out.push(format!("{}: {}", label, value));
    }

    out
}
