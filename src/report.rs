// Per-extraction report - HTML view and downloadable PDF

use anyhow::{Context, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::extraction::{field_label, ExtractionRecord};

pub const REPORT_TITLE: &str = "Resumen Financiero Inteligente";
pub const REPORT_SUBTITLE: &str = "Datos extraídos:";

// A4 in points
const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const VALUE_X: i64 = 190;
const LINE_HEIGHT: i64 = 14;
/// Characters per value line at 10pt Helvetica in the value column
const VALUE_WRAP: usize = 62;

pub struct ReportWriter {
    dir: PathBuf,
    logo: Option<String>,
    include_analysis: bool,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            logo: None,
            include_analysis: true,
        }
    }

    /// Logo reference for the HTML view (URL or path)
    pub fn with_logo(mut self, logo: impl Into<String>) -> Self {
        self.logo = Some(logo.into());
        self
    }

    /// Whether risks and recommendations appear in the report
    pub fn with_analysis(mut self, include: bool) -> Self {
        self.include_analysis = include;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rows shown in the report, as (label, value).
    pub fn rows(&self, record: &ExtractionRecord) -> Vec<(String, String)> {
        record
            .fields()
            .iter()
            .filter(|(name, _)| {
                self.include_analysis || !matches!(*name, "riesgos" | "recomendaciones")
            })
            .map(|(name, value)| (field_label(name), value.to_string()))
            .collect()
    }

    /// Report as an HTML section, embedded in the result page.
    pub fn render_html(&self, record: &ExtractionRecord) -> String {
        let table: String = self
            .rows(record)
            .iter()
            .map(|(label, value)| {
                format!(
                    "<tr><td><strong>{}</strong></td><td>{}</td></tr>",
                    escape_html(label),
                    escape_html(value)
                )
            })
            .collect();

        let logo = self
            .logo
            .as_ref()
            .map(|src| format!("<img src=\"{}\" width=\"100\">", escape_html(src)))
            .unwrap_or_default();

        format!(
            "<section class=\"reporte\">\n    {logo}\n    <h1>{REPORT_TITLE}</h1>\n    <h3>{REPORT_SUBTITLE}</h3>\n    <table border=\"1\" cellpadding=\"6\" cellspacing=\"0\">\n        {table}\n    </table>\n</section>\n"
        )
    }

    pub fn render_pdf(&self, record: &ExtractionRecord) -> Result<Vec<u8>> {
        let mut pages: Vec<Vec<Operation>> = Vec::new();
        let mut ops: Vec<Operation> = Vec::new();
        let mut y = PAGE_HEIGHT - MARGIN - 18;

        text_at(&mut ops, "F2", 18, MARGIN, y, REPORT_TITLE);
        y -= 28;
        text_at(&mut ops, "F2", 13, MARGIN, y, REPORT_SUBTITLE);
        y -= 12;
        rule(&mut ops, y);

        for (label, value) in self.rows(record) {
            if y - (LINE_HEIGHT + 10) < MARGIN {
                pages.push(std::mem::take(&mut ops));
                y = PAGE_HEIGHT - MARGIN;
                rule(&mut ops, y);
            }

            y -= LINE_HEIGHT + 2;
            text_at(&mut ops, "F2", 10, MARGIN + 6, y, &label);
            for (i, line) in wrap(&value, VALUE_WRAP).iter().enumerate() {
                if i > 0 {
                    y -= LINE_HEIGHT;
                    // long values continue on the next page
                    if y < MARGIN {
                        pages.push(std::mem::take(&mut ops));
                        y = PAGE_HEIGHT - MARGIN - LINE_HEIGHT;
                    }
                }
                text_at(&mut ops, "F1", 10, VALUE_X, y, line);
            }
            y -= 8;
            rule(&mut ops, y);
        }
        pages.push(ops);

        build_pdf(pages)
    }

    /// `resumen_{nombre}.pdf`, or `_1`, `_2`, ... when taken.
    pub fn next_available_path(&self, nombre: &str) -> PathBuf {
        let base = format!("resumen_{}", sanitize_name(nombre));

        let mut candidate = self.dir.join(format!("{}.pdf", base));
        let mut count = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{}_{}.pdf", base, count));
            count += 1;
        }
        candidate
    }

    /// Render and save the PDF report; returns its path.
    pub fn write(&self, record: &ExtractionRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let bytes = self.render_pdf(record)?;
        let path = self.next_available_path(&record.nombre);
        fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;

        info!(path = %path.display(), "Report generated");
        Ok(path)
    }

    /// Look up a generated report by file name, refusing anything outside the folder.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let candidate = Path::new(file_name);
        let is_plain_name = candidate.file_name().map(|n| n == candidate.as_os_str()) == Some(true);
        if !is_plain_name || !file_name.ends_with(".pdf") {
            return None;
        }

        let path = self.dir.join(candidate);
        path.is_file().then_some(path)
    }
}

/// Spaces to underscores; path separators and control characters dropped.
pub fn sanitize_name(nombre: &str) -> String {
    nombre
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '\0') && !c.is_control())
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

// ============================================================================
// PDF HELPERS
// ============================================================================

fn text_at(ops: &mut Vec<Operation>, font: &str, size: i64, x: i64, y: i64, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new("Tj", vec![Object::string_literal(win_ansi(text))]));
    ops.push(Operation::new("ET", vec![]));
}

fn rule(ops: &mut Vec<Operation>, y: i64) {
    ops.push(Operation::new("m", vec![MARGIN.into(), y.into()]));
    ops.push(Operation::new("l", vec![(PAGE_WIDTH - MARGIN).into(), y.into()]));
    ops.push(Operation::new("S", vec![]));
}

fn build_pdf(pages: Vec<Vec<Operation>>) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    });

    let mut page_ids: Vec<ObjectId> = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("Failed to encode report page")?,
        ));
        page_ids.push(doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        }));
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_ids.len() as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).context("Failed to serialize report PDF")?;
    Ok(buffer)
}

/// Encode for the standard fonts' WinAnsiEncoding; unmappable chars become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '€' => 0x80,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            c if (c as u32) < 0x80 => c as u8,
            c if (0xA0..=0xFF).contains(&(c as u32)) => c as u8,
            _ => b'?',
        })
        .collect()
}

/// Word wrap on whitespace; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: String = word.to_string();
        while word.chars().count() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(width).collect();
            word = word.chars().skip(width).collect();
            lines.push(head);
        }

        let projected = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if projected > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

// ============================================================================
// TESTS
// ============================================================================
