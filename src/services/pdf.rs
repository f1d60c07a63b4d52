//! Single-page test invoice behind the `generate-test-pdf` function.
//!
//! Layout is computed as plain text runs first, then handed to `printpdf`
//! with the built-in Helvetica fonts so no font files are needed.

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, Line, Mm, PdfDocument, Point};

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("failed to render PDF: {0}")]
    Render(String),
}

impl From<printpdf::Error> for PdfError {
    fn from(e: printpdf::Error) -> Self {
        Self::Render(format!("{:?}", e))
    }
}

const PAGE_WIDTH: Mm = Mm(215.9);
const PAGE_HEIGHT: Mm = Mm(279.4);
const LEFT: f32 = 25.0;
const RIGHT: f32 = 190.0;

#[derive(Debug, Clone)]
pub struct LineItem {
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl LineItem {
    pub fn total_cents(&self) -> i64 {
        self.quantity * self.unit_price_cents
    }
}

#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    pub number: String,
    pub issued_at: DateTime<Utc>,
    pub bill_to: String,
    pub items: Vec<LineItem>,
}

impl InvoiceDocument {
    /// Fixed sample used to smoke-test the PDF pipeline.
    pub fn sample(issued_at: DateTime<Utc>) -> Self {
        Self {
            number: "TEST-0001".into(),
            issued_at,
            bill_to: "Acme Corporation".into(),
            items: vec![
                LineItem {
                    description: "Website redesign".into(),
                    quantity: 1,
                    unit_price_cents: 250_000,
                },
                LineItem {
                    description: "Hosting (monthly)".into(),
                    quantity: 3,
                    unit_price_cents: 2_999,
                },
            ],
        }
    }

    pub fn total_cents(&self) -> i64 {
        self.items.iter().map(LineItem::total_cents).sum()
    }
}

fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{}${}.{:02}", sign, cents / 100, cents % 100)
}

/// Built-in fonts only cover Latin-1; anything outside printable ASCII becomes `?`.
fn printable(text: &str) -> String {
    text.chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct TextRun {
    text: String,
    size: f32,
    x: f32,
    y: f32,
    bold: bool,
}

#[derive(Debug, Default)]
struct Layout {
    runs: Vec<TextRun>,
    /// Horizontal rules, by height from the bottom of the page in mm.
    rules: Vec<f32>,
}

impl Layout {
    fn text(&mut self, size: f32, x: f32, y: f32, text: &str) {
        self.push(size, x, y, text, false);
    }

    fn bold(&mut self, size: f32, x: f32, y: f32, text: &str) {
        self.push(size, x, y, text, true);
    }

    fn push(&mut self, size: f32, x: f32, y: f32, text: &str, bold: bool) {
        self.runs.push(TextRun {
            text: printable(text),
            size,
            x,
            y,
            bold,
        });
    }
}

fn layout_invoice(invoice: &InvoiceDocument) -> Layout {
    let mut l = Layout::default();

    l.bold(24.0, LEFT, 250.0, "INVOICE");
    l.text(11.0, LEFT, 241.0, &format!("Invoice #: {}", invoice.number));
    l.text(
        11.0,
        LEFT,
        235.0,
        &format!("Date: {}", invoice.issued_at.format("%Y-%m-%d")),
    );
    l.bold(11.0, LEFT, 224.0, "Bill to:");
    l.text(11.0, LEFT, 218.0, &invoice.bill_to);

    l.bold(11.0, LEFT, 205.0, "Description");
    l.bold(11.0, 120.0, 205.0, "Qty");
    l.bold(11.0, 140.0, 205.0, "Unit price");
    l.bold(11.0, 168.0, 205.0, "Amount");
    l.rules.push(203.0);

    let mut y = 197.0;
    for item in &invoice.items {
        l.text(11.0, LEFT, y, &item.description);
        l.text(11.0, 120.0, y, &item.quantity.to_string());
        l.text(11.0, 140.0, y, &format_money(item.unit_price_cents));
        l.text(11.0, 168.0, y, &format_money(item.total_cents()));
        y -= 6.5;
    }

    l.rules.push(y + 3.0);
    l.bold(12.0, 140.0, y - 4.0, "Total:");
    l.bold(12.0, 168.0, y - 4.0, &format_money(invoice.total_cents()));
    l.text(9.0, LEFT, 25.0, "Generated by InvoiceAI - test document");

    l
}

pub fn render_invoice(invoice: &InvoiceDocument) -> Result<Vec<u8>, PdfError> {
    let layout = layout_invoice(invoice);
    let (doc, page, layer) = PdfDocument::new(
        format!("Invoice {}", printable(&invoice.number)),
        PAGE_WIDTH,
        PAGE_HEIGHT,
        "Invoice",
    );
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold)?;
    let canvas = doc.get_page(page).get_layer(layer);

    for run in &layout.runs {
        let font = if run.bold { &bold } else { &regular };
        canvas.use_text(run.text.clone(), run.size, Mm(run.x), Mm(run.y), font);
    }

    canvas.set_outline_thickness(0.5);
    for y in &layout.rules {
        canvas.add_line(Line {
            points: vec![
                (Point::new(Mm(LEFT), Mm(*y)), false),
                (Point::new(Mm(RIGHT), Mm(*y)), false),
            ],
            is_closed: false,
        });
    }

    Ok(doc.save_to_bytes()?)
}
