// HTML pages for the web UI
//
// Plain server-rendered HTML; charts are inline SVG so the pages work
// without any client-side script.

use crate::dashboard::{
    search, summarize, DashboardSummary, MSG_EMPTY_LOG, MSG_NO_LOG, MSG_UNDATED,
};
use crate::document::StatementDocument;
use crate::extraction::ExtractionRecord;
use crate::ledger::{LedgerState, COLUMNS};
use crate::report::escape_html;
use crate::APP_TITLE;

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 0; display: flex; color: #222; }
nav { width: 220px; min-height: 100vh; background: #f0f2f6; padding: 1rem; box-sizing: border-box; }
nav a { display: block; padding: .4rem 0; color: #222; text-decoration: none; }
nav .sesion { background: #d4edda; color: #155724; padding: .5rem; border-radius: 4px; font-size: .9rem; }
main { flex: 1; padding: 2rem; max-width: 960px; }
.error { background: #f8d7da; color: #721c24; padding: .75rem; border-radius: 4px; }
.warning { background: #fff3cd; color: #856404; padding: .75rem; border-radius: 4px; }
.info { background: #d1ecf1; color: #0c5460; padding: .75rem; border-radius: 4px; }
.success { background: #d4edda; color: #155724; padding: .75rem; border-radius: 4px; }
.metrics { display: flex; gap: 1rem; }
.metric { flex: 1; border: 1px solid #ddd; border-radius: 4px; padding: .75rem; }
.metric .valor { font-size: 1.5rem; font-weight: bold; }
textarea { width: 100%; height: 300px; font-family: monospace; }
table.datos { border-collapse: collapse; width: 100%; font-size: .85rem; }
table.datos td, table.datos th { border: 1px solid #ddd; padding: 4px 6px; text-align: left; }
pre { background: #f6f8fa; padding: .75rem; overflow-x: auto; }
.boton { display: inline-block; padding: .5rem 1rem; border: 1px solid #888; border-radius: 4px; text-decoration: none; color: #222; margin-right: .5rem; }
"#;

const BAR_HEIGHT: usize = 28;
const CHART_WIDTH: usize = 640;
const CHART_HEIGHT: usize = 300;

/// Page shell. With a user it shows navigation and the session banner.
pub fn layout(title: &str, usuario: Option<&str>, body: &str) -> String {
    let nav = match usuario {
        Some(usuario) => format!(
            r#"<nav>
  <p class="sesion">Sesión iniciada como: {}</p>
  <p><strong>Navegación:</strong></p>
  <a href="/procesar">📄 Procesar PDF</a>
  <a href="/dashboard">📊 Dashboard Analítico</a>
  <form method="post" action="/logout"><button type="submit">Cerrar sesión</button></form>
</nav>"#,
            escape_html(usuario)
        ),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="utf-8">
<title>{} · {}</title>
<style>{}</style>
</head>
<body>
{}
<main>
{}
</main>
</body>
</html>
"#,
        escape_html(title),
        APP_TITLE,
        STYLE,
        nav,
        body
    )
}

pub fn login_page(error: Option<&str>) -> String {
    let error = error
        .map(|e| format!(r#"<p class="error">{}</p>"#, escape_html(e)))
        .unwrap_or_default();

    let body = format!(
        r#"<h1>🔐 Acceso</h1>
{}
<form method="post" action="/login">
  <p><label>Usuario<br><input name="usuario" autocomplete="username"></label></p>
  <p><label>Contraseña<br><input name="contrasena" type="password" autocomplete="current-password"></label></p>
  <p><button type="submit">Iniciar sesión</button></p>
</form>"#,
        error
    );

    layout("Acceso", None, &body)
}

pub fn upload_page(usuario: &str, logo: Option<&str>) -> String {
    let body = format!(
        r#"{}
<h1>📄 Procesar Estado de Cuenta</h1>
<form method="post" action="/procesar" enctype="multipart/form-data">
  <p><label>📤 Sube tu archivo PDF<br><input type="file" name="documento" accept=".pdf,.txt" required></label></p>
  <p><button type="submit">🔍 Extraer datos clave y analizar</button></p>
</form>"#,
        logo_img(logo)
    );

    layout("Procesar PDF", Some(usuario), &body)
}

fn logo_img(logo: Option<&str>) -> String {
    logo.map(|src| format!(r#"<img src="{}" width="100" alt="logo">"#, escape_html(src)))
        .unwrap_or_default()
}

fn extracted_text(text: &str) -> String {
    format!(
        r#"<h2>📃 Texto extraído</h2>
<label>Contenido del PDF<br><textarea readonly>{}</textarea></label>"#,
        escape_html(text)
    )
}

/// `report_html` is the report section rendered by `ReportWriter::render_html`.
pub fn result_page(
    usuario: &str,
    document: &StatementDocument,
    report_html: &str,
    report_href: &str,
) -> String {
    let body = format!(
        r#"<h1>📄 Procesar Estado de Cuenta</h1>
{}
<p class="success">✅ Datos extraídos por IA:</p>
{}
<p>
  <a class="boton" href="/descargas/csv">📥 Descargar CSV completo</a>
  <a class="boton" href="{}">📄 Descargar PDF generado</a>
</p>
<p><a href="/procesar">Procesar otro documento</a></p>"#,
        extracted_text(&document.text),
        report_html,
        escape_html(report_href)
    );

    layout("Resultado", Some(usuario), &body)
}

/// Processing failure; the extracted text and raw model reply are shown when available.
pub fn processing_error_page(
    usuario: &str,
    document: Option<&StatementDocument>,
    message: &str,
    raw_response: Option<&str>,
) -> String {
    let text = document.map(|d| extracted_text(&d.text)).unwrap_or_default();
    let raw = raw_response
        .map(|r| format!("<pre><code>{}</code></pre>", escape_html(r)))
        .unwrap_or_default();

    let body = format!(
        r#"<h1>📄 Procesar Estado de Cuenta</h1>
{}
<p class="error">{}</p>
{}
<p><a href="/procesar">Intentar de nuevo</a></p>"#,
        text,
        escape_html(message),
        raw
    );

    layout("Error", Some(usuario), &body)
}

// ============================================================================
// DASHBOARD
// ============================================================================

pub fn dashboard_page(usuario: &str, state: &LedgerState, query: &str) -> String {
    let records = match state {
        LedgerState::Missing => {
            let body = format!(
                r#"<h1>📊 Dashboard Analítico</h1><p class="warning">{}</p>"#,
                MSG_NO_LOG
            );
            return layout("Dashboard", Some(usuario), &body);
        }
        LedgerState::Records(records) if records.is_empty() => {
            let body = format!(
                r#"<h1>📊 Dashboard Analítico</h1><p class="info">{}</p>"#,
                MSG_EMPTY_LOG
            );
            return layout("Dashboard", Some(usuario), &body);
        }
        LedgerState::Records(records) => records,
    };

    let summary = summarize(records);
    let filtered = search(records, query);

    let body = format!(
        r#"<h1>📊 Dashboard Analítico</h1>
<h2>📌 Indicadores clave</h2>
{}
<h2>📈 Documentos procesados por persona (Top 10)</h2>
{}
<h2>🗓️ Evolución mensual de documentos</h2>
{}
<h2>🔎 Buscar registros</h2>
<form method="get" action="/dashboard">
  <label>Buscar por nombre, RFC o cuenta:<br><input name="q" value="{}"></label>
  <button type="submit">Buscar</button>
</form>
{}"#,
        metrics(&summary),
        top_names_chart(&summary),
        monthly_chart(&summary),
        escape_html(query),
        records_table(&filtered)
    );

    layout("Dashboard", Some(usuario), &body)
}

fn metrics(summary: &DashboardSummary) -> String {
    let metric = |label: &str, value: String| {
        format!(
            r#"<div class="metric"><div>{}</div><div class="valor">{}</div></div>"#,
            label,
            escape_html(&value)
        )
    };

    format!(
        r#"<div class="metrics">{}{}{}{}</div>"#,
        metric("📄 Documentos", summary.documentos.to_string()),
        metric("👤 Personas únicas", summary.personas_unicas.to_string()),
        metric("💰 Suma total de saldos", summary.total_display()),
        metric("💳 Saldo promedio", summary.average_display()),
    )
}

/// Horizontal bar chart, longest bar = most documents.
pub fn top_names_chart(summary: &DashboardSummary) -> String {
    let Some(max) = summary.top_nombres.iter().map(|n| n.documentos).max() else {
        return String::new();
    };

    let label_width = 200;
    let bar_space = CHART_WIDTH - label_width - 40;
    let height = summary.top_nombres.len() * BAR_HEIGHT;

    let bars: String = summary
        .top_nombres
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let y = i * BAR_HEIGHT;
            let width = (entry.documentos * bar_space / max).max(1);
            format!(
                r##"<g><title>{nombre}: {docs}</title><text x="0" y="{ty}" font-size="12">{nombre}</text><rect x="{lx}" y="{ry}" width="{width}" height="{bh}" fill="#4c78a8"/><text x="{tx}" y="{ty}" font-size="12">{docs}</text></g>"##,
                nombre = escape_html(&entry.nombre),
                docs = entry.documentos,
                ty = y + BAR_HEIGHT / 2 + 4,
                lx = label_width,
                ry = y + 4,
                width = width,
                bh = BAR_HEIGHT - 8,
                tx = label_width + width + 6,
            )
        })
        .collect();

    format!(
        r#"<svg width="{}" height="{}" role="img">{}</svg>"#,
        CHART_WIDTH, height, bars
    )
}

/// Line chart with points, one per month.
pub fn monthly_chart(summary: &DashboardSummary) -> String {
    let warning = if summary.registros_sin_fecha > 0 {
        format!(r#"<p class="warning">{}</p>"#, MSG_UNDATED)
    } else {
        String::new()
    };

    let series = &summary.evolucion_mensual;
    let Some(max) = series.iter().map(|m| m.documentos).max() else {
        return warning;
    };

    let pad = 40;
    let plot_w = CHART_WIDTH - 2 * pad;
    let plot_h = CHART_HEIGHT - 2 * pad;
    let step = if series.len() > 1 { plot_w / (series.len() - 1) } else { 0 };

    let points: Vec<(usize, usize)> = series
        .iter()
        .enumerate()
        .map(|(i, m)| (pad + i * step, pad + plot_h - m.documentos * plot_h / max))
        .collect();

    let polyline: String = points
        .iter()
        .map(|(x, y)| format!("{},{}", x, y))
        .collect::<Vec<_>>()
        .join(" ");

    let marks: String = series
        .iter()
        .zip(&points)
        .map(|(m, (x, y))| {
            format!(
                r##"<g><title>{mes}: {docs}</title><circle cx="{x}" cy="{y}" r="4" fill="#4c78a8"/><text x="{x}" y="{ly}" font-size="11" text-anchor="middle">{mes}</text></g>"##,
                mes = m.mes,
                docs = m.documentos,
                x = x,
                y = y,
                ly = CHART_HEIGHT - pad / 2,
            )
        })
        .collect();

    format!(
        r##"{}<svg width="{}" height="{}" role="img"><polyline points="{}" fill="none" stroke="#4c78a8" stroke-width="2"/>{}</svg>"##,
        warning, CHART_WIDTH, CHART_HEIGHT, polyline, marks
    )
}

fn records_table(records: &[&ExtractionRecord]) -> String {
    let header: String = COLUMNS
        .iter()
        .map(|c| format!("<th>{}</th>", c))
        .collect();

    let rows: String = records
        .iter()
        .map(|record| {
            let cells: String = record
                .fields()
                .iter()
                .map(|(_, value)| format!("<td>{}</td>", escape_html(value)))
                .collect();
            format!("<tr>{}</tr>\n", cells)
        })
        .collect();

    format!(
        r#"<p>{} registros</p>
<table class="datos"><thead><tr>{}</tr></thead><tbody>
{}</tbody></table>"#,
        records.len(),
        header,
        rows
    )
}
