// 📊 Dashboard analytics over the extraction log

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::currency::{format_indicator, parse_logged_amount};
use crate::extraction::ExtractionRecord;

pub const TOP_NAMES: usize = 10;
/// Shown instead of an amount when some balance cannot be read as a number
pub const NO_VALUE: &str = "—";

pub const MSG_NO_LOG: &str = "Aún no se ha procesado ningún documento.";
pub const MSG_EMPTY_LOG: &str =
    "No hay datos disponibles aún. Procesa al menos un PDF para ver el análisis.";
pub const MSG_UNDATED: &str =
    "No se pudo graficar la evolución mensual de algunos registros (verifica formato de fechas).";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameCount {
    pub nombre: String,
    pub documentos: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthCount {
    /// `YYYY-MM`
    pub mes: String,
    pub documentos: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub documentos: usize,
    pub personas_unicas: usize,
    /// None when any balance failed to convert
    pub suma_saldos: Option<f64>,
    pub saldo_promedio: Option<f64>,
    pub top_nombres: Vec<NameCount>,
    pub evolucion_mensual: Vec<MonthCount>,
    /// Rows left out of the monthly series because their date did not parse
    pub registros_sin_fecha: usize,
}

impl DashboardSummary {
    pub fn total_display(&self) -> String {
        self.suma_saldos
            .map(format_indicator)
            .unwrap_or_else(|| NO_VALUE.to_string())
    }

    pub fn average_display(&self) -> String {
        self.saldo_promedio
            .map(format_indicator)
            .unwrap_or_else(|| NO_VALUE.to_string())
    }
}

pub fn summarize(records: &[ExtractionRecord]) -> DashboardSummary {
    let (suma_saldos, saldo_promedio) = match balance_totals(records) {
        Some((total, average)) => (Some(total), average),
        None => (None, None),
    };

    let (evolucion_mensual, registros_sin_fecha) = monthly_counts(records);

    DashboardSummary {
        documentos: records.len(),
        personas_unicas: top_names(records, usize::MAX).len(),
        suma_saldos,
        saldo_promedio,
        top_nombres: top_names(records, TOP_NAMES),
        evolucion_mensual,
        registros_sin_fecha,
    }
}

/// Sum and mean of all balances; None if any row's balance is not numeric.
fn balance_totals(records: &[ExtractionRecord]) -> Option<(f64, Option<f64>)> {
    let amounts = records
        .iter()
        .map(|r| parse_logged_amount(&r.saldo))
        .collect::<Option<Vec<f64>>>()?;

    let total: f64 = amounts.iter().sum();
    let average = if amounts.is_empty() {
        None
    } else {
        Some(total / amounts.len() as f64)
    };

    Some((total, average))
}

/// Names by document count, descending; ties keep first-appearance order.
pub fn top_names(records: &[ExtractionRecord], limit: usize) -> Vec<NameCount> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let nombre = record.nombre.trim();
        if nombre.is_empty() {
            continue;
        }
        let count = counts.entry(nombre).or_insert(0);
        if *count == 0 {
            order.push(nombre);
        }
        *count += 1;
    }

    let mut result: Vec<NameCount> = order
        .into_iter()
        .map(|nombre| NameCount {
            nombre: nombre.to_string(),
            documentos: counts[nombre],
        })
        .collect();

    // stable sort keeps first appearance among equal counts
    result.sort_by(|a, b| b.documentos.cmp(&a.documentos));
    result.truncate(limit);
    result
}

/// Documents per month, ascending, plus the number of undated rows.
pub fn monthly_counts(records: &[ExtractionRecord]) -> (Vec<MonthCount>, usize) {
    let mut months: BTreeMap<String, usize> = BTreeMap::new();
    let mut undated = 0;

    for record in records {
        match parse_fecha(&record.fecha) {
            Some(date) => *months.entry(date.format("%Y-%m").to_string()).or_insert(0) += 1,
            None => undated += 1,
        }
    }

    let series = months
        .into_iter()
        .map(|(mes, documentos)| MonthCount { mes, documentos })
        .collect();

    (series, undated)
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time.
fn parse_fecha(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Rows matching a free-text query (name, RFC, account or any other field).
pub fn search<'a>(records: &'a [ExtractionRecord], query: &str) -> Vec<&'a ExtractionRecord> {
    records.iter().filter(|r| r.matches(query)).collect()
}

// ============================================================================
// TESTS
// ============================================================================
