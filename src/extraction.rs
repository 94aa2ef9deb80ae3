// Extraction core: model reply -> normalised record
//
// The model is asked for a flat JSON object. Replies come back wrapped in
// markdown fences, with lists where strings were asked for, or with the
// balance in whatever shape the statement printed it. Everything here turns
// that into one `ExtractionRecord` with string fields.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::currency::{format_mxn, parse_reported_amount};
use crate::error::{ExtractionError, ExtractionResult};
use crate::llm::{build_prompt, CompletionProvider, CompletionRequest};

/// Sentinel for any field the model (or the fallback) could not find.
pub const NOT_FOUND: &str = "No encontrado";

/// "saldo ... al corte ... $1,234.56" or "saldo ... final ... 1,234.56"
static BALANCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(saldo.*al corte.*?|saldo.*final.*?)\$?([\d,]+\.\d{2})").unwrap()
});

// ============================================================================
// RECORD
// ============================================================================

/// One extraction, as stored in the log and shown in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub nombre: String,
    pub rfc: String,
    pub cuenta: String,
    pub saldo: String,
    pub tema: String,
    pub riesgos: String,
    pub recomendaciones: String,
    /// Processing date, `YYYY-MM-DD`. Empty for logs written before the column existed.
    #[serde(default)]
    pub fecha: String,
}

impl ExtractionRecord {
    /// Build a record from the parsed model object.
    ///
    /// `text` is the statement text, used only when the balance has to be
    /// recovered with the regex fallback.
    pub fn from_response(
        data: &Map<String, Value>,
        text: &str,
        fecha: NaiveDate,
        regex_fallback: bool,
    ) -> Self {
        ExtractionRecord {
            nombre: field_text(data.get("nombre")),
            rfc: field_text(data.get("rfc")),
            cuenta: field_text(data.get("cuenta")),
            saldo: resolve_balance(data.get("saldo"), text, regex_fallback),
            tema: field_text(data.get("tema")),
            riesgos: field_text(data.get("riesgos")),
            recomendaciones: field_text(data.get("recomendaciones")),
            fecha: fecha.format("%Y-%m-%d").to_string(),
        }
    }

    /// Field name / value pairs in column order.
    pub fn fields(&self) -> [(&'static str, &str); 8] {
        [
            ("nombre", &self.nombre),
            ("rfc", &self.rfc),
            ("cuenta", &self.cuenta),
            ("saldo", &self.saldo),
            ("tema", &self.tema),
            ("riesgos", &self.riesgos),
            ("recomendaciones", &self.recomendaciones),
            ("fecha", &self.fecha),
        ]
    }

    /// Case-insensitive substring match against every field.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.fields()
            .iter()
            .any(|(_, value)| value.to_lowercase().contains(&needle))
    }
}

/// "recomendaciones" -> "Recomendaciones"
pub fn field_label(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// RESPONSE PARSING
// ============================================================================

/// Strip whitespace, markdown fences and stray backticks from a model reply.
///
/// Fences go first: trimming backticks before that would leave the `json`
/// language tag behind.
pub fn clean_response(raw: &str) -> String {
    raw.trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .trim_matches('`')
        .trim()
        .to_string()
}

/// Parse a model reply into a JSON object.
pub fn parse_response(raw: &str) -> ExtractionResult<Map<String, Value>> {
    let cleaned = clean_response(raw);

    let value: Value =
        serde_json::from_str(&cleaned).map_err(|source| ExtractionError::InvalidJson {
            raw: raw.to_string(),
            source,
        })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ExtractionError::NotAnObject {
            raw: raw.to_string(),
        }),
    }
}

/// Render any JSON value as a single display string.
fn field_text(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| field_text(Some(item)))
            .filter(|s| s != NOT_FOUND)
            .collect::<Vec<_>>()
            .join("; "),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, item)| format!("{}: {}", key, field_text(Some(item))))
            .collect::<Vec<_>>()
            .join("; "),
    };

    if text.is_empty() {
        NOT_FOUND.to_string()
    } else {
        text
    }
}

// ============================================================================
// BALANCE
// ============================================================================

/// Resolve the balance to a formatted MXN amount or `NOT_FOUND`.
///
/// A balance the model reported but that does not parse is NOT retried with
/// the regex; only a balance the model could not find is.
pub fn resolve_balance(value: Option<&Value>, text: &str, regex_fallback: bool) -> String {
    if let Some(Value::Number(n)) = value {
        return n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(format_mxn)
            .unwrap_or_else(|| NOT_FOUND.to_string());
    }

    let reported = field_text(value);
    if reported != NOT_FOUND {
        return match parse_reported_amount(&reported) {
            Some(amount) => format_mxn(amount),
            None => {
                debug!(reported = %reported, "Reported balance is not a number");
                NOT_FOUND.to_string()
            }
        };
    }

    if !regex_fallback {
        return NOT_FOUND.to_string();
    }

    match balance_from_text(text) {
        Some(amount) => {
            info!(amount, "Balance recovered from statement text");
            format_mxn(amount)
        }
        None => NOT_FOUND.to_string(),
    }
}

/// Look for "saldo ... al corte" / "saldo ... final" followed by an amount.
pub fn balance_from_text(text: &str) -> Option<f64> {
    let normalized = text.replace('\n', " ").to_lowercase();
    let captures = BALANCE_PATTERN.captures(&normalized)?;
    let amount = captures.get(2)?.as_str().replace(',', "");
    amount.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// A finished extraction plus the model content it came from.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: ExtractionRecord,
    pub raw_response: String,
}

/// Prompt -> completion -> parse -> normalise.
pub struct Extractor {
    provider: Box<dyn CompletionProvider>,
    model: String,
    temperature: f32,
    regex_fallback: bool,
}

impl Extractor {
    pub fn new(provider: Box<dyn CompletionProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: crate::llm::DEFAULT_TEMPERATURE,
            regex_fallback: true,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_regex_fallback(mut self, enabled: bool) -> Self {
        self.regex_fallback = enabled;
        self
    }

    pub async fn extract(&self, text: &str, fecha: NaiveDate) -> ExtractionResult<Extraction> {
        let request = CompletionRequest {
            model: self.model.clone(),
            prompt: build_prompt(text),
            temperature: self.temperature,
        };

        info!(provider = self.provider.name(), model = %self.model, "Requesting extraction");

        let raw = self
            .provider
            .complete(&request)
            .await
            .map_err(ExtractionError::Completion)?;

        if raw.trim().is_empty() {
            return Err(ExtractionError::EmptyResponse);
        }

        let data = parse_response(&raw).map_err(|e| {
            warn!(error = %e, "Model reply is not usable JSON");
            e
        })?;

        let record = ExtractionRecord::from_response(&data, text, fecha, self.regex_fallback);

        Ok(Extraction {
            record,
            raw_response: raw,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedProvider;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_clean_response_strips_fences() {
        let raw = "```json\n{\"nombre\": \"Ana\"}\n```";
        assert_eq!(clean_response(raw), "{\"nombre\": \"Ana\"}");

        let raw = "  `{\"a\": 1}`  ";
        assert_eq!(clean_response(raw), "{\"a\": 1}");

        let raw = "```\n{\"a\": 1}\n```\n";
        assert_eq!(clean_response(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_response_accepts_fenced_reply() {
        let raw = "```json\n{\"nombre\": \"Ana\", \"saldo\": \"$10.00\"}\n```";
        let data = parse_response(raw).unwrap();
        assert_eq!(data["nombre"], "Ana");
        assert_eq!(data["saldo"], "$10.00");
    }

    #[test]
    fn test_parse_response_invalid_json_keeps_raw() {
        let err = parse_response("Lo siento, no puedo ayudar").unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidJson { .. }));
        assert_eq!(err.raw_response(), Some("Lo siento, no puedo ayudar"));
    }

    #[test]
    fn test_parse_response_rejects_arrays() {
        let err = parse_response("[1, 2]").unwrap_err();
        assert!(matches!(err, ExtractionError::NotAnObject { .. }));
    }

    #[test]
    fn test_record_from_complete_response() {
        let data = object(json!({
            "nombre": "JUAN PEREZ LOPEZ",
            "rfc": "PELJ800101ABC",
            "cuenta": "0123456789",
            "saldo": "$15,320.50",
            "tema": "Estado de cuenta bancario",
            "riesgos": ["Saldo bajo", "Comisiones altas"],
            "recomendaciones": "Reducir gastos"
        }));

        let record = ExtractionRecord::from_response(&data, "", date(), true);

        assert_eq!(record.nombre, "JUAN PEREZ LOPEZ");
        assert_eq!(record.saldo, "$15,320.50");
        assert_eq!(record.riesgos, "Saldo bajo; Comisiones altas");
        assert_eq!(record.fecha, "2024-03-15");
    }

    #[test]
    fn test_missing_fields_become_sentinel() {
        let data = object(json!({ "nombre": "Ana", "rfc": null, "cuenta": "  " }));
        let record = ExtractionRecord::from_response(&data, "", date(), false);

        assert_eq!(record.rfc, NOT_FOUND);
        assert_eq!(record.cuenta, NOT_FOUND);
        assert_eq!(record.tema, NOT_FOUND);
        assert_eq!(record.saldo, NOT_FOUND);
    }

    #[test]
    fn test_numeric_balance_is_formatted() {
        let value = json!(2500.5);
        assert_eq!(resolve_balance(Some(&value), "", true), "$2,500.50");
    }

    #[test]
    fn test_unparseable_reported_balance_skips_fallback() {
        let value = json!("quince mil pesos");
        let text = "SALDO AL CORTE $1,000.00";
        assert_eq!(resolve_balance(Some(&value), text, true), NOT_FOUND);
    }

    #[test]
    fn test_fallback_finds_saldo_al_corte() {
        let value = json!(NOT_FOUND);
        let text = "BANCO EJEMPLO\nSALDO TOTAL\nAL CORTE   $12,480.33\nPagos 100.00";
        assert_eq!(resolve_balance(Some(&value), text, true), "$12,480.33");
    }

    #[test]
    fn test_fallback_finds_saldo_final() {
        assert_eq!(balance_from_text("Saldo final del periodo 9,001.10"), Some(9001.10));
    }

    #[test]
    fn test_fallback_disabled() {
        let text = "SALDO AL CORTE $1,000.00";
        assert_eq!(resolve_balance(None, text, false), NOT_FOUND);
        assert_eq!(resolve_balance(None, text, true), "$1,000.00");
    }

    #[test]
    fn test_fallback_without_match() {
        assert_eq!(balance_from_text("Movimientos del mes: ninguno"), None);
    }

    #[test]
    fn test_record_search_and_labels() {
        let data = object(json!({ "nombre": "María López", "rfc": "LOMA900202XYZ" }));
        let record = ExtractionRecord::from_response(&data, "", date(), false);

        assert!(record.matches("maría"));
        assert!(record.matches("loma9"));
        assert!(record.matches(""));
        assert!(!record.matches("pedro"));
        assert_eq!(field_label("recomendaciones"), "Recomendaciones");
        assert_eq!(field_label("rfc"), "Rfc");
    }

    #[tokio::test]
    async fn test_extractor_end_to_end() {
        let reply = "```json\n{\"nombre\": \"Ana Ruiz\", \"rfc\": \"RUAA\", \"cuenta\": \"555\", \"saldo\": \"No encontrado\", \"tema\": \"Tarjeta\", \"riesgos\": \"Ninguno\", \"recomendaciones\": \"Ahorrar\"}\n```";
        let provider = CannedProvider::replying(reply);
        let extractor = Extractor::new(Box::new(provider), "gpt-test");

        let extraction = extractor
            .extract("Saldo al corte: $3,210.00", date())
            .await
            .unwrap();

        assert_eq!(extraction.record.nombre, "Ana Ruiz");
        assert_eq!(extraction.record.saldo, "$3,210.00");
        assert_eq!(extraction.raw_response, reply);
    }

    #[tokio::test]
    async fn test_extractor_surfaces_provider_failure() {
        let extractor = Extractor::new(Box::new(CannedProvider::failing("timeout")), "gpt-test");
        let err = extractor.extract("texto", date()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Completion(_)));
    }

    #[tokio::test]
    async fn test_extractor_empty_reply() {
        let extractor = Extractor::new(Box::new(CannedProvider::replying("   ")), "gpt-test");
        let err = extractor.extract("texto", date()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyResponse));
    }
}
