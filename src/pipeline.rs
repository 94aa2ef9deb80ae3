// Processing pipeline
//
// document -> text -> prompt -> completion -> record -> log row -> report

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::audit::{self, AuditLog, Event};
use crate::config::Settings;
use crate::document::{read_statement, StatementDocument};
use crate::extraction::{Extraction, ExtractionRecord, Extractor};
use crate::ledger::Ledger;
use crate::llm::{CompletionProvider, OpenAiProvider};
use crate::report::ReportWriter;

/// Result of one processed statement
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub record: ExtractionRecord,
    pub report_path: PathBuf,
    pub raw_response: String,
}

impl ProcessOutcome {
    pub fn report_file_name(&self) -> String {
        self.report_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct Pipeline {
    extractor: Extractor,
    ledger: Ledger,
    reports: ReportWriter,
    audit: Arc<Mutex<AuditLog>>,
}

impl Pipeline {
    pub fn new(
        extractor: Extractor,
        ledger: Ledger,
        reports: ReportWriter,
        audit: Arc<Mutex<AuditLog>>,
    ) -> Self {
        Self {
            extractor,
            ledger,
            reports,
            audit,
        }
    }

    /// Wire the pipeline to the OpenAI endpoint from settings.
    pub fn from_settings(settings: &Settings, audit: Arc<Mutex<AuditLog>>) -> Result<Self> {
        let api_key = settings.require_api_key()?;
        let provider =
            OpenAiProvider::new(api_key).with_base_url(settings.openai_base_url.clone());
        Self::with_provider(settings, Box::new(provider), audit)
    }

    pub fn with_provider(
        settings: &Settings,
        provider: Box<dyn CompletionProvider>,
        audit: Arc<Mutex<AuditLog>>,
    ) -> Result<Self> {
        let extractor = Extractor::new(provider, settings.model.clone())
            .with_temperature(settings.temperature)
            .with_regex_fallback(settings.regex_fallback);

        let ledger = Ledger::open(&settings.csv_path)?;

        let mut reports =
            ReportWriter::new(&settings.reports_dir).with_analysis(settings.report_analysis);
        // the server only exposes /static/<logo> when the file exists
        if settings.logo_path.is_file() {
            reports = reports.with_logo(format!("/static/{}", logo_file_name(settings)));
        }

        Ok(Self::new(extractor, ledger, reports, audit))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn reports(&self) -> &ReportWriter {
        &self.reports
    }

    pub fn audit(&self) -> &Arc<Mutex<AuditLog>> {
        &self.audit
    }

    /// Step 1: uploaded bytes -> text.
    pub fn read_document(&self, file_name: &str, bytes: &[u8]) -> Result<StatementDocument> {
        let document = read_statement(file_name, bytes)?;
        info!(
            file = %document.file_name,
            format = document.format.name(),
            chars = document.text.len(),
            "Statement text extracted"
        );
        Ok(document)
    }

    /// Step 2: text -> record, via the completion endpoint.
    pub async fn extract(
        &self,
        document: &StatementDocument,
        fecha: NaiveDate,
        actor: &str,
    ) -> Result<Extraction> {
        match self.extractor.extract(&document.text, fecha).await {
            Ok(extraction) => Ok(extraction),
            Err(e) => {
                warn!(file = %document.file_name, error = %e, "Extraction failed");
                self.record_event(Event::new(
                    audit::EXTRACTION_FAILED,
                    "documento",
                    &document.fingerprint,
                    json!({ "archivo": document.file_name, "error": e.to_string() }),
                    actor,
                ));
                Err(e.into())
            }
        }
    }

    /// Step 3: record -> log row and PDF report. Blocking file and database work.
    pub fn persist(
        &self,
        document: &StatementDocument,
        extraction: Extraction,
        actor: &str,
    ) -> Result<ProcessOutcome> {
        let record = extraction.record;

        self.ledger
            .append(&record)
            .context("No se pudo guardar el registro")?;

        self.record_event(Event::new(
            audit::DOCUMENT_PROCESSED,
            "documento",
            &document.fingerprint,
            json!({
                "archivo": document.file_name,
                "nombre": record.nombre,
                "saldo": record.saldo,
            }),
            actor,
        ));

        let report_path = self
            .reports
            .write(&record)
            .context("❌ Error al generar el PDF.")?;

        self.record_event(Event::new(
            audit::REPORT_GENERATED,
            "reporte",
            &report_path.display().to_string(),
            json!({ "documento": document.fingerprint }),
            actor,
        ));

        info!(nombre = %record.nombre, report = %report_path.display(), "Statement processed");

        Ok(ProcessOutcome {
            record,
            report_path,
            raw_response: extraction.raw_response,
        })
    }

    /// Steps 2 and 3 on the calling task.
    pub async fn analyze(
        &self,
        document: &StatementDocument,
        fecha: NaiveDate,
        actor: &str,
    ) -> Result<ProcessOutcome> {
        let extraction = self.extract(document, fecha, actor).await?;
        self.persist(document, extraction, actor)
    }

    /// Both steps in one call.
    pub async fn process(
        &self,
        file_name: &str,
        bytes: &[u8],
        fecha: NaiveDate,
        actor: &str,
    ) -> Result<(StatementDocument, ProcessOutcome)> {
        let document = self.read_document(file_name, bytes)?;
        let outcome = self.analyze(&document, fecha, actor).await?;
        Ok((document, outcome))
    }

    /// Audit failures are logged, never fatal to the request.
    pub fn record_event(&self, event: Event) {
        let result = match self.audit.lock() {
            Ok(audit) => audit.record(&event),
            Err(_) => Err(anyhow::anyhow!("audit lock poisoned")),
        };
        if let Err(e) = result {
            warn!(event_type = %event.event_type, error = %e, "Could not record audit event");
        }
    }
}

fn logo_file_name(settings: &Settings) -> String {
    settings
        .logo_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use crate::ledger::LedgerState;
    use crate::llm::CannedProvider;
    use std::collections::HashMap;

    pub(crate) const REPLY: &str = r#"{"nombre": "Ana Ruiz", "rfc": "RUAA800101", "cuenta": "123", "saldo": "No encontrado", "tema": "Estado de cuenta", "riesgos": ["Pagos mínimos"], "recomendaciones": "Pagar total"}"#;

    pub(crate) fn test_settings(dir: &std::path::Path) -> Settings {
        let mut vars = HashMap::new();
        vars.insert(
            "RESUMEN_CSV".to_string(),
            dir.join("log.csv").display().to_string(),
        );
        vars.insert(
            "RESUMEN_REPORTES".to_string(),
            dir.join("reportes").display().to_string(),
        );
        Settings::from_map(&vars).unwrap()
    }

    pub(crate) fn test_pipeline(dir: &std::path::Path, reply: &str) -> Pipeline {
        let audit = Arc::new(Mutex::new(AuditLog::in_memory().unwrap()));
        Pipeline::with_provider(
            &test_settings(dir),
            Box::new(CannedProvider::replying(reply)),
            audit,
        )
        .unwrap()
    }

    fn fecha() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    #[tokio::test]
    async fn test_process_plain_text_statement() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path(), REPLY);

        let (document, outcome) = pipeline
            .process(
                "estado.txt",
                b"BANCO\nSALDO AL CORTE $4,500.00\n",
                fecha(),
                "admin",
            )
            .await
            .unwrap();

        assert_eq!(document.text, "BANCO\nSALDO AL CORTE $4,500.00");
        assert_eq!(outcome.record.saldo, "$4,500.00");
        assert_eq!(outcome.record.fecha, "2024-07-01");
        assert_eq!(outcome.report_file_name(), "resumen_Ana_Ruiz.pdf");
        assert!(outcome.report_path.is_file());

        let logged = pipeline.ledger().load().unwrap();
        assert_eq!(logged.records(), &[outcome.record.clone()]);

        let events = pipeline.audit().lock().unwrap().recent(10).unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec![audit::REPORT_GENERATED, audit::DOCUMENT_PROCESSED]);
    }

    #[tokio::test]
    async fn test_persist_on_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(test_pipeline(dir.path(), REPLY));

        let document = pipeline
            .read_document("estado.txt", b"Saldo final del periodo 2,000.00")
            .unwrap();
        let extraction = pipeline.extract(&document, fecha(), "admin").await.unwrap();
        assert!(pipeline.ledger().load().unwrap().records().is_empty());

        let shared = pipeline.clone();
        let doc = document.clone();
        let outcome = tokio::task::spawn_blocking(move || shared.persist(&doc, extraction, "admin"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.record.saldo, "$2,000.00");
        assert!(outcome.report_path.is_file());
        assert_eq!(pipeline.ledger().load().unwrap().records().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path(), "No pude leer el documento.");

        let err = pipeline
            .process("estado.txt", b"texto", fecha(), "admin")
            .await
            .unwrap_err();

        let extraction_error = err.downcast_ref::<ExtractionError>().unwrap();
        assert_eq!(extraction_error.raw_response(), Some("No pude leer el documento."));
        assert_eq!(pipeline.ledger().load().unwrap(), LedgerState::Records(vec![]));

        let events = pipeline.audit().lock().unwrap().recent(10).unwrap();
        assert_eq!(events[0].event_type, audit::EXTRACTION_FAILED);
    }

    #[tokio::test]
    async fn test_unsupported_upload() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path(), REPLY);

        let err = pipeline
            .process("foto.png", b"\x89PNG", fecha(), "admin")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractionError>(),
            Some(ExtractionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_from_settings_requires_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(Mutex::new(AuditLog::in_memory().unwrap()));
        assert!(Pipeline::from_settings(&test_settings(dir.path()), audit).is_err());
    }
}
