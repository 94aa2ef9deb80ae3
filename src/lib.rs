// Resumen Financiero - Core Library
// Statement upload -> LLM extraction -> CSV log -> dashboard -> PDF report.
// Exposes all modules for use in CLI, web server, and tests

pub mod audit;
pub mod auth;
pub mod config;
pub mod currency;
pub mod dashboard;
pub mod document;
pub mod error;
pub mod extraction;
pub mod ledger;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod report;

#[cfg(feature = "server")]
pub mod pages;
#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use audit::{AuditLog, Event};
pub use auth::{hash_password, SessionStore, UserDirectory};
pub use config::Settings;
pub use currency::{format_indicator, format_mxn};
pub use dashboard::{search, summarize, DashboardSummary, MonthCount, NameCount};
pub use document::{
    detect_format, extractor_for, get_extractor, read_statement, DocumentFormat, PdfTextExtractor,
    PlainTextExtractor, StatementDocument, TextExtractor,
};
pub use error::{ExtractionError, ExtractionResult};
pub use extraction::{
    balance_from_text, clean_response, parse_response, Extraction, ExtractionRecord, Extractor,
    NOT_FOUND,
};
pub use ledger::{Ledger, LedgerState, COLUMNS, EXPORT_FILE_NAME};
pub use llm::{build_prompt, CompletionProvider, CompletionRequest, OpenAiProvider};
pub use pipeline::{Pipeline, ProcessOutcome};
pub use report::ReportWriter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application title shown on every page
pub const APP_TITLE: &str = "Resumen Financiero Inteligente";
