// Extraction log - one CSV row per processed statement

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::extraction::ExtractionRecord;

/// Column order of the log file
pub const COLUMNS: [&str; 8] = [
    "nombre",
    "rfc",
    "cuenta",
    "saldo",
    "tema",
    "riesgos",
    "recomendaciones",
    "fecha",
];

/// File name offered when the log is downloaded
pub const EXPORT_FILE_NAME: &str = "resumen_finanzas_ninja.csv";

/// What `Ledger::load` found on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerState {
    /// No log file yet
    Missing,
    Records(Vec<ExtractionRecord>),
}

impl LedgerState {
    pub fn records(&self) -> &[ExtractionRecord] {
        match self {
            LedgerState::Missing => &[],
            LedgerState::Records(records) => records,
        }
    }
}

pub struct Ledger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Open the log, creating it with a header row if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let ledger = Ledger {
            path: path.into(),
            write_lock: Mutex::new(()),
        };
        ledger.ensure_header()?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_header(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        writer.write_record(COLUMNS)?;
        writer.flush()?;

        info!(path = %self.path.display(), "Created extraction log");
        Ok(())
    }

    /// Rewrite a log whose header is not `COLUMNS` (older logs lack `fecha`).
    ///
    /// Rows keep their values; columns missing from the old header are left
    /// empty. Runs before an append so the file never mixes row widths.
    fn upgrade_header(&self) -> Result<()> {
        let mut rdr = csv::Reader::from_path(&self.path).context("Failed to open CSV file")?;
        let headers = rdr.headers().context("Failed to read CSV header")?.clone();
        if headers.iter().eq(COLUMNS.iter().copied()) {
            return Ok(());
        }

        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: ExtractionRecord = result.context("Failed to deserialize extraction row")?;
            records.push(record);
        }

        let staging = self.path.with_extension("csv.tmp");
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;
        writer.write_record(COLUMNS)?;
        for record in &records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&staging, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            rows = records.len(),
            "Upgraded extraction log header"
        );
        Ok(())
    }

    /// Append one row; existing rows are never rewritten.
    pub fn append(&self, record: &ExtractionRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Extraction log lock poisoned"))?;

        self.ensure_header()?;
        self.upgrade_header()?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .serialize(record)
            .context("Failed to write extraction row")?;
        writer.flush()?;

        debug!(nombre = %record.nombre, "Extraction appended to log");
        Ok(())
    }

    pub fn load(&self) -> Result<LedgerState> {
        if !self.path.exists() {
            return Ok(LedgerState::Missing);
        }

        let mut rdr = csv::Reader::from_path(&self.path).context("Failed to open CSV file")?;

        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: ExtractionRecord = result.context("Failed to deserialize extraction row")?;
            records.push(record);
        }

        Ok(LedgerState::Records(records))
    }

    /// Whole log file, as offered for download.
    pub fn export_bytes(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("Failed to read {}", self.path.display()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
