// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// Use library instead of local modules
use resumen_financiero::config;
use resumen_financiero::extraction::field_label;
use resumen_financiero::logging::init_logger;
use resumen_financiero::{
    hash_password, search, AuditLog, ExtractionError, Ledger, LedgerState, Pipeline, Settings,
};

#[derive(Parser)]
#[command(name = "resumen")]
#[command(about = "Resumen Financiero Inteligente - estados de cuenta a datos clave")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract key data from a statement and generate its report
    Procesar {
        /// PDF (or .txt) statement
        archivo: PathBuf,
        /// Name recorded in the audit trail
        #[arg(short, long, default_value = "cli")]
        usuario: String,
    },
    /// Interactive dashboard over the extraction log
    Dashboard,
    /// Print logged rows matching a query
    Buscar { consulta: String },
    /// Show recent audit events
    Auditoria {
        #[arg(short, long, default_value_t = 20)]
        limite: usize,
    },
    /// Digest for RESUMEN_USUARIOS (`usuario:digest`)
    HashPassword { clave: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let vars = config::load_env();
    init_logger(&config::log_level(&vars));

    run(cli, &vars)
}

fn run(cli: Cli, vars: &HashMap<String, String>) -> Result<()> {
    // Needs no settings, so a broken RESUMEN_USUARIOS can still be fixed with it
    if let Commands::HashPassword { clave } = &cli.command {
        println!("{}", hash_password(clave));
        return Ok(());
    }

    let settings = Settings::from_map(vars)?;

    match cli.command {
        Commands::Procesar { archivo, usuario } => run_process(&settings, &archivo, &usuario)?,
        Commands::Dashboard => run_ui_mode(&settings)?,
        Commands::Buscar { consulta } => run_search(&settings, &consulta)?,
        Commands::Auditoria { limite } => run_audit(&settings, limite)?,
        Commands::HashPassword { .. } => {}
    }

    Ok(())
}

fn run_process(settings: &Settings, archivo: &Path, usuario: &str) -> Result<()> {
    println!("📄 Procesar Estado de Cuenta");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let bytes = std::fs::read(archivo)
        .with_context(|| format!("No se pudo leer {}", archivo.display()))?;
    let file_name = archivo
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let audit = Arc::new(Mutex::new(AuditLog::open(&settings.audit_path)?));
    let pipeline = Pipeline::from_settings(settings, audit)?;

    let document = pipeline.read_document(&file_name, &bytes)?;
    println!("✓ Texto extraído: {} caracteres", document.text.chars().count());

    println!("\n🔍 Analizando con IA...");
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(pipeline.analyze(&document, Local::now().date_naive(), usuario));

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(raw) = e
                .downcast_ref::<ExtractionError>()
                .and_then(|err| err.raw_response())
            {
                eprintln!("⚠️ Error al interpretar la respuesta como JSON.");
                eprintln!("{}", raw);
            }
            return Err(e);
        }
    };

    println!("\n✅ Datos extraídos por IA:");
    for (name, value) in outcome.record.fields() {
        println!("   {}: {}", field_label(name), value);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📥 Registro agregado a {}", pipeline.ledger().path().display());
    println!("📄 Reporte generado: {}", outcome.report_path.display());

    Ok(())
}

fn run_search(settings: &Settings, consulta: &str) -> Result<()> {
    let ledger = Ledger::open(&settings.csv_path)?;
    let records = match ledger.load()? {
        LedgerState::Missing => Vec::new(),
        LedgerState::Records(records) => records,
    };

    let matching = search(&records, consulta);
    println!("🔎 {} registros coinciden con \"{}\"\n", matching.len(), consulta);

    for record in matching {
        println!(
            "{} | {} | {} | {} | {} | {}",
            record.fecha, record.nombre, record.rfc, record.cuenta, record.saldo, record.tema
        );
    }

    Ok(())
}

fn run_audit(settings: &Settings, limite: usize) -> Result<()> {
    let audit = AuditLog::open(&settings.audit_path)?;
    let events = audit.recent(limite)?;

    println!("🧾 Últimos {} eventos\n", events.len());
    for event in events {
        println!(
            "{}  {:<20} {:<10} {:<12} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.actor,
            event.entity_type,
            event.data
        );
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(settings: &Settings) -> Result<()> {
    println!("🖥️  Cargando dashboard...\n");

    let ledger = Ledger::open(&settings.csv_path)?.load()?;
    let mut app = ui::App::from_ledger(ledger);
    ui::run_ui(&mut app)?;

    println!("\n✅ Dashboard cerrado");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_settings: &Settings) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use web UI: cargo run --bin resumen-server --features server");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["resumen", "auditoria", "--limite", "5"]);
        assert!(matches!(cli.command, Commands::Auditoria { limite: 5 }));

        let cli = Cli::parse_from(["resumen", "procesar", "estado.pdf"]);
        match cli.command {
            Commands::Procesar { archivo, usuario } => {
                assert_eq!(archivo, PathBuf::from("estado.pdf"));
                assert_eq!(usuario, "cli");
            }
            _ => panic!("expected procesar"),
        }
    }

    #[test]
    fn test_hash_password_ignores_broken_settings() {
        let vars: HashMap<String, String> =
            [("RESUMEN_USUARIOS".to_string(), "ana-sin-digest".to_string())]
                .into_iter()
                .collect();

        let cli = Cli::parse_from(["resumen", "hash-password", "secreta"]);
        assert!(run(cli, &vars).is_ok());

        let cli = Cli::parse_from(["resumen", "buscar", "ana"]);
        assert!(run(cli, &vars).is_err());
    }
}
