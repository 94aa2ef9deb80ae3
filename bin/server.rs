// Resumen Financiero - Web Server
// Upload, dashboard and downloads behind a login, with Axum

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tracing::info;

use resumen_financiero::config;
use resumen_financiero::logging::init_logger;
use resumen_financiero::server::{build_router, AppState};
use resumen_financiero::{AuditLog, Pipeline, Settings};

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    println!("🌐 Resumen Financiero Inteligente - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    init_logger(&config::log_level(&config::load_env()));
    let settings = Settings::from_env()?;

    let audit = AuditLog::open(&settings.audit_path)?;
    println!("✓ Audit trail opened: {:?}", settings.audit_path);

    let pipeline = Pipeline::from_settings(&settings, Arc::new(Mutex::new(audit)))?;
    println!("✓ Extraction log: {:?}", pipeline.ledger().path());
    println!("✓ Reports folder: {:?}", pipeline.reports().dir());
    println!("✓ Users configured: {}", settings.users.len());

    let state = AppState::new(&settings, pipeline);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind_addr))?;

    info!(addr = %settings.bind_addr, model = %settings.model, "Server listening");
    println!("\n🚀 Server running on http://{}", settings.bind_addr);
    println!("   UI:  http://{}/login", settings.bind_addr);
    println!("   API: http://{}/api/health", settings.bind_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
