// Runtime settings from the environment (and `.env`)

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::auth::UserDirectory;
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TEMPERATURE};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Load `.env` if present and snapshot the process environment.
pub fn load_env() -> HashMap<String, String> {
    dotenv::dotenv().ok();
    std::env::vars().collect()
}

/// `RESUMEN_LOG`, readable before the rest of the settings are validated.
pub fn log_level(vars: &HashMap<String, String>) -> String {
    vars.get("RESUMEN_LOG")
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_LOG_LEVEL)
        .to_string()
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub csv_path: PathBuf,
    pub reports_dir: PathBuf,
    /// Logo image shown on the pages and in the HTML report
    pub logo_path: PathBuf,
    pub audit_path: PathBuf,
    pub users: UserDirectory,
    pub bind_addr: String,
    pub regex_fallback: bool,
    /// Include risks and recommendations in generated reports
    pub report_analysis: bool,
    pub log_level: String,
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_map(&load_env())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let temperature = match get("RESUMEN_TEMPERATURA") {
            Some(raw) => raw
                .parse::<f32>()
                .with_context(|| format!("RESUMEN_TEMPERATURA inválida: {}", raw))?,
            None => DEFAULT_TEMPERATURE,
        };

        let users = match get("RESUMEN_USUARIOS") {
            Some(entries) => UserDirectory::parse(&entries).context("RESUMEN_USUARIOS inválido")?,
            None => UserDirectory::demo(),
        };

        Ok(Settings {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get_or("OPENAI_BASE_URL", DEFAULT_BASE_URL),
            model: get_or("RESUMEN_MODELO", DEFAULT_MODEL),
            temperature,
            csv_path: PathBuf::from(get_or("RESUMEN_CSV", "resumen_finanzas_ninja.csv")),
            reports_dir: PathBuf::from(get_or("RESUMEN_REPORTES", "reportes")),
            logo_path: PathBuf::from(get_or("RESUMEN_LOGO", "ninjas_logo_md.jpg")),
            audit_path: PathBuf::from(get_or("RESUMEN_AUDITORIA", "auditoria.db")),
            users,
            bind_addr: get_or("RESUMEN_BIND", "0.0.0.0:3000"),
            regex_fallback: parse_flag(get("RESUMEN_FALLBACK_REGEX").as_deref(), true)?,
            report_analysis: parse_flag(get("RESUMEN_REPORTE_ANALISIS").as_deref(), true)?,
            log_level: log_level(vars),
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .context("OPENAI_API_KEY no está configurada")
    }
}

fn parse_flag(raw: Option<&str>, default: bool) -> Result<bool> {
    let Some(raw) = raw else {
        return Ok(default);
    };

    match raw.to_lowercase().as_str() {
        "1" | "true" | "si" | "sí" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("Valor booleano inválido: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_password;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_log_level_survives_invalid_settings() {
        let broken = vars(&[("RESUMEN_LOG", "debug"), ("RESUMEN_USUARIOS", "sin-digest")]);
        assert!(Settings::from_map(&broken).is_err());
        assert_eq!(log_level(&broken), "debug");

        assert_eq!(log_level(&vars(&[("RESUMEN_LOG", "  ")])), DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_map(&HashMap::new()).unwrap();

        assert_eq!(settings.openai_api_key, None);
        assert_eq!(settings.model, "gpt-3.5-turbo");
        assert!((settings.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(settings.csv_path, PathBuf::from("resumen_finanzas_ninja.csv"));
        assert_eq!(settings.reports_dir, PathBuf::from("reportes"));
        assert!(settings.regex_fallback);
        assert!(settings.report_analysis);
        assert!(settings.users.verify("admin", "ninja1929"));
        assert!(settings.require_api_key().is_err());
    }

    #[test]
    fn test_overrides() {
        let users = format!("ana:{}", hash_password("secreta"));
        let settings = Settings::from_map(&vars(&[
            ("OPENAI_API_KEY", "sk-123"),
            ("RESUMEN_MODELO", "gpt-4o-mini"),
            ("RESUMEN_TEMPERATURA", "0"),
            ("RESUMEN_FALLBACK_REGEX", "no"),
            ("RESUMEN_REPORTE_ANALISIS", "0"),
            ("RESUMEN_USUARIOS", &users),
        ]))
        .unwrap();

        assert_eq!(settings.require_api_key().unwrap(), "sk-123");
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.temperature, 0.0);
        assert!(!settings.regex_fallback);
        assert!(!settings.report_analysis);
        assert!(settings.users.verify("ana", "secreta"));
        assert!(!settings.users.verify("admin", "ninja1929"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(Settings::from_map(&vars(&[("RESUMEN_TEMPERATURA", "tibia")])).is_err());
        assert!(Settings::from_map(&vars(&[("RESUMEN_FALLBACK_REGEX", "quizas")])).is_err());
        assert!(Settings::from_map(&vars(&[("RESUMEN_USUARIOS", "ana:corto")])).is_err());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let settings = Settings::from_map(&vars(&[("OPENAI_API_KEY", "  "), ("RESUMEN_BIND", "")])).unwrap();
        assert_eq!(settings.openai_api_key, None);
        assert_eq!(settings.bind_addr, "0.0.0.0:3000");
    }
}
