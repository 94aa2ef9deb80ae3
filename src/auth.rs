// 🔐 Access gate - configured users and in-memory sessions

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub const MSG_BAD_CREDENTIALS: &str = "Credenciales incorrectas";

/// Password used for the demo accounts when no users are configured
const DEMO_PASSWORD: &str = "ninja1929";
const DEMO_USERS: [&str; 2] = ["admin", "cliente1"];

/// SHA-256 hex digest, the format stored in `RESUMEN_USUARIOS`.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Username -> password digest
#[derive(Debug, Clone)]
pub struct UserDirectory {
    users: HashMap<String, String>,
}

impl UserDirectory {
    /// Parse `usuario:digest,usuario2:digest2`.
    pub fn parse(entries: &str) -> Result<Self> {
        let mut users = HashMap::new();

        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((user, digest)) = entry.split_once(':') else {
                bail!("Entrada de usuario inválida (se esperaba usuario:sha256): {}", entry);
            };
            let digest = digest.trim().to_lowercase();
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                bail!("El hash de '{}' no es un SHA-256 hexadecimal", user.trim());
            }
            users.insert(user.trim().to_string(), digest);
        }

        if users.is_empty() {
            bail!("No hay usuarios configurados");
        }

        Ok(Self { users })
    }

    /// The two demo accounts.
    pub fn demo() -> Self {
        warn!("RESUMEN_USUARIOS not set, using demo accounts");
        let digest = hash_password(DEMO_PASSWORD);
        let users = DEMO_USERS
            .iter()
            .map(|user| (user.to_string(), digest.clone()))
            .collect();
        Self { users }
    }

    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.users
            .get(user)
            .map(|digest| *digest == hash_password(password))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub usuario: String,
    pub iniciada: DateTime<Utc>,
}

/// Token -> session. Cloning shares the same store.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session and return its token.
    pub fn login(&self, usuario: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        let session = Session {
            usuario: usuario.to_string(),
            iniciada: Utc::now(),
        };
        self.lock().insert(token.clone(), session);
        token
    }

    pub fn user_for(&self, token: &str) -> Option<String> {
        self.lock().get(token).map(|s| s.usuario.clone())
    }

    /// End a session; returns the user it belonged to.
    pub fn logout(&self, token: &str) -> Option<String> {
        self.lock().remove(token).map(|s| s.usuario)
    }

    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        // A panic while holding the lock leaves the map itself intact
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
