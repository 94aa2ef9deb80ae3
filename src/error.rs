use thiserror::Error;

/// Failures of the extraction core that the UI needs to tell apart.
///
/// Everything else in the crate travels as `anyhow::Error`; callers use
/// `downcast_ref::<ExtractionError>()` to recover the raw model reply.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Error al interpretar la respuesta como JSON: {source}")]
    InvalidJson {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("La respuesta del modelo no es un objeto JSON")]
    NotAnObject { raw: String },

    #[error("El modelo devolvió una respuesta vacía")]
    EmptyResponse,

    #[error("Fallo en la llamada al modelo: {0}")]
    Completion(anyhow::Error),

    #[error("Formato de documento no soportado: {0}")]
    UnsupportedFormat(String),

    #[error("El documento no contiene texto extraíble")]
    EmptyDocument,

    #[error("No se pudo leer el documento: {0}")]
    Document(String),
}

impl ExtractionError {
    /// Raw model content, when the failure happened after the model replied.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            ExtractionError::InvalidJson { raw, .. } | ExtractionError::NotAnObject { raw } => {
                Some(raw)
            }
            _ => None,
        }
    }
}

pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;
