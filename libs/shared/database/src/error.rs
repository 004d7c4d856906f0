use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unauthorized database access: {0}")]
    Unauthorized(String),

    /// Raised by a database function (`RAISE EXCEPTION`), carrying its message.
    #[error("Database rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode database response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
pub(crate) struct PostgrestErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
}

impl DatabaseError {
    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<PostgrestErrorBody> = serde_json::from_str(body).ok();
        let (code, message) = match parsed {
            Some(err) => (
                err.code.unwrap_or_default(),
                err.message.or(err.details).unwrap_or_else(|| body.to_string()),
            ),
            None => (String::new(), body.to_string()),
        };

        match (status, code.as_str()) {
            (_, "23505") | (409, _) => DatabaseError::Duplicate(message),
            (401 | 403, _) => DatabaseError::Unauthorized(message),
            (404, _) => DatabaseError::NotFound(message),
            (_, "P0001") => DatabaseError::Rejected { code, message },
            _ => DatabaseError::Api { status, message },
        }
    }

    /// Message of a function-raised rejection, if this is one.
    pub fn rejection_message(&self) -> Option<&str> {
        match self {
            DatabaseError::Rejected { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn unique_violation_is_duplicate() {
        let body = r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#;
        assert_matches!(DatabaseError::from_response(409, body), DatabaseError::Duplicate(_));
    }

    #[test]
    fn raised_exception_is_rejected_with_message() {
        let body = r#"{"code":"P0001","message":"SLOT_NOT_AVAILABLE","details":null,"hint":null}"#;
        let err = DatabaseError::from_response(400, body);
        assert_eq!(err.rejection_message(), Some("SLOT_NOT_AVAILABLE"));
    }

    #[test]
    fn unparseable_body_falls_back_to_api_error() {
        assert_matches!(
            DatabaseError::from_response(502, "bad gateway"),
            DatabaseError::Api { status: 502, .. }
        );
    }
}
