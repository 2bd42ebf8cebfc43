use movie_catalog_core::FieldErrors;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::error::Category;
use serde_json::{Map, Value};

use crate::ApiError;

/// Largest request body accepted by [`decode`].
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// Decode exactly one JSON value from `body` into `T`.
///
/// # Errors
/// Returns [`ApiError::EmptyBody`] for an empty (or whitespace-only) body and
/// [`ApiError::MalformedBody`] for oversized bodies, syntax errors, wrong
/// value types, unknown keys, or trailing data after the first value.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(ApiError::MalformedBody(format!(
            "body must not be larger than {MAX_BODY_BYTES} bytes"
        )));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::EmptyBody);
    }

    let mut deserializer = serde_json::Deserializer::from_slice(body);
    let value = T::deserialize(&mut deserializer).map_err(malformed)?;
    deserializer.end().map_err(|_| {
        ApiError::MalformedBody("body must only contain a single JSON value".to_string())
    })?;
    Ok(value)
}

fn malformed(err: serde_json::Error) -> ApiError {
    let message = match err.classify() {
        Category::Syntax => format!(
            "body contains badly-formed JSON (at line {} column {})",
            err.line(),
            err.column()
        ),
        Category::Eof => "body contains badly-formed JSON".to_string(),
        Category::Data => match unknown_field(&err.to_string()) {
            Some(field) => format!("body contains unknown key \"{field}\""),
            None => format!("body contains incorrect JSON type ({err})"),
        },
        Category::Io => format!("body could not be read ({err})"),
    };
    ApiError::MalformedBody(message)
}

fn unknown_field(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("unknown field `")?;
    rest.split('`').next()
}

/// Single-key JSON object wrapping a named payload or a named error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Wrap `payload` under `key`.
    ///
    /// # Errors
    /// Returns [`ApiError::Internal`] when `payload` cannot be represented as JSON.
    pub fn new(key: &str, payload: &impl Serialize) -> Result<Self, ApiError> {
        let value = serde_json::to_value(payload)
            .map_err(|err| ApiError::Internal(format!("failed to encode {key}: {err}")))?;
        Ok(Self::from_value(key, value))
    }

    /// `{"error": "<message>"}`
    #[must_use]
    pub fn error_message(message: &str) -> Self {
        Self::from_value("error", Value::String(message.to_string()))
    }

    /// `{"error": {"<field>": "<message>", ...}}`
    #[must_use]
    pub fn error_fields(errors: &FieldErrors) -> Self {
        let fields = errors
            .iter()
            .map(|(field, message)| (field.to_string(), Value::String(message.to_string())))
            .collect::<Map<_, _>>();
        Self::from_value("error", Value::Object(fields))
    }

    fn from_value(key: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        Self(map)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Render an envelope as indented JSON terminated by a newline.
///
/// # Errors
/// Returns [`ApiError::Internal`] when serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, ApiError> {
    let mut bytes = serde_json::to_vec_pretty(envelope)
        .map_err(|err| ApiError::Internal(format!("failed to encode envelope: {err}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use movie_catalog_core::{Movie, Runtime};

    use super::*;
    use crate::{CreateMovieRequest, Patch, UpdateMovieRequest};

    fn decode_err<T: DeserializeOwned + std::fmt::Debug>(body: &str) -> ApiError {
        match decode::<T>(body.as_bytes()) {
            Ok(value) => panic!("expected decode failure for {body:?}, got {value:?}"),
            Err(err) => err,
        }
    }

    fn malformed_message(err: ApiError) -> String {
        match err {
            ApiError::MalformedBody(message) => message,
            other => panic!("expected malformed body, got {other:?}"),
        }
    }

    #[test]
    fn decode_reads_a_complete_create_request() -> Result<(), ApiError> {
        let request: CreateMovieRequest = decode(
            br#"{"title":"Inception","year":2010,"runtime":"148 mins","genres":["sci-fi","thriller"]}"#,
        )?;
        assert_eq!(request.title, "Inception");
        assert_eq!(request.year, 2010);
        assert_eq!(request.runtime, Runtime(148));
        assert_eq!(request.genres, vec!["sci-fi".to_string(), "thriller".to_string()]);
        Ok(())
    }

    #[test]
    fn empty_and_whitespace_bodies_are_empty_body_errors() {
        assert_eq!(decode_err::<CreateMovieRequest>(""), ApiError::EmptyBody);
        assert_eq!(decode_err::<CreateMovieRequest>(" \n\t"), ApiError::EmptyBody);
    }

    #[test]
    fn syntax_errors_report_position() {
        let message = malformed_message(decode_err::<CreateMovieRequest>(r#"{"title": Inception}"#));
        assert!(message.starts_with("body contains badly-formed JSON (at line 1 column"), "{message}");

        let message = malformed_message(decode_err::<CreateMovieRequest>(r#"{"title": "#));
        assert_eq!(message, "body contains badly-formed JSON");
    }

    #[test]
    fn wrong_types_and_unknown_keys_are_malformed() {
        let message = malformed_message(decode_err::<CreateMovieRequest>(r#"{"title": 123}"#));
        assert!(message.starts_with("body contains incorrect JSON type"), "{message}");

        let message = malformed_message(decode_err::<CreateMovieRequest>(r#"{"runtime": "long"}"#));
        assert!(message.contains("invalid runtime format"), "{message}");

        let message = malformed_message(decode_err::<CreateMovieRequest>(r#"{"rating": 5}"#));
        assert_eq!(message, "body contains unknown key \"rating\"");

        let message = malformed_message(decode_err::<UpdateMovieRequest>(r#"{"version": 3}"#));
        assert_eq!(message, "body contains unknown key \"version\"");
    }

    #[test]
    fn trailing_values_are_rejected() {
        let message =
            malformed_message(decode_err::<CreateMovieRequest>(r#"{"title":"A"}{"title":"B"}"#));
        assert_eq!(message, "body must only contain a single JSON value");

        let message = malformed_message(decode_err::<CreateMovieRequest>(r#"{"title":"A"} x"#));
        assert_eq!(message, "body must only contain a single JSON value");
    }

    #[test]
    fn oversized_bodies_are_rejected_before_parsing() {
        let body = format!(r#"{{"title":"{}"}}"#, "a".repeat(MAX_BODY_BYTES));
        let message = malformed_message(decode_err::<CreateMovieRequest>(&body));
        assert_eq!(message, "body must not be larger than 1048576 bytes");
    }

    #[test]
    fn update_request_distinguishes_missing_null_and_values() -> Result<(), ApiError> {
        let request: UpdateMovieRequest = decode(br#"{"title": null, "year": 0}"#)?;
        assert_eq!(request.title, Patch::Null);
        assert_eq!(request.year, Patch::Value(0));
        assert_eq!(request.runtime, Patch::Missing);
        assert_eq!(request.genres, Patch::Missing);
        Ok(())
    }

    #[test]
    fn movie_envelope_round_trips_through_the_codec() -> Result<(), ApiError> {
        let mut movie = Movie::new(
            "Inception",
            2010,
            Runtime(148),
            vec!["sci-fi".to_string(), "thriller".to_string()],
        );
        movie.id = 7;
        movie.version = 3;

        let bytes = encode(&Envelope::new("movie", &movie)?)?;
        assert_eq!(bytes.last(), Some(&b'\n'));

        let value: Value = decode(&bytes)?;
        let Some(Value::Object(fields)) = value.get("movie") else {
            panic!("missing movie key in {value}");
        };
        let mut inner = fields.clone();
        inner.remove("id");
        inner.remove("version");

        let request: CreateMovieRequest = decode(&serde_json::to_vec(&inner).unwrap_or_default())?;
        assert!(request.into_movie().content_eq(&movie));
        Ok(())
    }

    #[test]
    fn error_envelopes_use_the_error_key() -> Result<(), ApiError> {
        let bytes = encode(&Envelope::error_message("the requested resource could not be found"))?;
        let value: Value = decode(&bytes)?;
        assert_eq!(
            value,
            serde_json::json!({"error": "the requested resource could not be found"})
        );

        let mut errors = FieldErrors::new();
        errors.add("title", "must be provided");
        errors.add("year", "must be greater than 1888");
        let envelope = Envelope::error_fields(&errors);
        assert_eq!(
            envelope.get("error"),
            Some(&serde_json::json!({"title": "must be provided", "year": "must be greater than 1888"}))
        );
        Ok(())
    }
}
