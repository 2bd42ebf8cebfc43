use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;

mod memory;

pub use memory::InMemoryMovieStore;

pub const TITLE_MAX_CHARS: usize = 500;
pub const EARLIEST_RELEASE_YEAR: i32 = 1888;
pub const MIN_GENRES: usize = 1;
pub const MAX_GENRES: usize = 5;

/// Failure kinds shared by every [`MovieStore`] implementation.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("record not found")]
    RecordNotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Versioned CRUD contract over movie records.
///
/// The store owns `id`, `created_at` and `version`. Callers only ever set the
/// semantic fields (`title`, `year`, `runtime`, `genres`).
pub trait MovieStore: Send + Sync {
    /// Persist a new record and write the assigned `id`, `created_at` and
    /// `version = 1` back into `movie`.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when the backing store cannot be reached.
    fn insert(&self, movie: &mut Movie) -> Result<(), StoreError>;

    /// Fetch one record by identifier.
    ///
    /// # Errors
    /// Returns [`StoreError::RecordNotFound`] for `id <= 0` or an unknown id.
    fn get(&self, id: i64) -> Result<Movie, StoreError>;

    /// Compare-and-swap write keyed on `movie.id` and `movie.version`.
    ///
    /// On success `movie.version` holds the new stored version.
    ///
    /// # Errors
    /// Returns [`StoreError::EditConflict`] when no row matches both the id and
    /// the expected version, whether the row was deleted or advanced by another writer,
    /// and [`StoreError::Unavailable`] when the version counter is exhausted.
    fn update(&self, movie: &mut Movie) -> Result<(), StoreError>;

    /// Remove a record unconditionally.
    ///
    /// # Errors
    /// Returns [`StoreError::RecordNotFound`] for `id <= 0` or when nothing was removed.
    fn delete(&self, id: i64) -> Result<(), StoreError>;
}

/// Version assigned by a successful update of a record currently at `current`.
///
/// # Errors
/// Returns [`StoreError::Unavailable`] once the counter cannot advance.
pub fn next_version(current: i32) -> Result<i32, StoreError> {
    current
        .checked_add(1)
        .ok_or_else(|| StoreError::Unavailable(format!("version counter exhausted at {current}")))
}

/// Running time in whole minutes, rendered on the wire as `"<n> mins"`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Runtime(pub i32);

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("invalid runtime format")]
pub struct RuntimeFormatError;

impl Runtime {
    #[must_use]
    pub fn minutes(self) -> i32 {
        self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Display for Runtime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

impl FromStr for Runtime {
    type Err = RuntimeFormatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let minutes = value.strip_suffix(" mins").ok_or(RuntimeFormatError)?;
        minutes.parse::<i32>().map(Self).map_err(|_| RuntimeFormatError)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RuntimeVisitor;

        impl Visitor<'_> for RuntimeVisitor {
            type Value = Runtime;

            fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str("a runtime such as \"102 mins\" or a number of minutes")
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Runtime, E> {
                i32::try_from(value).map(Runtime).map_err(|_| E::custom(RuntimeFormatError))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Runtime, E> {
                i32::try_from(value).map(Runtime).map_err(|_| E::custom(RuntimeFormatError))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Runtime, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(RuntimeVisitor)
    }
}

/// Per-field validation messages, at most one per field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Record `message` for `field` unless the field already has one.
    pub fn add(&mut self, field: &str, message: &str) {
        self.0.entry(field.to_string()).or_insert_with(|| message.to_string());
    }

    /// Record `message` for `field` when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add(field, message);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(field, message)| (field.as_str(), message.as_str()))
    }
}

impl Display for FieldErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, message) in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

#[derive(Debug, Clone, Serialize)]
pub struct Movie {
    pub id: i64,
    #[serde(skip_serializing)]
    pub created_at: OffsetDateTime,
    pub title: String,
    #[serde(skip_serializing_if = "is_zero_year")]
    pub year: i32,
    #[serde(skip_serializing_if = "Runtime::is_zero")]
    pub runtime: Runtime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    pub version: i32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_year(year: &i32) -> bool {
    *year == 0
}

impl Movie {
    /// Build an unsaved record. The store assigns `id`, `created_at` and `version`.
    #[must_use]
    pub fn new(title: impl Into<String>, year: i32, runtime: Runtime, genres: Vec<String>) -> Self {
        Self {
            id: 0,
            created_at: OffsetDateTime::UNIX_EPOCH,
            title: title.into(),
            year,
            runtime,
            genres,
            version: 0,
        }
    }

    /// Validate the semantic fields against the current calendar year.
    ///
    /// # Errors
    /// Returns every violated field, keyed by field name.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        self.validate_as_of(OffsetDateTime::now_utc().year())
    }

    /// Validate the semantic fields with an explicit reference year.
    ///
    /// # Errors
    /// Returns every violated field, keyed by field name.
    pub fn validate_as_of(&self, current_year: i32) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        errors.check(!self.title.is_empty(), "title", "must be provided");
        errors.check(
            self.title.chars().count() <= TITLE_MAX_CHARS,
            "title",
            "must not be more than 500 characters long",
        );

        errors.check(self.year != 0, "year", "must be provided");
        errors.check(self.year >= EARLIEST_RELEASE_YEAR, "year", "must be greater than 1888");
        errors.check(self.year <= current_year + 1, "year", "must not be in the future");

        errors.check(!self.runtime.is_zero(), "runtime", "must be provided");
        errors.check(self.runtime.minutes() > 0, "runtime", "must be a positive integer");

        errors.check(self.genres.len() >= MIN_GENRES, "genres", "must contain at least 1 genre");
        errors.check(
            self.genres.len() <= MAX_GENRES,
            "genres",
            "must not contain more than 5 genres",
        );
        errors.check(
            self.genres.iter().all(|genre| !genre.is_empty()),
            "genres",
            "must not contain empty values",
        );
        errors.check(unique(&self.genres), "genres", "must not contain duplicate values");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Compare visible content only: `id`, `version` and `created_at` are ignored
    /// and genres compare as a set.
    #[must_use]
    pub fn content_eq(&self, other: &Movie) -> bool {
        self.title == other.title
            && self.year == other.year
            && self.runtime == other.runtime
            && self.genres.iter().collect::<BTreeSet<_>>()
                == other.genres.iter().collect::<BTreeSet<_>>()
    }
}

fn unique(values: &[String]) -> bool {
    let mut seen = BTreeSet::new();
    values.iter().all(|value| seen.insert(value.as_str()))
}

/// Insert timestamp, truncated to whole seconds.
#[must_use]
pub fn creation_timestamp() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}
