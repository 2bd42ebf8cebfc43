use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use movie_catalog_core::{Movie, MovieStore, Runtime};
use serde::{Deserialize, Deserializer};

mod codec;
mod error;

pub use codec::{decode, encode, Envelope, MAX_BODY_BYTES};
pub use error::ApiError;

/// Body of `POST /v1/movies`. Absent fields decode to zero values so they
/// surface as validation failures rather than malformed bodies.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CreateMovieRequest {
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    pub genres: Vec<String>,
}

impl CreateMovieRequest {
    #[must_use]
    pub fn into_movie(self) -> Movie {
        Movie::new(self.title, self.year, self.runtime, self.genres)
    }
}

/// One optional slot of a partial update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    /// Key absent from the body: keep the stored value.
    #[default]
    Missing,
    /// Explicit `null`: reset to the zero value, which validation then rejects.
    Null,
    Value(T),
}

impl<T: Default> Patch<T> {
    pub fn apply(self, slot: &mut T) {
        match self {
            Self::Missing => {}
            Self::Null => *slot = T::default(),
            Self::Value(value) => *slot = value,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(|value| value.map_or(Self::Null, Self::Value))
    }
}

/// Body of `PUT /v1/movies/{id}`. Only the keys present are applied.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct UpdateMovieRequest {
    pub title: Patch<String>,
    pub year: Patch<i32>,
    pub runtime: Patch<Runtime>,
    pub genres: Patch<Vec<String>>,
}

impl UpdateMovieRequest {
    pub fn apply_to(self, movie: &mut Movie) {
        self.title.apply(&mut movie.title);
        self.year.apply(&mut movie.year);
        self.runtime.apply(&mut movie.runtime);
        self.genres.apply(&mut movie.genres);
    }
}

/// Per-operation orchestration over a [`MovieStore`]: validate, persist, and
/// translate store outcomes into [`ApiError`] variants.
#[derive(Clone)]
pub struct MoviesApi {
    store: Arc<dyn MovieStore>,
}

impl Debug for MoviesApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoviesApi").finish_non_exhaustive()
    }
}

impl MoviesApi {
    #[must_use]
    pub fn new(store: Arc<dyn MovieStore>) -> Self {
        Self { store }
    }

    /// Validate and insert a new movie.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] with every violated field, or a store failure.
    pub fn create_movie(&self, input: CreateMovieRequest) -> Result<Movie, ApiError> {
        let mut movie = input.into_movie();
        movie.validate()?;
        self.store.insert(&mut movie)?;
        Ok(movie)
    }

    /// Fetch one movie.
    ///
    /// # Errors
    /// Returns [`ApiError::RecordNotFound`] for reserved or unknown ids.
    pub fn show_movie(&self, id: i64) -> Result<Movie, ApiError> {
        Ok(self.store.get(id)?)
    }

    /// Apply a partial update on top of the stored record and write it back
    /// at the version that was read.
    ///
    /// # Errors
    /// Returns [`ApiError::RecordNotFound`] when the movie does not exist,
    /// [`ApiError::Validation`] when the merged record is invalid, and
    /// [`ApiError::EditConflict`] when another writer got there first.
    pub fn update_movie(&self, id: i64, input: UpdateMovieRequest) -> Result<Movie, ApiError> {
        let mut movie = self.store.get(id)?;
        input.apply_to(&mut movie);
        movie.validate()?;
        self.store.update(&mut movie)?;
        Ok(movie)
    }

    /// Delete one movie.
    ///
    /// # Errors
    /// Returns [`ApiError::RecordNotFound`] when nothing was deleted.
    pub fn delete_movie(&self, id: i64) -> Result<(), ApiError> {
        Ok(self.store.delete(id)?)
    }
}

#[cfg(test)]
mod tests {
    use movie_catalog_core::{InMemoryMovieStore, StoreError};

    use super::*;

    fn inception_request() -> CreateMovieRequest {
        CreateMovieRequest {
            title: "Inception".to_string(),
            year: 2010,
            runtime: Runtime(148),
            genres: vec!["sci-fi".to_string(), "thriller".to_string()],
        }
    }

    fn api() -> (MoviesApi, Arc<InMemoryMovieStore>) {
        let store = Arc::new(InMemoryMovieStore::new());
        (MoviesApi::new(store.clone()), store)
    }

    /// Advances the stored version behind the API's back.
    struct RacingStore {
        inner: InMemoryMovieStore,
    }

    impl MovieStore for RacingStore {
        fn insert(&self, movie: &mut Movie) -> Result<(), StoreError> {
            self.inner.insert(movie)
        }

        fn get(&self, id: i64) -> Result<Movie, StoreError> {
            let movie = self.inner.get(id)?;
            let mut racer = movie.clone();
            racer.title = format!("{} (edited elsewhere)", racer.title);
            self.inner.update(&mut racer)?;
            Ok(movie)
        }

        fn update(&self, movie: &mut Movie) -> Result<(), StoreError> {
            self.inner.update(movie)
        }

        fn delete(&self, id: i64) -> Result<(), StoreError> {
            self.inner.delete(id)
        }
    }

    #[test]
    fn create_assigns_identity_and_first_version() -> Result<(), ApiError> {
        let (api, store) = api();
        let movie = api.create_movie(inception_request())?;
        assert!(movie.id > 0);
        assert_eq!(movie.version, 1);
        assert_eq!(store.len()?, 1);
        Ok(())
    }

    #[test]
    fn create_reports_all_field_errors_without_touching_the_store() {
        let (api, store) = api();
        let mut request = inception_request();
        request.title = String::new();
        request.year = 1700;

        let Err(ApiError::Validation(errors)) = api.create_movie(request) else {
            panic!("expected validation error");
        };
        assert_eq!(errors.get("title"), Some("must be provided"));
        assert_eq!(errors.get("year"), Some("must be greater than 1888"));
        assert_eq!(store.is_empty(), Ok(true));
    }

    #[test]
    fn partial_update_keeps_absent_fields_and_bumps_version() -> Result<(), ApiError> {
        let (api, _) = api();
        let created = api.create_movie(inception_request())?;

        let request = UpdateMovieRequest { runtime: Patch::Value(Runtime(150)), ..Default::default() };
        let updated = api.update_movie(created.id, request)?;

        assert_eq!(updated.version, 2);
        assert_eq!(updated.runtime, Runtime(150));
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.genres, created.genres);
        assert_eq!(api.show_movie(created.id)?.version, 2);
        Ok(())
    }

    #[test]
    fn explicit_null_clears_a_field_and_fails_validation() -> Result<(), ApiError> {
        let (api, _) = api();
        let created = api.create_movie(inception_request())?;

        let request = UpdateMovieRequest { title: Patch::Null, ..Default::default() };
        let Err(ApiError::Validation(errors)) = api.update_movie(created.id, request) else {
            panic!("expected validation error");
        };
        assert_eq!(errors.get("title"), Some("must be provided"));
        assert_eq!(api.show_movie(created.id)?.version, 1);
        Ok(())
    }

    #[test]
    fn update_of_missing_movie_is_not_found() {
        let (api, _) = api();
        for id in [0, -3, 99] {
            assert_eq!(
                api.update_movie(id, UpdateMovieRequest::default()).err(),
                Some(ApiError::RecordNotFound)
            );
        }
    }

    #[test]
    fn concurrent_edit_between_read_and_write_is_a_conflict() -> Result<(), ApiError> {
        let store = Arc::new(RacingStore { inner: InMemoryMovieStore::new() });
        let api = MoviesApi::new(store.clone());
        let created = api.create_movie(inception_request())?;

        let request = UpdateMovieRequest { runtime: Patch::Value(Runtime(150)), ..Default::default() };
        assert_eq!(api.update_movie(created.id, request).err(), Some(ApiError::EditConflict));

        let stored = store.inner.get(created.id)?;
        assert_eq!(stored.version, 2);
        assert_eq!(stored.runtime, Runtime(148));
        Ok(())
    }

    #[test]
    fn delete_then_show_is_not_found() -> Result<(), ApiError> {
        let (api, _) = api();
        let created = api.create_movie(inception_request())?;
        api.delete_movie(created.id)?;
        assert_eq!(api.show_movie(created.id).err(), Some(ApiError::RecordNotFound));
        assert_eq!(api.delete_movie(created.id).err(), Some(ApiError::RecordNotFound));
        Ok(())
    }

    #[test]
    fn store_errors_map_onto_api_variants() {
        assert_eq!(ApiError::from(StoreError::RecordNotFound), ApiError::RecordNotFound);
        assert_eq!(ApiError::from(StoreError::EditConflict), ApiError::EditConflict);
        assert_eq!(
            ApiError::from(StoreError::Unavailable("disk I/O error".to_string())),
            ApiError::StoreUnavailable("disk I/O error".to_string())
        );
    }
}
