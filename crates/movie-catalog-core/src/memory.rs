use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::{creation_timestamp, next_version, Movie, MovieStore, StoreError};

/// Process-local [`MovieStore`] keyed by identifier.
///
/// Reproduces the error conditions of the SQLite store so handlers can be
/// exercised without a database file.
#[derive(Debug, Default)]
pub struct InMemoryMovieStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    movies: BTreeMap<i64, Movie>,
}

impl InMemoryMovieStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when the lock is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.movies.len())
    }

    /// # Errors
    /// Returns [`StoreError::Unavailable`] when the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.movies.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

impl MovieStore for InMemoryMovieStore {
    fn insert(&self, movie: &mut Movie) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.last_id += 1;
        movie.id = state.last_id;
        movie.created_at = creation_timestamp();
        movie.version = 1;
        state.movies.insert(movie.id, movie.clone());
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Movie, StoreError> {
        if id < 1 {
            return Err(StoreError::RecordNotFound);
        }
        self.lock()?.movies.get(&id).cloned().ok_or(StoreError::RecordNotFound)
    }

    fn update(&self, movie: &mut Movie) -> Result<(), StoreError> {
        let version = next_version(movie.version)?;
        let mut state = self.lock()?;
        let Some(stored) = state.movies.get_mut(&movie.id) else {
            return Err(StoreError::EditConflict);
        };
        if stored.version != movie.version {
            return Err(StoreError::EditConflict);
        }

        stored.title.clone_from(&movie.title);
        stored.year = movie.year;
        stored.runtime = movie.runtime;
        stored.genres.clone_from(&movie.genres);
        stored.version = version;
        movie.version = version;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), StoreError> {
        if id < 1 {
            return Err(StoreError::RecordNotFound);
        }
        match self.lock()?.movies.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::RecordNotFound),
        }
    }
}
