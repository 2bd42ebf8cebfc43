use criterion::{criterion_group, criterion_main, Criterion};
use movie_catalog_core::{InMemoryMovieStore, Movie, MovieStore, Runtime};

fn mk_movie(index: usize) -> Movie {
    Movie::new(
        format!("Bench movie {index}"),
        1990 + i32::try_from(index % 30).unwrap_or(0),
        Runtime(90 + i32::try_from(index % 60).unwrap_or(0)),
        vec!["drama".to_string(), "thriller".to_string(), format!("tag-{}", index % 7)],
    )
}

fn bench_validate(c: &mut Criterion) {
    let movies = (0..1_000).map(mk_movie).collect::<Vec<_>>();

    c.bench_function("validate_1000_movies", |b| {
        b.iter(|| {
            for movie in &movies {
                if let Err(err) = movie.validate_as_of(2026) {
                    panic!("validate benchmark fixture rejected: {err}");
                }
            }
        });
    });
}

fn bench_in_memory_update(c: &mut Criterion) {
    let store = InMemoryMovieStore::new();
    let mut movie = mk_movie(0);
    if let Err(err) = store.insert(&mut movie) {
        panic!("bench insert failed: {err}");
    }

    c.bench_function("in_memory_compare_and_swap_update", |b| {
        b.iter(|| {
            if let Err(err) = store.update(&mut movie) {
                panic!("bench update failed: {err}");
            }
        });
    });
}

criterion_group!(benches, bench_validate, bench_in_memory_update);
criterion_main!(benches);
