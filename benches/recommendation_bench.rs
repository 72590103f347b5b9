use criterion::{black_box, criterion_group, criterion_main, Criterion};
use movierec::algorithms::{
    CollaborativeRanker, ContentRanker, FeatureMatrix, PopularityRanker, Ranker, RankingInput,
};
use movierec::services::cache::NoCache;
use movierec::services::recommendation::RecommendationService;
use movierec::services::store::InMemoryStore;
use movierec::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const GENRES: [&str; 8] = ["Action", "Comedy", "Drama", "Horror", "Romance", "Sci-Fi", "Thriller", "Crime"];

fn synthetic_catalog(rng: &mut StdRng, items: i64) -> Vec<Item> {
    (1..=items)
        .map(|item_id| {
            let genres: Vec<&str> = GENRES.iter().copied().filter(|_| rng.gen_bool(0.25)).collect();
            Item::new(
                item_id,
                format!("Movie {}", item_id),
                Some(rng.gen_range(1950..2020)),
                genres.join("|"),
            )
        })
        .collect()
}

fn synthetic_ratings(rng: &mut StdRng, users: i64, items: i64, per_user: usize) -> Vec<Rating> {
    let mut ratings = Vec::new();
    for user_id in 1..=users {
        let mut seen = std::collections::HashSet::new();
        while seen.len() < per_user {
            let item_id = rng.gen_range(1..=items);
            if seen.insert(item_id) {
                let value = f64::from(rng.gen_range(1..=10i32)) / 2.0;
                ratings.push(Rating::new(user_id, item_id, value, 0));
            }
        }
    }
    ratings
}

fn benchmark_rankers(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let items = synthetic_catalog(&mut rng, 2_000);
    let ratings = synthetic_ratings(&mut rng, 500, 2_000, 40);
    let input = RankingInput {
        items: &items,
        ratings: &ratings,
    };

    c.bench_function("feature_matrix_build", |b| {
        b.iter(|| black_box(FeatureMatrix::build(&items)));
    });

    let content = ContentRanker::new(5.0);
    c.bench_function("content_rank_top20", |b| {
        b.iter(|| black_box(content.rank(&input, 42, 20)));
    });

    let collaborative = CollaborativeRanker::new(1e-9);
    c.bench_function("collaborative_rank_top20", |b| {
        b.iter(|| black_box(collaborative.rank(&input, 42, 20)));
    });

    let popular = PopularityRanker::new(5, 50.0);
    c.bench_function("popularity_rank_top20", |b| {
        b.iter(|| black_box(popular.rank(&input, 42, 20)));
    });
}

fn benchmark_service(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let items = synthetic_catalog(&mut rng, 1_000);
    let ratings = synthetic_ratings(&mut rng, 200, 1_000, 30);

    let store = InMemoryStore::new();
    rt.block_on(async {
        store.load_catalog(items).await;
        store.load_ratings(ratings).await;
    });
    let service = RecommendationService::new(Arc::new(store), Arc::new(NoCache), Arc::new(Config::default()));

    c.bench_function("service_recommend_uncached", |b| {
        b.to_async(&rt).iter(|| async { black_box(service.recommend(17, 20).await) });
    });
}

criterion_group!(benches, benchmark_rankers, benchmark_service);
criterion_main!(benches);
