use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use strata_index::chunker::{Chunker, ChunkingStrategy, StrategyKind};
use strata_index::tokens::{TokenCounter, TokenizerProvider, estimator_for};

fn generate_text(size: usize) -> String {
    let paragraph = "The quick brown fox jumps over the lazy dog. \
                     This sentence contains various English words and punctuation marks.\n\n";
    paragraph.repeat(size / paragraph.len() + 1)[..size].to_string()
}

fn generate_code(size: usize) -> String {
    let function = "pub fn load_config(path: &Path) -> Result<Config> {\n    \
                    let raw = std::fs::read_to_string(path)?;\n    \
                    Ok(toml::from_str(&raw)?)\n}\n\n";
    function.repeat(size / function.len() + 1)[..size].to_string()
}

fn token_estimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("count_tokens");

    for provider in [
        TokenizerProvider::Generic,
        TokenizerProvider::OpenAi,
        TokenizerProvider::Llama,
    ] {
        let estimator = estimator_for(provider);
        for size in [1_000, 10_000, 100_000] {
            let input = generate_text(size);
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(provider.as_str(), size),
                &input,
                |b, input| {
                    b.iter(|| estimator.count_tokens(black_box(input)));
                },
            );
        }
    }

    group.finish();
}

fn truncation(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncate");
    let estimator = estimator_for(TokenizerProvider::Generic);
    let input = generate_text(20_000);

    for budget in [64, 512, 2_048] {
        group.bench_with_input(BenchmarkId::new("prose", budget), &budget, |b, &budget| {
            b.iter(|| estimator.truncate(black_box(&input), budget));
        });
    }

    group.finish();
}

fn chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk");
    let counter: Arc<dyn TokenCounter> = Arc::new(estimator_for(TokenizerProvider::Generic));
    let text = generate_text(50_000);
    let code = generate_code(50_000);

    let semantic = Chunker::new(ChunkingStrategy::Semantic, Arc::clone(&counter));
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("semantic_512", |b| {
        b.iter(|| semantic.chunk(black_box(&text), 512, StrategyKind::Semantic));
    });

    let language = strata_index::languages::Lang::Rust;
    let structural = Chunker::new(ChunkingStrategy::CodeStructure { language }, counter);
    group.throughput(Throughput::Bytes(code.len() as u64));
    group.bench_function("code_structure_512", |b| {
        b.iter(|| structural.chunk_code(black_box(&code), 512, language));
    });

    group.finish();
}

criterion_group!(benches, token_estimation, truncation, chunking);
criterion_main!(benches);
