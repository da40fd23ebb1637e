//! Embed a few teachings and print their pairwise cosine similarities.
//!
//! Runs with the offline hashing provider by default; pass `--fastembed` to load
//! the multilingual ONNX model instead (downloads it on first use).

use sunzi_embed::{EmbedConfig, EmbeddingProvider, create_provider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let use_fastembed = std::env::args().any(|arg| arg == "--fastembed");
    let config = if use_fastembed {
        EmbedConfig::default().with_batch_size(2)
    } else {
        EmbedConfig::hashing(256)
    };

    let provider = create_provider(&config).await?;
    println!(
        "Provider: {} ({}), dimension {}",
        provider.provider_name(),
        provider.model_id(),
        provider.embedding_dimension()
    );

    let texts = vec![
        "Know your enemy and know yourself.".to_string(),
        "If you know the enemy and know yourself, you need not fear a hundred battles."
            .to_string(),
        "Water shapes its course according to the ground.".to_string(),
    ];
    let result = provider.embed_texts(&texts).await?;

    for (i, a) in result.embeddings.iter().enumerate() {
        for (j, b) in result.embeddings.iter().enumerate().skip(i + 1) {
            let similarity: f32 = a.iter().zip(b).map(|(x, y)| x.to_f32() * y.to_f32()).sum();
            println!("  [{i}] vs [{j}]: {similarity:.3}");
        }
    }

    Ok(())
}
