//! Ingest a handful of teachings into an in-memory index, retrieve for a question
//! and show the grounded prompt. With `GOOGLE_API_KEY` set, the prompt is also
//! sent to Gemini.

use sunzi_embed::EmbedConfig;
use sunzi_rag::{ApiKey, Components, RagConfig, StorageConfig, StorageKind};

const TEACHINGS: &str = "\
All warfare is based on deception.
If you know the enemy and know yourself, you need not fear the result of a hundred battles.
The supreme art of war is to subdue the enemy without fighting.
Let your plans be dark and impenetrable as night.
In the midst of chaos, there is also opportunity.
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = RagConfig {
        embedding: EmbedConfig::hashing(512),
        storage: StorageConfig {
            mode: StorageKind::Memory,
            ..StorageConfig::default()
        },
        ..RagConfig::default()
    };
    let components = Components::init(config, ApiKey::from_env()).await?;

    let collection = components.config.collection.clone();
    let report = components
        .ingestor()?
        .ingest_text(&collection, TEACHINGS)
        .await?;
    println!("Indexed {} teachings into '{}'", report.chunks, collection);

    let question = "How can I win without a battle?";
    let retrieved = components
        .retriever()
        .retrieve(&collection, question, components.config.top_k)
        .await?;
    for scored in &retrieved {
        println!("  {:.3}  {}", scored.score, scored.chunk.text());
    }

    match components.pipeline() {
        Ok(pipeline) => {
            let answer = pipeline
                .answer_from(question, retrieved, std::future::pending())
                .await?;
            println!("\n{}", answer.text);
        }
        Err(_) => {
            let prompt = sunzi_rag::PromptAssembler::default().assemble(&retrieved, question);
            println!("\nNo API key set; this is the prompt that would be sent:\n\n{prompt}");
        }
    }
    Ok(())
}
