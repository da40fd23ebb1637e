use clap::Parser;
use std::fs;
use std::io::{self, Read};
use sunzi_chunk::{Boundary, Chunker, ChunkerConfig, DEFAULT_MIN_CHARS};

/// Chunk a corpus file and print the chunks as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the corpus file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Label prefix used in each chunk's source label.
    #[arg(short, long)]
    label: Option<String>,

    /// Treat blank-line separated paragraphs as units instead of lines.
    #[arg(long, conflicts_with = "pattern")]
    paragraphs: bool,

    /// Custom regex separating units.
    #[arg(long)]
    pattern: Option<String>,

    /// Minimum number of characters in a chunk.
    #[arg(long, default_value_t = DEFAULT_MIN_CHARS)]
    min_chars: usize,

    /// Maximum number of characters in a chunk.
    #[arg(long)]
    max_chars: Option<usize>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = &args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let label = args
        .label
        .or_else(|| {
            args.input.as_deref().map(|path| {
                std::path::Path::new(path)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string())
            })
        })
        .unwrap_or_else(|| "stdin".to_string());

    let boundary = match (args.paragraphs, args.pattern) {
        (_, Some(pattern)) => Boundary::Pattern(pattern),
        (true, None) => Boundary::Paragraph,
        (false, None) => Boundary::Line,
    };

    let mut config = ChunkerConfig::new(label)
        .with_boundary(boundary)
        .with_min_chars(args.min_chars);
    config.max_chars = args.max_chars;

    let chunks = Chunker::new(config)?.chunk(&file_content);
    println!("{}", serde_json::to_string_pretty(&chunks)?);

    Ok(())
}
