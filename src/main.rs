use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rag_chat::commands::{
    App, analyze_image, chat_repl, delete_document, embed_text, generate, list_models,
    parse_metadata, read_content, search, show_model, show_status, store_document,
};
use rag_chat::config::{Config, get_config_dir, run_interactive_config, show_config};
use rag_chat::llm::RequestOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rag-chat")]
#[command(about = "Retrieval-augmented answers and tool-calling chat backed by Ollama")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Per-request generation overrides
#[derive(Args, Debug, Default)]
struct GenerationArgs {
    /// Model to generate with (defaults to the configured model)
    #[arg(long)]
    model: Option<String>,
    /// Sampling temperature between 0.0 and 1.0
    #[arg(long)]
    temperature: Option<f32>,
    /// Nucleus sampling cutoff between 0.0 and 1.0
    #[arg(long)]
    top_p: Option<f32>,
}

impl GenerationArgs {
    fn into_request(self) -> RequestOptions {
        RequestOptions {
            model: self.model,
            temperature: self.temperature,
            top_p: self.top_p,
            ..RequestOptions::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed and store a document
    Store {
        /// Document text
        #[arg(required_unless_present = "file")]
        content: Option<String>,
        /// Read the document from a file instead
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// Metadata as a JSON object, e.g. '{"source": "notes"}'
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Delete a stored document
    Delete {
        /// Document ID
        id: i64,
    },
    /// Answer a question from the stored documents
    Search {
        query: String,
        #[command(flatten)]
        generation: GenerationArgs,
        /// Minimum cosine similarity between -1.0 and 1.0
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<f64>,
        /// Maximum number of context documents
        #[arg(long)]
        limit: Option<usize>,
        /// Print the assembled context
        #[arg(long)]
        show_context: bool,
    },
    /// Start an interactive chat with tool calls
    Chat {
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// Generate from a prompt without retrieval
    Generate {
        prompt: String,
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// Print the embedding of a text as JSON
    Embed { text: String },
    /// Describe an image with a vision model
    AnalyzeImage {
        /// Image file to send
        image: PathBuf,
        /// Question about the image
        #[arg(long, default_value = "Describe this image.")]
        prompt: String,
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// List models available on the Ollama server
    Models,
    /// Show details for one model
    Model {
        /// Model name, e.g. qwen2.5:3b
        name: String,
    },
    /// Show provider health and store statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = get_config_dir()?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&Config::load_with_env(&config_dir)?);
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Store {
            content,
            file,
            metadata,
        } => {
            let content = read_content(content, file.as_deref())?;
            let metadata = parse_metadata(metadata.as_deref())?;
            let app = App::open(Config::load_with_env(&config_dir)?).await?;
            store_document(&app, &content, &metadata).await?;
        }
        Commands::Delete { id } => {
            let app = App::open(Config::load_with_env(&config_dir)?).await?;
            delete_document(&app, id).await?;
        }
        Commands::Search {
            query,
            generation,
            threshold,
            limit,
            show_context,
        } => {
            let request = RequestOptions {
                similarity_threshold: threshold,
                max_results: limit,
                ..generation.into_request()
            };
            let app = App::open(Config::load_with_env(&config_dir)?).await?;
            search(&app, &query, &request, show_context).await?;
        }
        Commands::Chat { generation } => {
            let app = App::open(Config::load_with_env(&config_dir)?).await?;
            chat_repl(&app, &generation.into_request()).await?;
        }
        Commands::Generate { prompt, generation } => {
            let config = Config::load_with_env(&config_dir)?;
            generate(&config, &prompt, &generation.into_request()).await?;
        }
        Commands::Embed { text } => {
            embed_text(&Config::load_with_env(&config_dir)?, &text).await?;
        }
        Commands::AnalyzeImage {
            image,
            prompt,
            generation,
        } => {
            let config = Config::load_with_env(&config_dir)?;
            analyze_image(&config, &image, &prompt, &generation.into_request())?;
        }
        Commands::Models => {
            list_models(&Config::load_with_env(&config_dir)?)?;
        }
        Commands::Model { name } => {
            show_model(&Config::load_with_env(&config_dir)?, &name)?;
        }
        Commands::Status => {
            show_status(&Config::load_with_env(&config_dir)?).await?;
        }
    }

    Ok(())
}
