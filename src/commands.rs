use anyhow::{Context, Result, anyhow};
use console::style;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::RagError;
use crate::chat::ToolLoop;
use crate::config::Config;
use crate::database::{Database, DocumentStore};
use crate::llm::{
    ChatMessage, EmbeddingProvider, GenerationOptions, GenerationProvider, OllamaClient,
    RequestOptions,
};
use crate::rag::RagEngine;
use crate::tools::ToolRegistry;

const EXIT_COMMANDS: [&str; 2] = ["/exit", "/quit"];
const RESET_COMMAND: &str = "/reset";

/// Shared collaborators for one CLI invocation
pub struct App {
    config: Config,
    client: Arc<OllamaClient>,
    database: Arc<Database>,
    registry: Arc<ToolRegistry>,
}

impl App {
    #[inline]
    pub async fn open(config: Config) -> Result<Self> {
        let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .context("Failed to initialize database")?;
        let registry =
            ToolRegistry::create_default(&config).context("Failed to register chat tools")?;

        Ok(Self {
            config,
            client: Arc::new(client),
            database: Arc::new(database),
            registry: Arc::new(registry),
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn rag_engine(&self) -> RagEngine {
        RagEngine::new(
            Arc::clone(&self.client) as Arc<dyn EmbeddingProvider>,
            Arc::clone(&self.client) as Arc<dyn GenerationProvider>,
            Arc::clone(&self.database) as Arc<dyn DocumentStore>,
            self.config.clone(),
        )
    }

    #[inline]
    pub fn tool_loop(&self) -> ToolLoop {
        ToolLoop::from_config(
            Arc::clone(&self.client) as Arc<dyn GenerationProvider>,
            Arc::clone(&self.registry),
            &self.config,
        )
    }
}

fn spinner(message: &str) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Parse `--metadata`, which must be a JSON object
#[inline]
pub fn parse_metadata(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };

    match serde_json::from_str::<Value>(raw).context("Metadata is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("Metadata must be a JSON object, got: {}", other)),
    }
}

/// Content comes from the argument or, failing that, from a file
#[inline]
pub fn read_content(content: Option<String>, file: Option<&Path>) -> Result<String> {
    let text = match (content, file) {
        (Some(content), _) => content,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => return Err(anyhow!("Provide content or --file")),
    };

    if text.trim().is_empty() {
        return Err(anyhow!("Refusing to store an empty document"));
    }
    Ok(text)
}

/// Embed and store a document
#[inline]
pub async fn store_document(app: &App, content: &str, metadata: &Map<String, Value>) -> Result<()> {
    info!("Storing document ({} bytes)", content.len());

    let bar = spinner("Embedding document");
    let result = app.rag_engine().store(content, metadata).await;
    bar.finish_and_clear();

    let receipt = result.context("Failed to store document")?;
    println!(
        "{} Stored document {} at {}",
        style("✓").green(),
        style(receipt.id).bold(),
        receipt.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

#[inline]
pub async fn delete_document(app: &App, id: i64) -> Result<()> {
    match app.rag_engine().delete(id).await {
        Ok(()) => {
            println!("{} Deleted document {}", style("✓").green(), id);
            Ok(())
        }
        Err(RagError::NotFound { id }) => Err(anyhow!("Document not found: {}", id)),
        Err(e) => Err(e).context("Failed to delete document"),
    }
}

/// Answer a question from the stored documents
#[inline]
pub async fn search(
    app: &App,
    query: &str,
    request: &RequestOptions,
    show_context: bool,
) -> Result<()> {
    let bar = spinner("Searching");
    let result = app.rag_engine().search(query, request).await;
    bar.finish_and_clear();

    let outcome = result.context("Search failed")?;

    println!("{}", outcome.answer.trim());
    println!();
    println!(
        "{}",
        style(format!(
            "{} matching documents · {} (temperature {}, top_p {})",
            outcome.matches.len(),
            outcome.options.model,
            outcome.options.temperature,
            outcome.options.top_p
        ))
        .dim()
    );

    for m in &outcome.matches {
        println!(
            "  [{}] {:.3}  {}",
            m.document.id,
            m.similarity,
            m.document.preview(60)
        );
    }

    if show_context {
        println!();
        println!("{}", style("Context:").bold());
        if outcome.context.is_empty() {
            println!("{}", style("(empty)").dim());
        } else {
            println!("{}", outcome.context);
        }
    }

    Ok(())
}

/// Interactive chat with tool calls
#[inline]
pub async fn chat_repl(app: &App, request: &RequestOptions) -> Result<()> {
    let options = GenerationOptions::resolve(request, app.config())?;
    let tool_loop = app.tool_loop();

    let tools = tool_loop.registry().definitions_for(&options.model);
    println!(
        "{} Chatting with {}",
        style("💬").cyan(),
        style(&options.model).bold()
    );
    if tools.is_empty() {
        println!("   Tools: not available for this model");
    } else {
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        println!("   Tools: {}", names.join(", "));
    }
    println!(
        "   Type {} to quit, {} to start over",
        EXIT_COMMANDS[0], RESET_COMMAND
    );
    println!();

    let mut transcript: Vec<ChatMessage> = Vec::new();

    loop {
        let line: String = Input::new()
            .with_prompt("you")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read input")?;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&line) {
            break;
        }
        if line == RESET_COMMAND {
            transcript.clear();
            println!("{}", style("Conversation cleared").dim());
            continue;
        }

        let mut turn = transcript.clone();
        turn.push(ChatMessage::user(line));

        let bar = spinner("Thinking");
        let result = tool_loop.chat(turn, &options).await;
        bar.finish_and_clear();

        match result {
            Ok(outcome) => {
                if outcome.rounds > 0 {
                    println!(
                        "{}",
                        style(format!("({} tool rounds)", outcome.rounds)).dim()
                    );
                }
                println!("{} {}", style("assistant:").green().bold(), outcome.answer);
                transcript = outcome.transcript;
                transcript.push(ChatMessage::assistant(outcome.answer));
            }
            Err(e) => {
                error!("Chat turn failed: {}", e);
                println!("{} {}", style("error:").red().bold(), e);
            }
        }
    }

    Ok(())
}

/// List models available on the Ollama server
#[inline]
pub fn list_models(config: &Config) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let registry = ToolRegistry::create_default(config)?;
    let models = client.list_models().context("Failed to list models")?;

    if models.is_empty() {
        println!("No models installed on {}", client.base_url());
        return Ok(());
    }

    println!("Models on {} ({} total):", client.base_url(), models.len());
    for model in &models {
        let mut tags = Vec::new();
        if model.name == config.ollama.model {
            tags.push("default");
        }
        if model.name == config.ollama.embedding_model {
            tags.push("embedding");
        }
        if registry.supports_tools(&model.name) {
            tags.push("tools");
        }

        let size = model
            .size
            .map(|bytes| format!("{:.1} GB", bytes as f64 / 1_000_000_000.0))
            .unwrap_or_default();
        let params = model
            .details
            .as_ref()
            .and_then(|d| d.parameter_size.clone())
            .unwrap_or_default();

        print!("  {}  {}  {}", style(&model.name).bold(), params, size);
        if !tags.is_empty() {
            print!("  [{}]", tags.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Generate directly from a prompt, without retrieval
#[inline]
pub async fn generate(config: &Config, prompt: &str, request: &RequestOptions) -> Result<()> {
    let options = GenerationOptions::resolve(request, config)?;
    let client = OllamaClient::new(&config.ollama)?;

    let bar = spinner("Generating");
    let result = client.generate(prompt, &options).await;
    bar.finish_and_clear();

    let generation = result.context("Generation failed")?;
    println!("{}", generation.text.trim());
    println!();
    println!(
        "{}",
        style(format!(
            "{} (temperature {}, top_p {}) at {}",
            generation.model,
            options.temperature,
            options.top_p,
            generation.created_at.format("%Y-%m-%d %H:%M:%S")
        ))
        .dim()
    );
    Ok(())
}

/// Print the embedding vector for `text` as JSON
#[inline]
pub async fn embed_text(config: &Config, text: &str) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;

    let bar = spinner("Embedding");
    let result = client.embed(text).await;
    bar.finish_and_clear();

    let embedding = result.context("Embedding failed")?;
    eprintln!(
        "{}",
        style(format!(
            "{} dimensions from {}",
            embedding.len(),
            client.embedding_model()
        ))
        .dim()
    );
    println!("{}", serde_json::to_string(&embedding)?);
    Ok(())
}

/// Ask a vision model about an image file
#[inline]
pub fn analyze_image(
    config: &Config,
    image_path: &Path,
    prompt: &str,
    request: &RequestOptions,
) -> Result<()> {
    let options = GenerationOptions::resolve(request, config)?;
    let image = std::fs::read(image_path)
        .with_context(|| format!("Failed to read image {}", image_path.display()))?;
    let client = OllamaClient::new(&config.ollama)?;

    info!(
        "Analyzing {} ({} bytes) with {}",
        image_path.display(),
        image.len(),
        options.model
    );

    let bar = spinner("Analyzing image");
    let result = client.analyze_image(&image, prompt, &options);
    bar.finish_and_clear();

    let generation = result.context("Image analysis failed")?;
    println!("{}", generation.text.trim());
    Ok(())
}

/// Show what the server reports about one model
#[inline]
pub fn show_model(config: &Config, name: &str) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let show = client.show_model(name)?;

    println!("{}", style(name).bold());
    if let Some(details) = &show.details {
        let fields = [
            ("Family", &details.family),
            ("Parameters", &details.parameter_size),
            ("Quantization", &details.quantization_level),
            ("Format", &details.format),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                println!("   {}: {}", label, value);
            }
        }
    }
    if let Some(capabilities) = &show.capabilities {
        println!("   Capabilities: {}", capabilities.join(", "));
    }
    if let Some(modified_at) = &show.modified_at {
        println!("   Modified: {}", modified_at);
    }
    if let Some(license) = show.license.as_deref().and_then(|l| l.lines().next()) {
        println!("   License: {}", license);
    }
    if let Some(parameters) = &show.parameters {
        println!("   Defaults:");
        for line in parameters.lines() {
            println!("     {}", line.trim());
        }
    }
    Ok(())
}

/// Show provider health and store statistics
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 RAG Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check(&[
            config.ollama.model.as_str(),
            config.ollama.embedding_model.as_str(),
        ]) {
            Ok(()) => {
                println!("   ✅ Ollama: Connected ({})", client.base_url());
                println!("   📋 Model: {}", config.ollama.model);
                println!(
                    "   🔢 Embedding: {} ({} dimensions)",
                    config.ollama.embedding_model, config.ollama.embedding_dimension
                );
            }
            Err(e) => {
                println!("   ⚠️  Ollama: Unhealthy - {:#}", e);
            }
        },
        Err(e) => {
            println!("   ❌ Ollama: Failed to connect - {}", e);
        }
    }

    println!();
    println!("🗄️  Database Status:");
    match Database::initialize_from_config_dir(config.get_base_dir()).await {
        Ok(database) => {
            println!("   ✅ SQLite: {}", config.database_path().display());
            match database.count().await {
                Ok(count) => println!("   📚 Documents: {}", count),
                Err(e) => println!("   ⚠️  Documents: Error - {}", e),
            }
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to open - {:#}", e);
        }
    }

    println!();
    println!("🔍 Retrieval Defaults:");
    println!(
        "   Threshold {} · max {} results · temperature {} · top_p {}",
        config.rag.similarity_threshold,
        config.rag.max_results,
        config.rag.temperature,
        config.rag.top_p
    );

    println!();
    println!("🛠️  Tools:");
    match ToolRegistry::create_default(config) {
        Ok(registry) => {
            println!("   Registered: {}", registry.names().join(", "));
            println!("   Tool models: {}", config.chat.tool_models.join(", "));
            println!("   Max rounds: {}", config.chat.max_tool_rounds);
        }
        Err(e) => println!("   ❌ Registry: {}", e),
    }

    Ok(())
}
