//! Minimal REPL: reads a line from stdin, runs one turn through a
//! `SmartRouter` wired with in-memory mocks, prints the reply, repeats until
//! EOF or `quit`/`exit`.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use router_config::RouterConfig;
use router_core::mocks::{EchoTool, FakeTransport, MockAgentExecutor, MockEmbeddingProvider};
use router_core::{CatalogRegistry, ConversationHistory, ServerEntry, SmartRouter, TransportSpec};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "router", about = "Local REPL for the self-improving tool router")]
struct Cli {
    /// Enables debug-level logging.
    #[arg(long)]
    debug: bool,

    /// Directory for the usage metrics file.
    #[arg(long, default_value = ".router-data")]
    data_dir: std::path::PathBuf,
}

fn demo_catalog() -> Vec<ServerEntry> {
    vec![
        ServerEntry {
            handle: "fin-quotes".to_string(),
            display_name: "Financial Quotes".to_string(),
            category: "finance".to_string(),
            description: "Looks up stock and ticker prices".to_string(),
            keywords: vec!["stock".to_string(), "ticker".to_string(), "price".to_string()],
            transport_spec: TransportSpec::Stdio { program: "true".to_string(), args: vec![] },
        },
        ServerEntry {
            handle: "news-wire".to_string(),
            display_name: "News Wire".to_string(),
            category: "news".to_string(),
            description: "Searches recent news headlines".to_string(),
            keywords: vec!["news".to_string(), "headline".to_string()],
            transport_spec: TransportSpec::Stdio { program: "true".to_string(), args: vec![] },
        },
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = RouterConfig::default();
    config.data_dir = cli.data_dir;
    config.debug = cli.debug;
    config.validate()?;

    let embedder = Arc::new(MockEmbeddingProvider::new(64));
    let mut registry = CatalogRegistry::new(
        demo_catalog(),
        embedder,
        config.similarity_threshold,
        config.relative_score_cutoff,
    );
    registry.initialize().await?;

    let transport = Arc::new(FakeTransport::new());
    transport.register("fin-quotes", vec![Arc::new(EchoTool::new("quote", "MSFT: 412.30"))]);
    transport.register("news-wire", vec![Arc::new(EchoTool::new("headlines", "no major headlines"))]);

    let executor = Arc::new(MockAgentExecutor::new("I don't have an opinion on that yet."));

    let router = SmartRouter::new(config, registry, executor, transport)?;
    router.initialize().await?;

    let history = ConversationHistory::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }

        match router.handle_turn(&history, line, None).await {
            Ok(reply) => println!("{reply}"),
            Err(e) => eprintln!("error: {e} (recoverable: {})", e.is_recoverable()),
        }
    }

    router.shutdown().await;
    println!("Bye.");
    Ok(())
}
