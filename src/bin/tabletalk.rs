use anyhow::Result;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tabletalk::assistant::DataAssistant;
use tabletalk::ingest::CsvFileParser;
use tabletalk::llm::OpenAiModel;
use tabletalk::session::MemorySessionStore;
use tabletalk::trainer::BuiltinTrainer;
use tracing::info;

#[derive(Parser)]
#[command(name = "tabletalk")]
#[command(about = "Conversational data operations over a CSV upload")]
struct Args {
    /// CSV file to load
    file: PathBuf,

    /// Run a single request instead of the interactive loop
    #[arg(short, long)]
    query: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let model = OpenAiModel::from_env();
    if model.is_none() {
        info!("no OPENAI_API_KEY configured; running on deterministic classification only");
    }
    let assistant = DataAssistant::new(
        model.map(|m| Arc::new(m) as Arc<dyn tabletalk::llm::LanguageModel>),
        Arc::new(MemorySessionStore::new()),
        Arc::new(CsvFileParser),
        Arc::new(BuiltinTrainer),
    );

    let bytes = std::fs::read(&args.file)?;
    let filename = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload.csv".to_string());
    let schema = assistant
        .open_session("cli", bytes, &filename)
        .await?;
    println!(
        "Loaded {} with columns: {}",
        filename,
        schema.column_names().join(", ")
    );

    if let Some(query) = args.query {
        let reply = assistant.handle("cli", &query).await?;
        print_reply(&reply);
        return Ok(());
    }

    println!("Type a request, or 'quit' to exit.");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }
        match assistant.handle("cli", line).await {
            Ok(reply) => print_reply(&reply),
            Err(e) => eprintln!("error: {}", e),
        }
    }
    Ok(())
}

fn print_reply(reply: &tabletalk::assistant::AssistantReply) {
    println!("{}", reply.answer);
    if let Some(rows) = &reply.preview_rows {
        for row in rows {
            let mut pairs: Vec<String> =
                row.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            pairs.sort();
            println!("  {}", pairs.join(", "));
        }
    }
}
