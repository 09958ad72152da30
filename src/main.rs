use anyhow::Result;
use clap::Parser;
use imago::cli::{Cli, Commands};
use imago::{utils, ConsoleOutbound, Engine, ImageMessage, IncomingImage, Settings, TextMessage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            user,
            chat,
            temp_dir,
            out_dir,
        } => run_console(user, chat, temp_dir, out_dir).await,
        Commands::Config => print_config(),
    }
}

fn print_config() -> Result<()> {
    let settings = Settings::new()?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn run_console(user: String, chat: String, temp_dir: String, out_dir: String) -> Result<()> {
    let settings = Settings::new()?;
    let api_key = Settings::api_key().unwrap_or_else(|_| {
        utils::print_warning("GEMINI_API_KEY is not set; image commands will be refused");
        String::new()
    });
    let translate_key = Settings::translate_api_key();

    let engine = Arc::new(Engine::new(
        settings,
        api_key,
        translate_key,
        PathBuf::from(temp_dir),
    )?);
    let outbound = ConsoleOutbound::new(PathBuf::from(out_dir))?;

    // Periodic sweep of expired sessions, caches and temp files.
    let sweeper = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        interval.tick().await;
        loop {
            interval.tick().await;
            sweeper.sweep().await;
        }
    });

    utils::print_header("Imago");
    utils::print_info("Type a command (e.g. /imagine a red bicycle at sunset).");
    utils::print_info("Send an image with @/path/to/image.png. Ctrl+C exits.\n");

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        utils::print_prompt("> ");
        let mut input = String::new();
        if reader.read_line(&mut input).await? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(path) = input.strip_prefix('@') {
            let message = ImageMessage {
                chat_id: chat.clone(),
                sender_id: user.clone(),
                image: IncomingImage::Path(PathBuf::from(path.trim())),
            };
            if engine.handle_image(&outbound, &message).await {
                utils::print_info("(image cached; no flow was waiting for it)");
            }
            continue;
        }

        let message = TextMessage {
            chat_id: chat.clone(),
            sender_id: user.clone(),
            content: input.to_string(),
        };
        if engine.handle_text(&outbound, &message).await {
            utils::print_info("(no command matched; try /imagine <prompt>)");
        }
    }

    Ok(())
}
