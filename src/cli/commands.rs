use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "imago")]
#[command(author, version, about = "Conversational image generation assistant", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the assistant against an interactive console transport
    Run {
        /// Sender identity used to key session state
        #[arg(long, default_value = "console")]
        user: String,

        /// Chat target replies are addressed to
        #[arg(long, default_value = "console")]
        chat: String,

        /// Directory for generated temp images
        #[arg(long, default_value = "./temp")]
        temp_dir: String,

        /// Directory replies' images are written into
        #[arg(long, default_value = "./outbox")]
        out_dir: String,
    },

    /// Print the effective configuration and exit
    Config,
}
