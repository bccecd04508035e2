use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay-server", about = "Ordered outbound batches, concurrent inbound handling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the producer and consumer until Ctrl+C
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file; defaults apply if it does not exist
    #[arg(long, default_value = "config.toml", env = "RELAY_CONFIG")]
    pub config: String,

    /// Seconds to let in-flight work finish after shutdown is requested
    #[arg(long, default_value_t = 5)]
    pub grace_secs: u64,
}
