use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "stride-server", about = "Stride presence and delivery coordinator")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/stride.toml")]
    pub config: String,

    /// Bind address (overrides config)
    #[arg(long)]
    pub bind_address: Option<String>,
}
