use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON array of `{name, options, image_url}` entries
    menu: PathBuf,

    /// Reset the voting cycle before loading
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    process::load_menu(&args.menu, args.reset).await
}
