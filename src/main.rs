use clap::Parser;
use juv::{cli::Cli, commands::execute, entry::should_install_color_eyre};

fn main() -> color_eyre::Result<()> {
    if should_install_color_eyre() {
        color_eyre::install()?;
    }
    let cli = Cli::parse();
    execute(cli)
}
