mod cli;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};

fn main() {
    let args = Cli::parse();

    init_tracing(args.verbose);
    cli::context::init(args.dir.as_deref(), args.global);

    let result = match &args.command {
        Commands::Init => cli::commands::init::execute(),
        Commands::Keys { action } => cli::commands::keys::execute(action),
        Commands::Trust { action } => cli::commands::trust::execute(action),
        Commands::Policy { action } => cli::commands::policy::execute(action),
        Commands::Log {
            target,
            since,
            last,
        } => cli::commands::log::execute(target.as_deref(), since.as_deref(), *last),
        Commands::Status => cli::commands::status::execute(),
    };

    if let Err(e) = result {
        cli::output::error(&e);
        std::process::exit(1);
    }
}

/// KEYTRUST_LOG wins over RUST_LOG; `--verbose` forces debug.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("keytrust=debug")
    } else {
        EnvFilter::try_from_env("KEYTRUST_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
