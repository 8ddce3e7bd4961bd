//! Luabridge command-line driver
//!
//! Runs Lua chunks through the bridge and prints what comes back:
//! `luabridge eval` for inline code, `luabridge run` for script files.

use clap::{Parser, Subcommand};

mod commands;

use commands::SessionArgs;

#[derive(Parser)]
#[command(name = "luabridge")]
#[command(about = "Run Lua code through the luabridge value bridge", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an inline chunk and print its results
    Eval {
        /// Lua source; tried as an expression first, then as statements
        code: String,
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Run a Lua script file
    Run {
        /// Script path
        file: String,
        /// Arguments passed to the script (as `...` and the `arg` table)
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
        #[command(flatten)]
        session: SessionArgs,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Eval { code, session } => commands::eval::execute(&code, &session),
        Commands::Run {
            file,
            args,
            session,
        } => commands::run::execute(&file, &args, &session),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
