use clap::Parser;

use cluerank::cli::{Cli, CliError, init_tracing, run};

fn is_json_mode_args() -> bool {
    std::env::args().any(|arg| arg == "--json")
}

fn main() {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        let err = CliError::from_anyhow(&err);
        if is_json_mode_args() {
            let payload = serde_json::json!({
                "error": {
                    "code": err.code,
                    "kind": err.kind,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
        } else {
            eprintln!("error: {}", err.message);
        }
        std::process::exit(err.code);
    }
}
