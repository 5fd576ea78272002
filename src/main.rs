use clap::Parser;
use colon_survival::cli::{Cli, Command};
use colon_survival::pipeline::{analyze, render_report};
use colon_survival::{ReportConfig, Result};

fn main() {
    colon_survival::logging::init();

    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Render(args) => {
            let config = args.to_config()?;
            let path = render_report(&config)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Analyze(args) => {
            let config = args.load()?;
            let results = analyze(&config)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Command::InitConfig => {
            print!("{}", ReportConfig::default().to_toml()?);
            Ok(())
        }
    }
}
