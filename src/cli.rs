use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{ReportConfig, ReportFormat, ReportKind};
use crate::error::Result;

#[derive(Debug, Parser)]
#[command(
    name = "colon-report",
    version,
    about = "Survival report for the colon cancer adjuvant trial"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pipeline and write the report document.
    Render(RenderArgs),
    /// Run the pipeline and print every result as JSON.
    Analyze(ConfigArgs),
    /// Print the default configuration as TOML.
    InitConfig,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// TOML configuration; defaults apply when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<ReportConfig> {
        ReportConfig::load_or_default(self.config.as_deref())
    }
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long, value_enum)]
    pub format: Option<ReportFormat>,

    #[arg(long, value_enum)]
    pub kind: Option<ReportKind>,

    /// Output file; defaults to `<kind>-report.<ext>`.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl RenderArgs {
    /// the config file with command-line overrides applied
    pub fn to_config(&self) -> Result<ReportConfig> {
        let mut config = self.config.load()?;
        if let Some(format) = self.format {
            config.report.format = format;
        }
        if let Some(kind) = self.kind {
            config.report.kind = kind;
        }
        if let Some(output) = &self.output {
            config.report.output = Some(output.clone());
        }
        Ok(config)
    }
}
