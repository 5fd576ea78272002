//! report configuration - toml file with defaults for every key

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::dataset::EventType;
use crate::error::{Result, SurvError};
use crate::optimization::TieMethod;
use crate::regression::FitOptions;
use crate::zph::{TimeTransform, ZphSettings};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    pub data: DataConfig,
    pub analysis: AnalysisConfig,
    pub report: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// directory holding `<dataset>.csv`
    pub dir: PathBuf,
    pub dataset: String,
    pub target_event: EventType,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            dataset: "colon".to_string(),
            target_event: EventType::Death,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub ties: TieMethod,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub risk_table_break_days: f64,
    pub zph_transform: TimeTransform,
    pub zph_alpha: f64,
    pub smoother_span: f64,
    pub parallel: bool,
    pub stratify_violations: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            ties: TieMethod::Efron,
            max_iterations: 30,
            tolerance: 1e-9,
            risk_table_break_days: 500.0,
            zph_transform: TimeTransform::Km,
            zph_alpha: 0.05,
            smoother_span: 2.0 / 3.0,
            parallel: true,
            stratify_violations: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    /// full fixed-time analysis
    #[default]
    FixedTime,
    /// placeholder for the time-varying analysis
    TimeVarying,
}

impl ReportKind {
    pub fn slug(self) -> &'static str {
        match self {
            ReportKind::FixedTime => "fixed-time",
            ReportKind::TimeVarying => "time-varying",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// self-contained web page
    #[default]
    Html,
    /// print-ready paged html
    Paged,
    /// word-processor document (.docx)
    Docx,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Paged => "html",
            ReportFormat::Docx => "docx",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Flatly,
    Journal,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TocOptions {
    pub enabled: bool,
    pub depth: u8,
    /// sidebar instead of a block under the title
    pub float: bool,
}

impl Default for TocOptions {
    fn default() -> Self {
        Self { enabled: true, depth: 2, float: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSize {
    #[default]
    A4,
    Letter,
}

impl PageSize {
    pub fn css(self) -> &'static str {
        match self {
            PageSize::A4 => "A4",
            PageSize::Letter => "letter",
        }
    }

    /// (width, height) in twentieths of a point
    pub fn twips(self) -> (u32, u32) {
        match self {
            PageSize::A4 => (11_906, 16_838),
            PageSize::Letter => (12_240, 15_840),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageOptions {
    pub size: PageSize,
    pub margin_mm: f64,
    pub header: Option<String>,
    pub footer: Option<String>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            size: PageSize::A4,
            margin_mm: 20.0,
            header: None,
            footer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub kind: ReportKind,
    pub format: ReportFormat,
    /// defaults to `<kind>-report.<ext>` in the working directory
    pub output: Option<PathBuf>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub theme: Theme,
    pub toc: TocOptions,
    pub page: PageOptions,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: ReportKind::FixedTime,
            format: ReportFormat::Html,
            output: None,
            title: None,
            author: None,
            date: None,
            theme: Theme::Flatly,
            toc: TocOptions::default(),
            page: PageOptions::default(),
        }
    }
}

impl ReportConfig {
    /// parse & validate a toml file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// defaults when `path` is `None`
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        if a.max_iterations == 0 {
            return Err(SurvError::invalid_parameter("analysis.max_iterations", a.max_iterations));
        }
        if !(a.tolerance > 0.0) {
            return Err(SurvError::invalid_parameter("analysis.tolerance", a.tolerance));
        }
        if !(a.risk_table_break_days > 0.0) {
            return Err(SurvError::invalid_parameter("analysis.risk_table_break_days", a.risk_table_break_days));
        }
        if !(a.zph_alpha > 0.0 && a.zph_alpha < 1.0) {
            return Err(SurvError::invalid_parameter("analysis.zph_alpha", a.zph_alpha));
        }
        if !(a.smoother_span > 0.0 && a.smoother_span <= 1.0) {
            return Err(SurvError::invalid_parameter("analysis.smoother_span", a.smoother_span));
        }
        if !(1..=3).contains(&self.report.toc.depth) {
            return Err(SurvError::invalid_parameter("report.toc.depth", self.report.toc.depth));
        }
        if !(self.report.page.margin_mm >= 0.0) {
            return Err(SurvError::invalid_parameter("report.page.margin_mm", self.report.page.margin_mm));
        }
        if self.data.dataset.trim().is_empty() {
            return Err(SurvError::invalid_parameter("data.dataset", "<empty>"));
        }
        Ok(())
    }

    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            ties: self.analysis.ties,
            max_iterations: self.analysis.max_iterations,
            tolerance: self.analysis.tolerance,
        }
    }

    pub fn zph_settings(&self) -> ZphSettings {
        ZphSettings {
            transform: self.analysis.zph_transform,
            alpha: self.analysis.zph_alpha,
            smoother_span: self.analysis.smoother_span,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.report.output.clone().unwrap_or_else(|| {
            PathBuf::from(format!("{}-report.{}", self.report.kind.slug(), self.report.format.extension()))
        })
    }

    pub fn title(&self) -> String {
        self.report.title.clone().unwrap_or_else(|| match self.report.kind {
            ReportKind::FixedTime => "Survival analysis of the colon cancer adjuvant trial".to_string(),
            ReportKind::TimeVarying => "Time-varying survival analysis of the colon cancer adjuvant trial".to_string(),
        })
    }
}
