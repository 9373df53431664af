use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "chart-tiles", version, about = "Raster MBTiles chart inspection and rendering CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error|warn|info|debug|trace)
    #[arg(long, default_value = "info")]
    pub log: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Inspect(InspectArgs),
    Coverage(CoverageArgs),
    Render(RenderArgs),
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub output: ReportFormat,
}

#[derive(Debug, Args)]
pub struct CoverageArgs {
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub output: ReportFormat,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    pub input: PathBuf,

    /// Viewport center latitude
    #[arg(long)]
    pub lat: f64,

    /// Viewport center longitude
    #[arg(long)]
    pub lon: f64,

    /// Viewport resolution in meters per pixel
    #[arg(long, default_value_t = 10.0)]
    pub mpp: f64,

    #[arg(long, default_value_t = 1024)]
    pub width: u32,

    #[arg(long, default_value_t = 768)]
    pub height: u32,

    #[arg(long, value_enum, default_value_t = SchemeArg::Day)]
    pub scheme: SchemeArg,

    /// Raster zoom modifier in thirds of a zoom level
    #[arg(long, default_value_t = 0)]
    pub zoom_modifier: i32,

    /// Output PNG path
    #[arg(long, short = 'o')]
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchemeArg {
    Day,
    Dusk,
    Night,
}
