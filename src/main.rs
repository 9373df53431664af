use anyhow::{Context, Result};
use clap::Parser;

use chart_tiles::chart::Chart;
use chart_tiles::cli::{Cli, Command, ReportFormat, SchemeArg};
use chart_tiles::loader::ColorScheme;
use chart_tiles::render::Viewport;
use chart_tiles::software::SoftwareRenderer;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    match cli.command {
        Command::Inspect(args) => {
            let chart = Chart::open(&args.input)?;
            let report = chart.report()?;
            match args.output {
                ReportFormat::Json => {
                    let json = serde_json::to_string_pretty(&report)?;
                    println!("{}", json);
                }
                ReportFormat::Text => {
                    println!(
                        "name: {} format: {}",
                        report.name.as_deref().unwrap_or("-"),
                        report.format.as_deref().unwrap_or("-")
                    );
                    println!(
                        "zoom: {}-{} tiles: {}",
                        report.min_zoom, report.max_zoom, report.tile_count
                    );
                    println!(
                        "extent: n={:.6} s={:.6} e={:.6} w={:.6}",
                        report.extent.north,
                        report.extent.south,
                        report.extent.east,
                        report.extent.west
                    );
                    for zoom in report.tiles_by_zoom.iter() {
                        println!("z={}: tiles={}", zoom.zoom, zoom.count);
                    }
                    match report.coverage_zoom {
                        Some(zoom) => println!(
                            "coverage: contours={} zoom={}",
                            report.coverage_contours, zoom
                        ),
                        None => println!(
                            "coverage: contours={} (declared bounds only)",
                            report.coverage_contours
                        ),
                    }
                }
            }
        }
        Command::Coverage(args) => {
            let chart = Chart::open(&args.input)?;
            let rings: Vec<Vec<(f64, f64)>> = chart
                .coverage_region()
                .contours()
                .iter()
                .map(|polygon| {
                    polygon
                        .exterior()
                        .0
                        .iter()
                        .map(|point| (point.y, point.x))
                        .collect()
                })
                .collect();
            match args.output {
                ReportFormat::Json => {
                    let json = serde_json::to_string_pretty(&rings)?;
                    println!("{}", json);
                }
                ReportFormat::Text => {
                    for (index, ring) in rings.iter().enumerate() {
                        let points = ring
                            .iter()
                            .map(|(lat, lon)| format!("{:.6},{:.6}", lat, lon))
                            .collect::<Vec<_>>()
                            .join(" ");
                        println!("contour {}: {}", index, points);
                    }
                }
            }
        }
        Command::Render(args) => {
            let mut chart = Chart::open(&args.input)?;
            chart.zoom_modifier = args.zoom_modifier;

            let mut backend = SoftwareRenderer::new(args.width, args.height);
            let scheme = match args.scheme {
                SchemeArg::Day => ColorScheme::Day,
                SchemeArg::Dusk => ColorScheme::Dusk,
                SchemeArg::Night => ColorScheme::Night,
            };
            chart.set_color_scheme(scheme, &mut backend);

            let viewport = Viewport {
                center_lat: args.lat,
                center_lon: args.lon,
                scale_ppm: 1.0 / args.mpp,
                rotation: 0.0,
                width: args.width,
                height: args.height,
            };
            chart.render_region(&viewport, None, &mut backend)?;

            let frame = backend.into_image();
            frame
                .save(&args.output)
                .with_context(|| format!("failed to write {}", args.output.display()))?;
            println!(
                "render: input={} output={} scale_factor={:.3}",
                args.input.display(),
                args.output.display(),
                chart.zoom_scale_factor()
            );
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
