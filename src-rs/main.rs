mod client;
mod config;
mod error;
mod geometry;
mod overlay;
mod present;
mod schema;
mod session;
mod surface;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{info, warn};
use serde_json::json;

use crate::client::{has_accepted_extension, Analyze, AnalysisClient, SavedResponse, ACCEPTED_EXTENSIONS};
use crate::config::{ClientConfig, RenderConfig};
use crate::present::{abs_path, write_json_pretty, write_outputs, OutputPaths, OverlayView, StatusView};
use crate::schema::to_wire_json;
use crate::session::{Phase, SelectedFile, Store};

#[derive(Parser, Debug)]
#[command(
    name = "dental-analyze",
    version,
    about = "Upload a dental X-ray for AI analysis and render the detections as an annotated overlay"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Upload an X-ray, render the annotated image and write the diagnostic report
    Analyze(AnalyzeArgs),
    /// Re-render a saved analysis response without contacting the API
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// X-ray file (.dcm, .dicom, .rvg); uploaded as-is
    input: PathBuf,
    /// Output PNG path for the annotated image
    output: PathBuf,
    /// Analysis endpoint URL
    #[arg(long, env = "DENTAL_API_URL")]
    endpoint: Option<String>,
    /// Connect timeout in seconds (transport default when unset)
    #[arg(long, env = "DENTAL_API_CONNECT_TIMEOUT_SECS")]
    connect_timeout: Option<u64>,
    /// Read timeout in seconds (transport default when unset)
    #[arg(long, env = "DENTAL_API_READ_TIMEOUT_SECS")]
    read_timeout: Option<u64>,
    /// Store the successful response JSON for later `render` runs
    #[arg(long)]
    save_response: Option<PathBuf>,
    #[command(flatten)]
    render: RenderOpts,
    #[command(flatten)]
    outputs: OutputOpts,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Saved analysis response JSON
    response: PathBuf,
    /// Output PNG path for the annotated image
    output: PathBuf,
    #[command(flatten)]
    render: RenderOpts,
    #[command(flatten)]
    outputs: OutputOpts,
}

#[derive(Args, Debug)]
struct RenderOpts {
    /// Display width in pixels; height follows the source aspect ratio
    #[arg(long, env = "DENTAL_RENDER_WIDTH")]
    width: Option<u32>,
    /// Box and label background color (#RRGGBB or #RRGGBBAA)
    #[arg(long)]
    accent: Option<String>,
    /// Label text color (#RRGGBB or #RRGGBBAA)
    #[arg(long)]
    label_color: Option<String>,
}

#[derive(Args, Debug)]
struct OutputOpts {
    /// Markdown report path (default: <output>.md)
    #[arg(long)]
    report_out: Option<PathBuf>,
    /// Disable the Markdown report file
    #[arg(long, action = ArgAction::SetTrue)]
    no_report: bool,
    /// Overlay metadata sidecar path (default: <output>.overlay.json)
    #[arg(long)]
    meta_out: Option<PathBuf>,
    /// Disable the metadata sidecar
    #[arg(long, action = ArgAction::SetTrue)]
    no_meta: bool,
}

impl RenderOpts {
    fn to_config(&self) -> Result<RenderConfig> {
        RenderConfig::new(
            self.width,
            self.accent.as_deref(),
            self.label_color.as_deref(),
        )
    }
}

impl OutputOpts {
    fn to_paths(&self, image: PathBuf) -> OutputPaths {
        OutputPaths::resolve(
            image,
            self.report_out.clone(),
            self.meta_out.clone(),
            self.no_report,
            self.no_meta,
        )
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Analyze(args) => command_analyze(args),
        Commands::Render(args) => command_render(args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "analyze",
            "description": "Upload an X-ray, render the annotated overlay and write the report.",
            "accepts": ACCEPTED_EXTENSIONS,
        }),
        json!({
            "name": "render",
            "description": "Re-render a saved analysis response offline.",
            "accepts": ["json"],
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn command_analyze(args: AnalyzeArgs) -> Result<()> {
    let client_config =
        ClientConfig::new(args.endpoint.clone(), args.connect_timeout, args.read_timeout)?;
    let render_config = args.render.to_config()?;

    let file = read_selected_file(&args.input)?;
    if !has_accepted_extension(&args.input) {
        warn!(
            "{} does not look like an X-ray ({}); uploading anyway",
            args.input.display(),
            ACCEPTED_EXTENSIONS.map(|ext| format!(".{ext}")).join(", ")
        );
    }

    let client = AnalysisClient::new(&client_config);
    info!("analysis endpoint: {}", client.endpoint());
    let paths = args.outputs.to_paths(args.output.clone());
    run_session(
        file,
        &client,
        render_config,
        &args.input,
        &paths,
        args.save_response.as_deref(),
    )
}

fn command_render(args: RenderArgs) -> Result<()> {
    let render_config = args.render.to_config()?;
    let file = read_selected_file(&args.response)?;
    let saved = SavedResponse::new(file.bytes.to_vec());
    let paths = args.outputs.to_paths(args.output.clone());
    run_session(file, &saved, render_config, &args.response, &paths, None)
}

fn read_selected_file(path: &Path) -> Result<SelectedFile> {
    if !path.exists() {
        bail!("input not found: {}", path.display());
    }
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("upload")
        .to_string();
    Ok(SelectedFile::new(name, bytes))
}

fn run_session(
    file: SelectedFile,
    analyzer: &dyn Analyze,
    render_config: RenderConfig,
    input: &Path,
    paths: &OutputPaths,
    save_response: Option<&Path>,
) -> Result<()> {
    let mut protected = vec![input];
    protected.extend(save_response);
    paths.ensure_distinct(&protected)?;

    let (overlay, rendered) = OverlayView::new(render_config);
    let mut store = Store::new();
    store.subscribe(Box::new(StatusView));
    store.subscribe(Box::new(overlay));

    store.select_file(file);
    let snapshot = store.analyze_with(analyzer).clone();

    match snapshot.phase() {
        Phase::Reported(result) => {
            if let Some(path) = save_response {
                write_json_pretty(path, &to_wire_json(result))?;
                info!("saved response to {}", abs_path(path).display());
            }
            let rendered = rendered.borrow_mut().take();
            let Some(rendered) = rendered else {
                bail!("analysis completed but nothing was rendered");
            };
            write_outputs(&rendered, input, paths)?;
            println!("{}", result.report.trim_end());
            Ok(())
        }
        Phase::Failed(err) => bail!("{err}"),
        other => bail!("analysis ended in unexpected state: {}", other.name()),
    }
}
