use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use imagine_contracts::events::{ChangeEvent, EventBus, EventWriter, NoticeLevel};
use imagine_contracts::models::{AspectRatio, EditMode, QuickPreset, QUICK_PRESETS};
use imagine_contracts::render::{
    export_history, render_gallery_page, render_gallery_text, render_stats_text, ExportFormat,
};
use imagine_engine::config::normalize_api_base;
use imagine_engine::download::download_image;
use imagine_engine::{
    status_hint, ClientConfig, DispatchError, GenerationRequest, HttpTransport, ReferenceImage,
    Studio, DEFAULT_STRENGTH,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "imagine", version, about = "Image generation client")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(subcommand)]
    command: Command,
}

/// Overrides for the `IMAGINE_*` environment settings.
#[derive(Debug, Args)]
struct ConnectionArgs {
    #[arg(long, global = true)]
    api_base: Option<String>,
    #[arg(long, global = true)]
    api_key: Option<String>,
    #[arg(long, global = true)]
    model: Option<String>,
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Text-to-image over the streaming endpoint.
    Generate(GenerateArgs),
    /// Edit a reference image.
    Edit(EditArgs),
    List,
    Show(IdArgs),
    Delete(ConfirmIdArgs),
    Clear(ClearArgs),
    Stats,
    Download(DownloadArgs),
    Export(ExportArgs),
    /// Write the gallery as a standalone HTML page.
    Render(RenderArgs),
    Presets,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    prompt: String,
    #[arg(long)]
    aspect: Option<AspectRatio>,
    #[arg(long)]
    count: Option<u32>,
    #[arg(long)]
    preset: Option<String>,
}

#[derive(Debug, Parser)]
struct EditArgs {
    prompt: String,
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value_t = EditMode::default())]
    mode: EditMode,
    #[arg(long, default_value_t = DEFAULT_STRENGTH)]
    strength: f32,
    #[arg(long, default_value_t = AspectRatio::default())]
    aspect: AspectRatio,
}

#[derive(Debug, Parser)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Parser)]
struct ConfirmIdArgs {
    id: String,
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Parser)]
struct ClearArgs {
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Parser)]
struct DownloadArgs {
    id: String,
    #[arg(long, default_value = ".")]
    dir: PathBuf,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long, default_value_t = ExportFormat::Json)]
    format: ExportFormat,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct RenderArgs {
    #[arg(long, default_value = "gallery.html")]
    out: PathBuf,
}

type CliStudio = Studio<HttpTransport>;

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("imagine error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = resolve_config(cli.connection);
    let mut studio = open_studio(&config)?;
    match cli.command {
        Command::Generate(args) => run_generate(&mut studio, args),
        Command::Edit(args) => run_edit(&mut studio, args),
        Command::List => {
            print!("{}", render_gallery_text(studio.gallery().records()));
            Ok(0)
        }
        Command::Show(args) => run_show(&studio, &args.id),
        Command::Delete(args) => run_delete(&mut studio, args),
        Command::Clear(args) => run_clear(&mut studio, args),
        Command::Stats => {
            print!("{}", render_stats_text(&studio.stats()));
            Ok(0)
        }
        Command::Download(args) => run_download(&studio, args),
        Command::Export(args) => run_export(&studio, args),
        Command::Render(args) => run_render(&studio, &args.out),
        Command::Presets => {
            print!("{}", preset_listing());
            Ok(0)
        }
    }
}

fn resolve_config(overrides: ConnectionArgs) -> ClientConfig {
    let mut config = ClientConfig::from_env();
    if let Some(api_base) = overrides.api_base {
        config.api_base = normalize_api_base(&api_base);
    }
    if let Some(api_key) = overrides.api_key.filter(|value| !value.trim().is_empty()) {
        config.api_key = Some(api_key);
    }
    if let Some(model) = overrides.model {
        config.model = model;
    }
    if let Some(data_dir) = overrides.data_dir {
        config.data_dir = data_dir;
    }
    config
}

fn open_studio(config: &ClientConfig) -> Result<CliStudio> {
    let bus = EventBus::new();
    EventWriter::new(config.events_path(), format!("cli-{}", std::process::id())).attach(&bus);
    bus.subscribe(print_event);
    let transport = HttpTransport::new(config.clone())?;
    tracing::debug!(api_base = %config.api_base, model = %config.model, "session opened");
    Ok(Studio::with_bus(
        transport,
        config.model.clone(),
        config.state_path(),
        bus,
    ))
}

fn print_event(event: &ChangeEvent) {
    match event {
        ChangeEvent::Progress(progress) if !progress.is_idle() => {
            eprintln!("[{:>3.0}%] {}", progress.percent, progress.message);
        }
        ChangeEvent::Notice(notice) => match notice.level {
            NoticeLevel::Success => println!("{}", notice.message),
            NoticeLevel::Error => eprintln!("{}", notice.message),
        },
        _ => {}
    }
}

fn run_generate(studio: &mut CliStudio, args: GenerateArgs) -> Result<i32> {
    let preset = match args.preset.as_deref() {
        Some(name) => match QuickPreset::find(name) {
            Some(preset) => Some(preset),
            None => bail!("unknown preset '{name}' (see `imagine presets`)"),
        },
        None => None,
    };
    let aspect = args
        .aspect
        .or(preset.map(|preset| preset.aspect_ratio))
        .unwrap_or_default();
    let count = args
        .count
        .or(preset.map(|preset| preset.count))
        .unwrap_or(1);
    submit(studio, &GenerationRequest::text(args.prompt, aspect, count))
}

fn run_edit(studio: &mut CliStudio, args: EditArgs) -> Result<i32> {
    let image = ReferenceImage::from_path(&args.image)?;
    let request = GenerationRequest::edit(args.prompt, args.aspect, image, args.mode, args.strength);
    submit(studio, &request)
}

fn submit(studio: &mut CliStudio, request: &GenerationRequest) -> Result<i32> {
    match studio.submit(request) {
        Ok(records) => {
            print!("{}", render_gallery_text(&records));
            Ok(0)
        }
        Err(err) => {
            print_hint(&err);
            Ok(1)
        }
    }
}

fn print_hint(err: &DispatchError) {
    if let Some(hint) = err.status().and_then(status_hint) {
        eprintln!("hint: {hint}");
    }
}

fn run_show(studio: &CliStudio, id: &str) -> Result<i32> {
    let Some(record) = studio.gallery().get(id) else {
        eprintln!("No image with id {id}");
        return Ok(1);
    };
    print!("{}", render_gallery_text(std::slice::from_ref(record)));
    println!("prompt: {}", record.prompt);
    if let Some(mode) = record.mode {
        println!("mode: {mode}");
    }
    Ok(0)
}

fn run_delete(studio: &mut CliStudio, args: ConfirmIdArgs) -> Result<i32> {
    if studio.gallery().get(&args.id).is_none() {
        eprintln!("No image with id {}", args.id);
        return Ok(1);
    }
    if !args.yes && !confirm("Delete this image?")? {
        println!("Cancelled");
        return Ok(0);
    }
    let removed = studio.remove(&args.id)?;
    Ok(if removed { 0 } else { 1 })
}

fn run_clear(studio: &mut CliStudio, args: ClearArgs) -> Result<i32> {
    // An empty gallery is reported without prompting.
    if !studio.gallery().is_empty() && !args.yes && !confirm("Clear all images?")? {
        println!("Cancelled");
        return Ok(0);
    }
    studio.clear()?;
    Ok(0)
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("failed reading confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn run_download(studio: &CliStudio, args: DownloadArgs) -> Result<i32> {
    let Some(record) = studio.gallery().get(&args.id) else {
        eprintln!("No image with id {}", args.id);
        return Ok(1);
    };
    let http = studio.dispatcher().transport().client();
    let path = download_image(http, record, &args.dir)?;
    println!("Saved {}", path.display());
    Ok(0)
}

fn run_export(studio: &CliStudio, args: ExportArgs) -> Result<i32> {
    let text = export_history(studio.gallery().records(), args.format)?;
    match args.out {
        Some(out) => {
            write_output(&out, &text)?;
            println!("Exported {} image(s) to {}", studio.gallery().len(), out.display());
        }
        None => print!("{text}"),
    }
    Ok(0)
}

fn run_render(studio: &CliStudio, out: &Path) -> Result<i32> {
    let page = render_gallery_page(studio.gallery().records(), &studio.stats());
    write_output(out, &page)?;
    println!("Rendered {}", out.display());
    Ok(0)
}

fn write_output(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

fn preset_listing() -> String {
    let mut out = String::new();
    for preset in QUICK_PRESETS.iter() {
        let (width, height) = preset.aspect_ratio.dims();
        out.push_str(&format!(
            "{:<18} {:>5} ({width}x{height}) x{}  {}\n",
            preset.name,
            preset.aspect_ratio.as_str(),
            preset.count,
            preset.description
        ));
    }
    out.push('\n');
    for aspect in AspectRatio::ALL {
        let (width, height) = aspect.dims();
        out.push_str(&format!("{:<5} {width}x{height}  {}\n", aspect.as_str(), aspect.label()));
    }
    out
}
