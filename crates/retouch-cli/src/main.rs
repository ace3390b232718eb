use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use retouch_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use retouch_contracts::history::EditorTool;
use retouch_contracts::session::summary::read_summary;
use retouch_engine::export::{export_file, resolve_export_path};
use retouch_engine::{
    EditEngine, EditOperation, ExportFormat, ExportOptions, Hotspot, Region, Snapshot,
};
use serde_json::{json, Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_EDIT_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Parser)]
#[command(
    name = "retouch",
    version,
    about = "Prompt-driven photo retouching with undo/redo history"
)]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Run(RunArgs),
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct ModelArgs {
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_EDIT_MODEL)]
    edit_model: String,
    #[arg(long, default_value = DEFAULT_TEXT_MODEL)]
    text_model: String,
    /// Provider tuning such as `request_timeout=120`; repeatable.
    #[arg(long = "provider-option", value_name = "KEY=VALUE")]
    provider_options: Vec<String>,
}

#[derive(Debug, Args)]
struct ExportFlags {
    #[arg(long, default_value = "jpeg")]
    format: String,
    #[arg(long, default_value_t = 90)]
    quality: u8,
    #[arg(long, default_value_t = 1.0)]
    scale: f64,
}

impl ExportFlags {
    fn options(&self) -> Result<ExportOptions> {
        let options = ExportOptions {
            format: self.format.parse()?,
            quality: self.quality,
            scale: self.scale,
        };
        options.validate()?;
        Ok(options)
    }
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// Chat command applied after upload; repeatable.
    #[arg(long = "step")]
    steps: Vec<String>,
    #[arg(long)]
    export: Option<PathBuf>,
    #[command(flatten)]
    export_flags: ExportFlags,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    session: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    export_flags: ExportFlags,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_steps(args),
        Command::Export(args) => run_export(args),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn open_engine(out: &Path, models: &ModelArgs) -> Result<EditEngine> {
    let events_path = models
        .events
        .clone()
        .unwrap_or_else(|| out.join("events.jsonl"));
    let mut engine = EditEngine::new(
        out,
        &events_path,
        Some(models.edit_model.clone()),
        Some(models.text_model.clone()),
    )?;
    engine.set_provider_options(parse_provider_options(&models.provider_options)?);
    Ok(engine)
}

fn parse_provider_options(raw: &[String]) -> Result<Map<String, Value>> {
    let mut options = Map::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("provider option '{item}' must look like KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("provider option '{item}' has an empty key");
        }
        let value = value.trim();
        let parsed = match value.parse::<f64>() {
            Ok(number) if number.is_finite() => json!(number),
            _ => Value::String(value.to_string()),
        };
        options.insert(key.to_string(), parsed);
    }
    Ok(options)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut engine = open_engine(&args.out, &args.models)?;
    let mut stdout = io::stdout();

    println!(
        "Retouch chat started (session {}). Type /help for commands.",
        engine.session_id()
    );
    if let Some(image) = args.image.as_ref() {
        match engine.upload(image) {
            Ok(snapshot) => {
                print_upload(&engine, &snapshot, &mut stdout)?;
                println!("{}", status_line(&engine));
            }
            Err(err) => println!("Error: {err:#}"),
        }
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        stdout.flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match execute_intent(&mut engine, &intent, &mut stdout) {
            Ok(true) => println!("{}", status_line(&engine)),
            Ok(false) => {}
            Err(err) => println!("Error: {err:#}"),
        }
    }

    engine.finish()?;
    Ok(())
}

fn run_steps(args: RunArgs) -> Result<i32> {
    let export_options = args.export_flags.options()?;
    let mut engine = open_engine(&args.out, &args.models)?;
    let mut stdout = io::stdout();

    let snapshot = engine.upload(&args.image)?;
    print_upload(&engine, &snapshot, &mut stdout)?;
    for step in &args.steps {
        let intent = parse_intent(step);
        execute_intent(&mut engine, &intent, &mut stdout)
            .with_context(|| format!("step '{step}' failed"))?;
        info!(step = %step, "step applied");
    }
    println!("{}", status_line(&engine));

    if let Some(export_path) = args.export.as_ref() {
        let result = engine.export(&export_options, export_path)?;
        println!("Exported to {}", result.path.display());
    }
    engine.finish()?;
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let options = args.export_flags.options()?;
    let summary_path = args.session.join("summary.json");
    let summary = read_summary(&summary_path)
        .with_context(|| format!("failed reading {}", summary_path.display()))?;
    let Some(current) = summary.current_snapshot else {
        bail!("session {} has no current snapshot", args.session.display());
    };
    let out_path = resolve_export_path(&args.out, options.format);
    let result = export_file(Path::new(&current), &options, &out_path)?;
    println!(
        "Exported to {} ({}x{})",
        result.path.display(),
        result.width,
        result.height
    );
    Ok(0)
}

/// Runs one parsed chat intent. Returns whether the history or compare state changed.
fn execute_intent(engine: &mut EditEngine, intent: &Intent, out: &mut dyn Write) -> Result<bool> {
    match intent.action.as_str() {
        "noop" => Ok(false),
        "help" => {
            writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?;
            Ok(false)
        }
        "upload" => {
            let Some(path) = string_arg(intent, "path") else {
                bail!("/upload requires a path");
            };
            let snapshot = engine.upload(Path::new(&path))?;
            print_upload(engine, &snapshot, out)?;
            Ok(true)
        }
        "start_over" => {
            engine.start_over()?;
            writeln!(out, "History cleared. Use /upload to start with a new image.")?;
            Ok(true)
        }
        "undo" => {
            let moved = engine.undo()?;
            if !moved {
                writeln!(out, "Nothing to undo.")?;
            }
            Ok(moved)
        }
        "redo" => {
            let moved = engine.redo()?;
            if !moved {
                writeln!(out, "Nothing to redo.")?;
            }
            Ok(moved)
        }
        "reset" => {
            if engine.current().is_none() {
                writeln!(out, "Nothing to reset.")?;
                return Ok(false);
            }
            engine.reset()?;
            writeln!(out, "Reset to the original image.")?;
            Ok(true)
        }
        "retouch" | "filter" | "adjust" | "magic_fill" | "crop" | "upscale" => {
            let operation = operation_from_intent(intent)?;
            let snapshot = engine.apply(operation)?;
            writeln!(
                out,
                "Applied {}: {} ({}x{})",
                snapshot.origin.as_str(),
                snapshot.path.display(),
                snapshot.width,
                snapshot.height
            )?;
            if let Some(reason) = engine.last_fallback_reason() {
                writeln!(out, "Model note: {reason}")?;
            }
            Ok(true)
        }
        "cycle_compare" => {
            engine.cycle_compare_mode()?;
            writeln!(out, "{}", compare_line(engine))?;
            Ok(true)
        }
        "toggle_compare_target" => {
            engine.toggle_compare_target()?;
            writeln!(out, "{}", compare_line(engine))?;
            Ok(true)
        }
        "set_tool" => {
            let raw = string_arg(intent, "tool").unwrap_or_default();
            let Some(tool) = EditorTool::parse(&raw) else {
                let names: Vec<&str> = EditorTool::ALL.iter().map(|tool| tool.as_str()).collect();
                bail!("unknown tool '{raw}' (expected one of: {})", names.join(", "));
            };
            engine.set_active_tool(tool)?;
            writeln!(out, "Tool set to {}", tool.as_str())?;
            Ok(true)
        }
        "describe" => {
            let text = engine.describe_current()?;
            writeln!(out, "Description: {text}")?;
            Ok(false)
        }
        "status" => {
            writeln!(out, "{}", status_line(engine))?;
            if let Some(current) = engine.current() {
                writeln!(out, "Current: {}", current.path.display())?;
            }
            if let Some(description) = engine.description() {
                writeln!(out, "Description: {description}")?;
            }
            writeln!(
                out,
                "Models: edit={} text={}",
                engine.edit_model().unwrap_or("default"),
                engine.text_model().unwrap_or("default")
            )?;
            Ok(false)
        }
        "show_prompts" => {
            if engine.prompts().is_empty() {
                writeln!(out, "No prompts yet.")?;
            }
            for entry in engine.prompts().recent() {
                let star = if entry.is_starred { "*" } else { " " };
                writeln!(out, "{star} [{}] {}", entry.kind.label(), entry.content)?;
            }
            Ok(false)
        }
        "clear_prompts" => {
            engine.clear_prompts()?;
            writeln!(out, "Prompt history cleared.")?;
            Ok(false)
        }
        "set_edit_model" => {
            let Some(model) = string_arg(intent, "model") else {
                bail!("/edit_model requires a model name");
            };
            engine.set_edit_model(Some(model.clone()));
            writeln!(out, "Edit model set to {model}")?;
            Ok(false)
        }
        "set_text_model" => {
            let Some(model) = string_arg(intent, "model") else {
                bail!("/text_model requires a model name");
            };
            engine.set_text_model(Some(model.clone()));
            writeln!(out, "Text model set to {model}")?;
            Ok(false)
        }
        "export" => {
            let (options, out_path) = export_request(intent, engine.session_dir())?;
            let result = engine.export(&options, &out_path)?;
            writeln!(
                out,
                "Exported to {} ({}x{}, {} bytes)",
                result.path.display(),
                result.width,
                result.height,
                result.bytes
            )?;
            Ok(false)
        }
        "invalid" => {
            let message =
                string_arg(intent, "error").unwrap_or_else(|| "invalid command".to_string());
            bail!("{message}")
        }
        "unknown" => {
            let command = string_arg(intent, "command").unwrap_or_default();
            bail!("Unknown command: /{command}. Type /help for commands.")
        }
        other => bail!("unsupported action '{other}'"),
    }
}

fn operation_from_intent(intent: &Intent) -> Result<EditOperation> {
    let prompt = || -> Result<String> {
        intent
            .prompt
            .clone()
            .filter(|value| !value.trim().is_empty())
            .context("a prompt is required")
    };
    let region = || -> Result<Region> {
        let raw = intent
            .command_args
            .get("region")
            .cloned()
            .context("a region is required")?;
        serde_json::from_value(raw).context("region values out of range")
    };

    Ok(match intent.action.as_str() {
        "retouch" => {
            let hotspot = match intent.command_args.get("hotspot") {
                Some(raw) => Some(
                    serde_json::from_value::<Hotspot>(raw.clone())
                        .context("hotspot values out of range")?,
                ),
                None => None,
            };
            EditOperation::Retouch {
                prompt: prompt()?,
                hotspot,
            }
        }
        "filter" => EditOperation::Filter { prompt: prompt()? },
        "adjust" => EditOperation::Adjustment { prompt: prompt()? },
        "magic_fill" => EditOperation::MagicFill { region: region()? },
        "crop" => EditOperation::Crop { region: region()? },
        "upscale" => {
            let factor = intent
                .command_args
                .get("factor")
                .and_then(Value::as_u64)
                .unwrap_or(2);
            EditOperation::Upscale {
                factor: u32::try_from(factor).context("upscale factor out of range")?,
            }
        }
        other => bail!("'{other}' is not an edit"),
    })
}

fn export_request(intent: &Intent, session_dir: &Path) -> Result<(ExportOptions, PathBuf)> {
    let mut options = ExportOptions::default();
    if let Some(format) = string_arg(intent, "format") {
        options.format = format.parse::<ExportFormat>()?;
    }
    if let Some(quality) = intent.command_args.get("quality").and_then(Value::as_u64) {
        options.quality = u8::try_from(quality)
            .ok()
            .context("export quality must be between 1 and 100")?;
    }
    if let Some(scale) = intent.command_args.get("scale").and_then(Value::as_f64) {
        options.scale = scale;
    }
    options.validate()?;
    let out_path = string_arg(intent, "out")
        .map(PathBuf::from)
        .unwrap_or_else(|| session_dir.to_path_buf());
    Ok((options, out_path))
}

fn string_arg(intent: &Intent, key: &str) -> Option<String> {
    intent
        .command_args
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn print_upload(engine: &EditEngine, snapshot: &Snapshot, out: &mut dyn Write) -> Result<()> {
    writeln!(
        out,
        "Loaded {} ({}x{})",
        snapshot.path.display(),
        snapshot.width,
        snapshot.height
    )?;
    if let Some(description) = engine.description() {
        writeln!(out, "Description: {description}")?;
    }
    Ok(())
}

fn status_line(engine: &EditEngine) -> String {
    let workspace = engine.workspace();
    let history = workspace.history();
    let position = match history.cursor() {
        Some(cursor) => format!("{}/{}", cursor + 1, history.len()),
        None => "empty".to_string(),
    };
    format!(
        "History {position} | undo: {} | redo: {} | compare: {} vs {} | tool: {}",
        yes_no(workspace.can_undo()),
        yes_no(workspace.can_redo()),
        workspace.compare_mode().as_str(),
        workspace.compare_target().as_str(),
        workspace.tool().as_str()
    )
}

fn compare_line(engine: &EditEngine) -> String {
    let comparison = engine.comparison();
    let baseline = match comparison.baseline {
        Some(snapshot) => snapshot.id.clone(),
        None => "none yet".to_string(),
    };
    format!(
        "Compare: {} vs {} (baseline: {baseline})",
        comparison.mode.as_str(),
        engine.workspace().compare_target().as_str()
    )
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use image::{DynamicImage, Rgba, RgbaImage};
    use retouch_contracts::chat::parse_intent;
    use retouch_engine::{EditEngine, EditOperation, ExportFormat, Hotspot, Region};

    use serde_json::json;

    use super::{
        execute_intent, export_request, operation_from_intent, parse_provider_options,
        status_line,
    };

    fn engine_with_photo(root: &Path) -> anyhow::Result<(EditEngine, PathBuf)> {
        let photo = root.join("photo.png");
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(12, 12, Rgba([200, 100, 50, 255])))
            .save(&photo)?;
        let session = root.join("session");
        let engine = EditEngine::new(
            &session,
            session.join("events.jsonl"),
            Some("dryrun-edit-1".to_string()),
            Some("dryrun-text-1".to_string()),
        )?;
        Ok((engine, photo))
    }

    fn run_line(engine: &mut EditEngine, line: &str) -> anyhow::Result<(bool, String)> {
        let mut out = Vec::new();
        let changed = execute_intent(engine, &parse_intent(line), &mut out)?;
        Ok((changed, String::from_utf8(out)?))
    }

    #[test]
    fn operations_are_built_from_intents() -> anyhow::Result<()> {
        assert_eq!(
            operation_from_intent(&parse_intent("/retouch 3 4 add snow"))?,
            EditOperation::Retouch {
                prompt: "add snow".to_string(),
                hotspot: Some(Hotspot { x: 3, y: 4 }),
            }
        );
        assert_eq!(
            operation_from_intent(&parse_intent("brighten the sky"))?,
            EditOperation::Retouch {
                prompt: "brighten the sky".to_string(),
                hotspot: None,
            }
        );
        assert_eq!(
            operation_from_intent(&parse_intent("/crop 1 2 3 4"))?,
            EditOperation::Crop {
                region: Region {
                    x: 1,
                    y: 2,
                    width: 3,
                    height: 4
                }
            }
        );
        assert_eq!(
            operation_from_intent(&parse_intent("/upscale"))?,
            EditOperation::Upscale { factor: 2 }
        );
        assert!(operation_from_intent(&parse_intent("/fill 1 2 3 99999999999")).is_err());
        Ok(())
    }

    #[test]
    fn provider_options_parse_numbers_and_strings() -> anyhow::Result<()> {
        let options = parse_provider_options(&[
            "request_timeout=120".to_string(),
            "note = warm".to_string(),
        ])?;
        assert_eq!(options["request_timeout"], json!(120.0));
        assert_eq!(options["note"], json!("warm"));
        assert!(parse_provider_options(&["no-equals".to_string()]).is_err());
        assert!(parse_provider_options(&["=5".to_string()]).is_err());
        Ok(())
    }

    #[test]
    fn export_request_applies_overrides() -> anyhow::Result<()> {
        let session = Path::new("/tmp/session");
        let (options, out) =
            export_request(&parse_intent("/export png scale=0.5 out=/tmp/a.png"), session)?;
        assert_eq!(options.format, ExportFormat::Png);
        assert_eq!(options.quality, 90);
        assert_eq!(options.scale, 0.5);
        assert_eq!(out, PathBuf::from("/tmp/a.png"));

        let (defaults, default_out) = export_request(&parse_intent("/export"), session)?;
        assert_eq!(defaults.format, ExportFormat::Jpeg);
        assert_eq!(default_out, session.to_path_buf());

        assert!(export_request(&parse_intent("/export quality=300"), session).is_err());
        assert!(export_request(&parse_intent("/export scale=9"), session).is_err());
        Ok(())
    }

    #[test]
    fn chat_session_edits_and_reports_status() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut engine, photo) = engine_with_photo(temp.path())?;
        assert_eq!(
            status_line(&engine),
            "History empty | undo: no | redo: no | compare: slider vs previous | tool: retouch"
        );

        let (changed, output) = run_line(&mut engine, &format!("/upload {}", photo.display()))?;
        assert!(changed);
        assert!(output.contains("Loaded"));
        assert!(output.contains("Description: A 12x12 image"));

        let (changed, _) = run_line(&mut engine, "/filter cinematic teal")?;
        assert!(changed);
        run_line(&mut engine, "/tool crop")?;
        assert!(status_line(&engine).ends_with("tool: crop"));
        run_line(&mut engine, "/crop 0 0 6 6")?;
        assert_eq!(
            status_line(&engine),
            "History 3/3 | undo: yes | redo: no | compare: slider vs previous | tool: retouch"
        );

        let (moved, _) = run_line(&mut engine, "/undo")?;
        assert!(moved);
        assert!(status_line(&engine).starts_with("History 2/3 | undo: yes | redo: yes"));

        run_line(&mut engine, "/compare")?;
        let (_, compare) = run_line(&mut engine, "/compare_to")?;
        assert!(compare.starts_with("Compare: flicker vs original"));

        let (_, prompts) = run_line(&mut engine, "/prompts")?;
        assert!(prompts.starts_with("* [Filter] cinematic teal"));
        Ok(())
    }

    #[test]
    fn chat_errors_surface_as_results() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut engine, _) = engine_with_photo(temp.path())?;
        assert!(run_line(&mut engine, "/filter sepia").is_err());
        assert!(run_line(&mut engine, "/lasso").is_err());
        assert!(run_line(&mut engine, "/crop 1 2").is_err());
        assert!(run_line(&mut engine, "/tool lasso").is_err());

        let (moved, output) = run_line(&mut engine, "/redo")?;
        assert!(!moved);
        assert_eq!(output, "Nothing to redo.\n");
        Ok(())
    }

    #[test]
    fn chat_export_writes_into_session_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut engine, photo) = engine_with_photo(temp.path())?;
        run_line(&mut engine, &format!("/upload {}", photo.display()))?;
        let (_, output) = run_line(&mut engine, "/export png")?;
        assert!(output.starts_with("Exported to"));
        assert!(engine.session_dir().join("retouch-export.png").exists());
        Ok(())
    }
}
