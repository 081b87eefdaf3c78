//! trainer-lua CLI - runs Lua automations against an offline process image.
//!
//! This is the main binary entry point. See the `trainer_lua` library for the
//! automation runtime itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use trainer_lua::{
    Automation, AutomationEvent, AutomationOptions, Config, GameApi, LoadRequest, MemoryImage,
    ModDescriptor, ModsLayout,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "trainer-lua")]
#[command(version)]
#[command(about = "Run Lua trainer automations at a fixed frame rate")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an automation and tick it until Ctrl-C, a tick limit, or a script error
    Run {
        #[command(flatten)]
        target: ScriptTarget,
        /// Process id exposed to the script as GAME_PID
        #[arg(long, default_value_t = 1)]
        pid: u32,
        /// Stop after this many tick intervals
        #[arg(long)]
        ticks: Option<u64>,
        /// Raw memory dump to seed the process image with
        #[arg(long)]
        memory: Option<PathBuf>,
        /// Address the memory dump is mapped at (decimal or 0x-prefixed hex)
        #[arg(long, default_value = "0", value_parser = parse_address)]
        base: u32,
    },
    /// Load an automation, run OnLoad and OnUnload, and report any error
    Check {
        #[command(flatten)]
        target: ScriptTarget,
    },
    /// Print the effective configuration
    Config,
}

#[derive(clap::Args)]
struct ScriptTarget {
    /// Main script of the automation
    script: PathBuf,
    /// Game id selecting libs/<game> (default: config, then the script's game folder)
    #[arg(long)]
    game: Option<String>,
    /// Mods root (default: config / TRAINER_MODS_ROOT)
    #[arg(long)]
    mods_root: Option<PathBuf>,
    /// Display name of the owning mod (default: the script's folder name)
    #[arg(long)]
    name: Option<String>,
}

fn parse_address(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid address '{value}': {e}"))
}

/// Everything needed to load one automation.
struct Prepared {
    layout: ModsLayout,
    request: LoadRequest,
}

impl ScriptTarget {
    fn prepare(self, config: &Config, process_id: Option<u32>) -> Result<Prepared> {
        let layout = self.mods_root.map_or_else(|| config.layout(), ModsLayout::new);
        let layout = ModsLayout::new(
            std::path::absolute(layout.root())
                .with_context(|| format!("Invalid mods root: {}", layout.root().display()))?,
        );
        let script = std::path::absolute(&self.script)
            .with_context(|| format!("Invalid script path: {}", self.script.display()))?;

        let game_id = self
            .game
            .or_else(|| config.default_game_id.clone())
            .or_else(|| game_from_path(&layout, &script))
            .ok_or_else(|| anyhow!("Could not determine the game id; pass --game"))?;

        let name = self.name.unwrap_or_else(|| mod_name_from_path(&script));
        let owner = Arc::new(ModDescriptor::new(layout.display_name(&script), name));

        Ok(Prepared {
            layout,
            request: LoadRequest {
                main_script: script,
                game_id,
                owner,
                process_id,
            },
        })
    }
}

/// `<mods_root>/<game>/...` → `<game>`.
fn game_from_path(layout: &ModsLayout, script: &Path) -> Option<String> {
    let relative = script.strip_prefix(layout.root()).ok()?;
    let mut components = relative.components();
    let game = components.next()?.as_os_str().to_str()?.to_string();
    // The script itself is not a game folder.
    components.next()?;
    Some(game)
}

fn mod_name_from_path(script: &Path) -> String {
    script
        .parent()
        .and_then(Path::file_name)
        .or_else(|| script.file_stem())
        .map_or_else(|| "automation".to_string(), |n| n.to_string_lossy().into_owned())
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("TRAINER_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_millis().init();
    Ok(())
}

fn run(
    config: &Config,
    target: ScriptTarget,
    pid: u32,
    ticks: Option<u64>,
    memory: Option<&Path>,
    base: u32,
) -> Result<()> {
    let Prepared { layout, request } = target.prepare(config, Some(pid))?;

    let image = match memory {
        Some(path) => MemoryImage::from_dump(pid, path, base)?,
        None => MemoryImage::new(pid),
    };
    let api: Arc<dyn GameApi> = Arc::new(image);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let options = AutomationOptions {
        tick_interval: config.tick_interval(),
        events: Some(events_tx),
    };
    let automation = Automation::load(request, &layout, api, options)
        .map_err(|e| anyhow!("Failed to load automation: {e}"))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    ctrlc::set_handler(move || on_signal.cancel()).context("Failed to install Ctrl-C handler")?;

    let mut progress = automation.scheduler().subscribe();
    if !automation.start(runtime.handle()) {
        bail!("Automation {} could not be started", automation.owner().name);
    }
    log::info!(
        "Ticking {} every {:?}",
        automation.owner().name,
        automation.scheduler().interval()
    );

    let failed = runtime.block_on(async {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    log::info!("Interrupted, unloading {}", automation.owner().name);
                    return false;
                }
                Some(event) = events_rx.recv() => {
                    if let AutomationEvent::Failed { hook, error, .. } = event {
                        log::error!("{} stopped the automation: {}", hook, error);
                        return true;
                    }
                }
                Ok(()) = progress.changed(), if ticks.is_some() => {
                    if ticks.is_some_and(|limit| *progress.borrow_and_update() >= limit) {
                        return false;
                    }
                }
            }
        }
    });

    // A failed automation takes the whole mod down with it.
    automation
        .unload()
        .map_err(|e| anyhow!("Failed to unload automation: {e}"))?;
    log::info!(
        "{} finished after {} ticks ({})",
        automation.owner().name,
        automation.scheduler().tick_count(),
        automation.state()
    );

    if failed {
        bail!("Automation {} failed", automation.owner().name);
    }
    Ok(())
}

fn check(config: &Config, target: ScriptTarget) -> Result<()> {
    let Prepared { layout, request } = target.prepare(config, None)?;
    let api: Arc<dyn GameApi> = Arc::new(MemoryImage::new(1));

    let automation = Automation::load(request, &layout, api, AutomationOptions::default())
        .map_err(|e| anyhow!("Failed to load automation: {e}"))?;
    automation
        .unload()
        .map_err(|e| anyhow!("Failed to unload automation: {e}"))?;

    println!("{}: OK", automation.owner().id);
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Run {
            target,
            pid,
            ticks,
            memory,
            base,
        } => run(&config, target, pid, ticks, memory.as_deref(), base)?,
        Commands::Check { target } => check(&config, target)?,
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    Ok(())
}
