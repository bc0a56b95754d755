//! cbsync CLI
//!
//! Compiles the active blocker configuration into per-target payloads,
//! distributes them to a directory-backed host, and inspects the result.

mod host;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use cb_compiler::{ActiveConfig, AdvancedRulesIndex, LegacyImportFile, UserRules};
use cb_core::target::DistributionTarget;
use cb_sync::{
    compile_all, DirectoryStorage, DistributionOrchestrator, DistributionReport,
    ExtensionStateStore, FilePersistence, LookupRequest, LookupService, ResponseCache,
    RulesStorage, ScriptRequest, SyncConfig,
};

use crate::host::DirectoryHost;

#[derive(Parser)]
#[command(name = "cbsync")]
#[command(about = "Content blocker payload compiler and distribution tools")]
struct Cli {
    /// Runtime settings file
    #[arg(short, long, global = true, default_value = "cbsync.toml")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a configuration into payload files
    Compile {
        /// Active configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory for payload files
        #[arg(short, long, default_value = "rules")]
        output: PathBuf,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Compile, save and reload every target
    Sync {
        /// Active configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Reload every target afterwards, changed or not
        #[arg(long)]
        reload_all: bool,
    },

    /// Show per-target distribution status
    Status {
        /// Report protection as globally off
        #[arg(long)]
        protection_off: bool,
    },

    /// Merge a legacy settings export into a configuration
    ImportLegacy {
        /// Legacy export file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration to merge into; defaults are used when absent
        #[arg(short, long)]
        base: Option<PathBuf>,

        /// Output configuration file
        #[arg(short, long, default_value = "active.json")]
        output: PathBuf,
    },

    /// Look up advanced rules for a page URL
    Lookup {
        /// Page URL
        #[arg(short, long)]
        url: String,

        /// Print the injectable script instead of the rule data
        #[arg(long)]
        script: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = SyncConfig::load(&cli.settings)
        .map_err(|e| format!("Failed to load settings '{}': {}", cli.settings.display(), e))
        .and_then(|settings| match cli.command {
            Commands::Compile {
                config,
                output,
                verbose,
            } => cmd_compile(&config, &output, verbose),
            Commands::Sync { config, reload_all } => run_async(cmd_sync(&settings, &config, reload_all)),
            Commands::Status { protection_off } => run_async(cmd_status(&settings, protection_off)),
            Commands::ImportLegacy {
                input,
                base,
                output,
            } => cmd_import_legacy(&input, base.as_deref(), &output),
            Commands::Lookup { url, script } => run_async(cmd_lookup(&settings, &url, script)),
        });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run_async<F>(future: F) -> Result<(), String>
where
    F: std::future::Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(future)
}

fn read_config(path: &Path) -> Result<ActiveConfig, String> {
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    ActiveConfig::from_json(&json).map_err(|e| format!("Invalid configuration '{}': {}", path.display(), e))
}

async fn open_orchestrator(settings: &SyncConfig) -> Result<DistributionOrchestrator, String> {
    let persistence = Arc::new(FilePersistence::new(&settings.state_dir));
    let store = ExtensionStateStore::open(persistence).await.map_err(|e| {
        format!("Failed to open state in '{}': {}", settings.state_dir.display(), e)
    })?;
    let storage: Arc<dyn RulesStorage> = Arc::new(DirectoryStorage::new(&settings.rules_dir));
    let host = Arc::new(DirectoryHost::new(storage.clone()));
    Ok(DistributionOrchestrator::new(Arc::new(store), host, storage))
}

fn cmd_compile(config_path: &Path, output: &Path, verbose: bool) -> Result<(), String> {
    let start = Instant::now();
    let config = read_config(config_path)?;
    let results = compile_all(&config);

    fs::create_dir_all(output)
        .map_err(|e| format!("Failed to create '{}': {}", output.display(), e))?;

    let mut total_bytes = 0usize;
    for result in &results {
        let path = output.join(format!("{}.json", result.target.id()));
        fs::write(&path, result.payload.as_str())
            .map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
        total_bytes += result.payload.as_str().len();

        if verbose || result.over_limit {
            println!(
                "  {:<10} {:>6} -> {:>6} entries ({} unsupported, {} discarded){}",
                result.target.id(),
                result.source_count,
                result.applied_count,
                result.error_count,
                result.discarded_count,
                if result.over_limit { " OVER LIMIT" } else { "" }
            );
        }
    }

    println!("Compiled {} targets to '{}'", results.len(), output.display());
    println!("  Size:     {} bytes ({:.1} KB)", total_bytes, total_bytes as f64 / 1024.0);
    println!("  Time:     {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    Ok(())
}

async fn cmd_sync(settings: &SyncConfig, config_path: &Path, reload_all: bool) -> Result<(), String> {
    let config = read_config(config_path)?;
    let orchestrator = open_orchestrator(settings).await?;

    let report = orchestrator.distribute(&config).await;
    print_report(&report);

    if reload_all {
        let aggregate = orchestrator.request_reload_all().await;
        for outcome in aggregate.outcomes.iter().filter(|outcome| !outcome.succeeded) {
            println!(
                "  {:<10} reload failed: {}",
                outcome.target.id(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        if !aggregate.is_success() {
            return Err(format!("{} targets failed to reload", aggregate.failure_count));
        }
    }

    if !report.is_success() {
        return Err(format!("{} targets failed", report.failure_count));
    }
    Ok(())
}

fn print_report(report: &DistributionReport) {
    for target in &report.targets {
        let reload = match &target.reload {
            None => "unchanged".to_string(),
            Some(outcome) if outcome.succeeded => "reloaded".to_string(),
            Some(outcome) => format!(
                "reload failed: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        };
        println!(
            "  {:<10} {:>6} entries{}  {}",
            target.target.id(),
            target.applied_count,
            if target.over_limit { " (over limit)" } else { "" },
            reload
        );
        if !target.payload_saved {
            println!("  {:<10} payload was not saved", target.target.id());
        }
    }
}

async fn cmd_status(settings: &SyncConfig, protection_off: bool) -> Result<(), String> {
    let orchestrator = open_orchestrator(settings).await?;
    let store = orchestrator.store();

    for target in DistributionTarget::ALL {
        let status = orchestrator.status(target);
        let applied = store
            .get_state(target)
            .map(|state| state.last_applied_rule_count.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<10} {:<18} {:>6}", target.id(), format!("{status:?}"), applied);
    }

    let summary = orchestrator.protection_summary(!protection_off);
    let json = serde_json::to_string(&summary).map_err(|e| format!("Failed to encode summary: {}", e))?;
    println!("Protection: {}", json);
    Ok(())
}

fn cmd_import_legacy(input: &Path, base: Option<&Path>, output: &Path) -> Result<(), String> {
    let json = fs::read_to_string(input)
        .map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;
    let file = LegacyImportFile::parse(&json)
        .map_err(|e| format!("Invalid legacy export '{}': {}", input.display(), e))?;
    let import = file.map();

    let mut config = match base {
        Some(path) => read_config(path)?,
        None => ActiveConfig::default(),
    };

    if import.filters.have_filters {
        for filter in &mut config.filters {
            if import.filters.enabled_ids.contains(&filter.id) {
                filter.enabled = true;
            } else if import.filters.disabled_ids.contains(&filter.id) {
                filter.enabled = false;
            }
        }
    } else {
        tracing::warn!("Legacy export has no filters; filter state left unchanged");
    }
    for id in &import.filters.conflicts {
        tracing::warn!("Filter {} was both enabled and disabled; kept enabled", id);
    }

    // Allowlist rules arrive already expanded among the user rules
    config.user_rules = UserRules {
        enabled: import.user_rules.enabled,
        rules: import.user_rules.rules.clone(),
    };
    config.allowlist.enabled = false;
    config.allowlist.allow_domains.clear();
    config.allowlist.block_domains.clear();

    let out = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("Failed to encode configuration: {}", e))?;
    fs::write(output, out).map_err(|e| format!("Failed to write '{}': {}", output.display(), e))?;

    println!("Imported legacy settings to '{}'", output.display());
    println!("  Enabled filters:  {}", import.filters.enabled_ids.len());
    println!("  Disabled filters: {}", import.filters.disabled_ids.len());
    println!("  User rules:       {}", config.user_rules.rules.len());
    println!("  Custom filters:   {} (subscribe separately)", import.custom_filters.len());

    Ok(())
}

async fn cmd_lookup(settings: &SyncConfig, url: &str, script: bool) -> Result<(), String> {
    let storage = DirectoryStorage::new(&settings.rules_dir);
    let bundle = storage
        .load_payload(DistributionTarget::Advanced)
        .await
        .map_err(|e| format!("Failed to read advanced payload: {}", e))?
        .ok_or_else(|| format!("No advanced payload in '{}'; run sync first", settings.rules_dir.display()))?;
    let index = AdvancedRulesIndex::from_bundle(&bundle)
        .map_err(|e| format!("Invalid advanced payload: {}", e))?;

    let service = LookupService::new(
        Arc::new(index),
        Arc::new(ResponseCache::new(settings.cache_settings())),
    );

    let out = if script {
        let response = service.respond(&ScriptRequest {
            url: url.to_string(),
            request_id: 1,
        });
        serde_json::to_string_pretty(&response)
    } else {
        let data = service
            .handle(&LookupRequest::advanced_blocking_data(url))
            .map_err(|e| format!("Lookup failed: {}", e))?
            .unwrap_or_default();
        serde_json::to_string_pretty(&data)
    }
    .map_err(|e| format!("Failed to encode response: {}", e))?;

    println!("{}", out);
    Ok(())
}
