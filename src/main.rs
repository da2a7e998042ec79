use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use linkaudit::apply_curl::run_apply_curl;
use linkaudit::classifier::{Classification, ValidationIssue};
use linkaudit::cli::{config_path_hint, rewrite_cluster_flags, Cli, ClassifyArgs, Commands, InitArgs};
use linkaudit::config::{self, AppConfig};
use linkaudit::export::{print_action_summary, write_rows};
use linkaudit::highperf::run_highperf;
use linkaudit::logger::{RunLogger, VerbosityLevel};
use linkaudit::pipeline::{load_core_exports_map, run_audit, run_classify, run_dashboard};

fn main() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().collect();

    // Aliases for --inlinks_<cluster> flags have to be known before clap sees argv
    let hint = config_path_hint(&raw_args);
    let aliases = AppConfig::resolve(hint.as_deref())
        .or_else(|_| AppConfig::embedded_default())
        .map(|c| c.taxonomy.cluster_flag_aliases)
        .unwrap_or_default();
    let cli = Cli::parse_from(rewrite_cluster_flags(raw_args, &aliases));

    let default_level = if cli.verbose >= 2 { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(format!("linkaudit={}", default_level).parse()?))
        .init();

    if let Commands::Init(init) = &cli.command {
        return run_init(init);
    }

    let mut app_config = match AppConfig::resolve(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(config::ConfigError::FileNotFound(path)) => {
            bail!(
                "Configuration file not found at: {}\n   Run `linkaudit init --path {}` to create it.",
                path.display(),
                path.display()
            );
        }
        Err(e) => return Err(e).context("Configuration error"),
    };

    let verbosity = VerbosityLevel::from_flags(cli.verbose, cli.quiet);
    let logger = match &cli.log_file {
        Some(path) => RunLogger::with_log_file(verbosity, path.clone()),
        None => RunLogger::new(verbosity),
    };

    let result = dispatch(&cli, &mut app_config, &logger);

    if let Err(e) = logger.export_logs() {
        eprintln!("Failed to write log file: {}", e);
    }
    result
}

fn dispatch(cli: &Cli, app_config: &mut AppConfig, logger: &RunLogger) -> Result<()> {
    let quiet = logger.verbosity() == VerbosityLevel::Silent;

    match &cli.command {
        Commands::Audit(args) => {
            logger.record_command("audit");
            args.site.apply(app_config);
            let analysis = run_audit(&args.source_paths(), &args.output.to_paths(), app_config, logger)?;
            if !quiet {
                print_action_summary(&analysis.recommendations);
            }
        }
        Commands::Dashboard(args) => {
            logger.record_command("dashboard");
            args.site.apply(app_config);
            let (inlinks, outlinks) = match &args.core_exports_map {
                Some(map) => load_core_exports_map(map)?,
                None => (Vec::new(), Vec::new()),
            };
            let analysis = run_dashboard(
                &args.source_paths(inlinks, outlinks),
                &args.output.to_paths(),
                args.hide_appendices,
                app_config,
                logger,
            )?;
            if !quiet {
                print_action_summary(&analysis.recommendations);
            }
        }
        Commands::ApplyCurlMap(args) => {
            logger.record_command("apply-curl-map");
            if let Some(domain) = &args.internal_domain {
                app_config.site.internal_domain = domain.trim().to_string();
            }
            let stats = run_apply_curl(&args.paths(), app_config, logger)?;
            logger.info(&format!(
                "Curl map applied: {} ADD rows dropped, {} FIX rows relabeled, {} suggestions filled, {} normalized",
                stats.dropped_adds, stats.relabeled_fixes, stats.filled_suggestions, stats.normalized_suggestions
            ));
        }
        Commands::Highperf(args) => {
            logger.record_command("highperf");
            args.apply(app_config);
            let outcome = run_highperf(&args.paths(), app_config, logger)?;
            if !quiet {
                let mut all = outcome.fixes.clone();
                all.extend(outcome.adds.iter().cloned());
                print_action_summary(&all);
            }
        }
        Commands::Classify(args) => {
            logger.record_command("classify");
            classify(args, app_config, logger)?;
        }
        Commands::Init(_) => unreachable!("handled before configuration is loaded"),
    }

    logger.print_final_summary();
    Ok(())
}

fn classify(args: &ClassifyArgs, app_config: &mut AppConfig, logger: &RunLogger) -> Result<()> {
    if let Some(domain) = &args.internal_domain {
        app_config.site.internal_domain = domain.trim().to_string();
    }
    let (classifications, warnings) = run_classify(
        &args.urls,
        args.metadata.as_deref(),
        args.bucket_rules.as_deref(),
        app_config,
    )?;
    logger.record_input_rows(classifications.len());

    let rows: Vec<Vec<String>> = classifications.iter().map(Classification::to_row).collect();
    write_rows(&args.out_csv, &Classification::HEADERS, &rows)?;
    logger.log_export_success(&args.out_csv);

    if let Some(path) = &args.out_warnings_csv {
        let rows: Vec<Vec<String>> = warnings.iter().map(ValidationIssue::to_row).collect();
        write_rows(path, &ValidationIssue::HEADERS, &rows)?;
        logger.log_export_success(path);
    } else if !warnings.is_empty() {
        logger.warn(&format!("{} classifier warnings (use --out_warnings_csv to export them)", warnings.len()));
    }
    Ok(())
}

fn run_init(args: &InitArgs) -> Result<()> {
    let path = args.path.as_deref().unwrap_or(Path::new(config::CONFIG_PATH));
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let created = AppConfig::create_default_config_at(path)
        .with_context(|| format!("Failed to create configuration file at {}", path.display()))?;
    println!("Created default configuration file at: {}", created.display());
    println!("   Edit this file to customize settings, then run linkaudit again.");
    Ok(())
}
