use std::path::PathBuf;
use std::process::ExitCode;

use clap::{value_parser, Arg, ArgAction, Command};

use samify_assets::PlacementPolicy;
use samify_core::{
    OutputFormat, Pipeline, PipelineOptions, RunStatus, TargetFormat, TemplateSource,
};
use samify_metadata::MetadataBundle;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Command::new("samify")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Structural CDK-to-SAM refactoring for CloudFormation templates")
        .subcommand_required(true)
        .subcommand(
            Command::new("process")
                .about("Clean a template and optionally fold it into SAM constructs")
                .arg(
                    Arg::new("input")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Template file (JSON or YAML)"),
                )
                .arg(
                    Arg::new("sam")
                        .long("sam")
                        .action(ArgAction::SetTrue)
                        .help("Fold resource idioms into SAM constructs"),
                )
                .arg(
                    Arg::new("metadata")
                        .long("metadata")
                        .value_parser(value_parser!(PathBuf))
                        .help("CDK metadata: cdk.out directory, manifest.json, or tree.json"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the result here instead of stdout"),
                )
                .arg(
                    Arg::new("plan")
                        .long("plan")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the refactor plan (JSON) here"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Emit JSON instead of YAML"),
                )
                .arg(
                    Arg::new("external-assets")
                        .long("external-assets")
                        .action(ArgAction::SetTrue)
                        .help("Materialize inline code to an asset tree next to the output"),
                )
                .arg(
                    Arg::new("assets-dir")
                        .long("assets-dir")
                        .default_value("src")
                        .help("Relative directory staged assets are placed under"),
                )
                .arg(
                    Arg::new("search-root")
                        .long("search-root")
                        .value_parser(value_parser!(PathBuf))
                        .action(ArgAction::Append)
                        .help("Extra directory searched for local asset paths"),
                )
                .arg(
                    Arg::new("keep-path-metadata")
                        .long("keep-path-metadata")
                        .action(ArgAction::SetTrue)
                        .help("Keep aws:cdk:path entries in resource metadata"),
                )
                .arg(
                    Arg::new("allow-lint-errors")
                        .long("allow-lint-errors")
                        .action(ArgAction::SetTrue)
                        .help("Do not fail the run on lint errors"),
                ),
        );

    let matches = cli.get_matches();
    match matches.subcommand() {
        Some(("process", matches)) => match run_process(matches) {
            Ok(status) => status,
            Err(err) => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
        _ => ExitCode::FAILURE,
    }
}

fn run_process(matches: &clap::ArgMatches) -> anyhow::Result<ExitCode> {
    let input: &PathBuf = matches.get_one("input").expect("required arg");

    let mut options = PipelineOptions::default();
    if matches.get_flag("sam") {
        options.target = TargetFormat::Sam;
    }
    if matches.get_flag("json") {
        options.output = OutputFormat::Json;
    }
    if matches.get_flag("external-assets") {
        options.placement = PlacementPolicy::PreferExternal;
    }
    options.keep_path_metadata = matches.get_flag("keep-path-metadata");
    options.allow_lint_errors = matches.get_flag("allow-lint-errors");
    if let Some(dir) = matches.get_one::<String>("assets-dir") {
        options.assets_dir = Some(dir.clone());
    }

    if let Some(metadata_path) = matches.get_one::<PathBuf>("metadata") {
        options.metadata = Some(MetadataBundle::from_path(metadata_path)?);
        options.asset_search_roots.push(
            if metadata_path.is_dir() {
                metadata_path.clone()
            } else {
                metadata_path
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or_default()
            },
        );
    }
    if let Some(parent) = input.parent() {
        options.asset_search_roots.push(parent.to_path_buf());
    }
    for root in matches.get_many::<PathBuf>("search-root").into_iter().flatten() {
        options.asset_search_roots.push(root.clone());
    }

    let pipeline = Pipeline::new();
    let outcome = pipeline.run(TemplateSource::Path(input.clone()), options)?;

    if let Some(plan_path) = matches.get_one::<PathBuf>("plan") {
        std::fs::write(plan_path, outcome.plan.to_json()?)?;
    }
    match matches.get_one::<PathBuf>("output") {
        Some(output) => outcome.write_to(output)?,
        None => print!("{}", outcome.text),
    }

    for finding in &outcome.lint_findings {
        eprintln!(
            "{:?} {} at {}: {}",
            finding.severity, finding.rule_id, finding.path, finding.message
        );
    }
    Ok(match outcome.status {
        RunStatus::Succeeded => ExitCode::SUCCESS,
        RunStatus::LintErrors => ExitCode::FAILURE,
    })
}
