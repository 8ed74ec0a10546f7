#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};

use basepair_parity::generator::GeneratorSettings;
use basepair_parity::orchestrator::{
    DEFAULT_LEGACY_ROOT, DEFAULT_MODERN_ROOT, OutputMode, ValidationConfig, observer_for,
    run_validation,
};
use basepair_parity::record_keys::IndexBase;
use basepair_parity::stage_registry::resolve_selection;
use basepair_parity::stage_runner::silence_panic_output;
use basepair_parity::tolerances::ToleranceSet;
use basepair_parity::worklist::WorklistSource;

const DEFAULT_STRUCTURE_DIR: &str = "data/pdb";

#[derive(Debug)]
struct CliArgs {
    config: ValidationConfig,
    print_help: bool,
}

fn main() {
    match run() {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.print_help {
        return Ok(0);
    }
    if args.config.output_mode == OutputMode::Quiet {
        silence_panic_output();
    }
    let stdout = io::stdout();
    let mut observer = observer_for(args.config.output_mode, stdout.lock());
    let run = run_validation(&args.config, observer.as_mut())?;
    Ok(run.exit_code())
}

fn value_for<I>(iter: &mut I, flag: &str) -> Result<String>
where
    I: Iterator<Item = String>,
{
    iter.next()
        .ok_or_else(|| anyhow!("missing value for {flag}"))
}

fn number_for<I>(iter: &mut I, flag: &str) -> Result<u64>
where
    I: Iterator<Item = String>,
{
    let raw = value_for(iter, flag)?;
    raw.parse::<u64>()
        .with_context(|| format!("invalid value `{raw}` for {flag}"))
}

fn index_base_for<I>(iter: &mut I, flag: &str) -> Result<IndexBase>
where
    I: Iterator<Item = String>,
{
    let raw = value_for(iter, flag)?;
    IndexBase::parse(&raw).ok_or_else(|| anyhow!("{flag} must be 0 or 1, got `{raw}`"))
}

fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut config = ValidationConfig::with_defaults();
    let mut stage_tokens = Vec::<String>::new();
    let mut explicit_ids = Vec::<String>::new();
    let mut list_file = None::<PathBuf>;
    let mut quiet = false;
    let mut verbose = false;
    let mut tolerances_path = None::<PathBuf>;
    let mut regenerate = false;
    let mut structure_dir = PathBuf::from(DEFAULT_STRUCTURE_DIR);
    let mut modern_exe = None::<PathBuf>;
    let mut legacy_exe = None::<PathBuf>;
    let mut print_help_flag = false;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--legacy-root" => config.legacy_root = PathBuf::from(value_for(&mut iter, &arg)?),
            "--modern-root" => config.modern_root = PathBuf::from(value_for(&mut iter, &arg)?),
            "--pdb" => {
                let value = value_for(&mut iter, &arg)?;
                explicit_ids.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(ToString::to_string),
                );
            }
            "--pdb-list" => list_file = Some(PathBuf::from(value_for(&mut iter, &arg)?)),
            "--max" => config.limits.max = Some(usize::try_from(number_for(&mut iter, &arg)?)?),
            "--test-set" => {
                config.limits.test_set = Some(usize::try_from(number_for(&mut iter, &arg)?)?);
            }
            "--seed" => config.limits.seed = number_for(&mut iter, &arg)?,
            "--workers" => config.workers = usize::try_from(number_for(&mut iter, &arg)?)?,
            "-q" | "--quiet" => quiet = true,
            "-v" | "--verbose" => verbose = true,
            "--stop-on-first" => config.stop_on_first_failure = true,
            "--skip-dependents" => config.skip_dependents = true,
            "--report" => config.report_path = Some(PathBuf::from(value_for(&mut iter, &arg)?)),
            "--checkpoint" => {
                config.checkpoint_path = Some(PathBuf::from(value_for(&mut iter, &arg)?));
            }
            "--resume" => config.resume = true,
            "--tolerances" => tolerances_path = Some(PathBuf::from(value_for(&mut iter, &arg)?)),
            "--legacy-index-base" => {
                config.compare.conventions.legacy = index_base_for(&mut iter, &arg)?;
            }
            "--modern-index-base" => {
                config.compare.conventions.modern = index_base_for(&mut iter, &arg)?;
            }
            "--log-jsonl" => {
                config.log_jsonl_path = Some(PathBuf::from(value_for(&mut iter, &arg)?));
            }
            "--summary-json" => {
                config.summary_json_path = Some(PathBuf::from(value_for(&mut iter, &arg)?));
            }
            "--regenerate" => regenerate = true,
            "--pdb-dir" => structure_dir = PathBuf::from(value_for(&mut iter, &arg)?),
            "--modern-exe" => modern_exe = Some(PathBuf::from(value_for(&mut iter, &arg)?)),
            "--legacy-exe" => legacy_exe = Some(PathBuf::from(value_for(&mut iter, &arg)?)),
            "--help" | "-h" => {
                print_help();
                print_help_flag = true;
            }
            other if other.starts_with('-') && other.parse::<i64>().is_err() => {
                bail!("unknown argument `{other}`");
            }
            _ => stage_tokens.push(arg.clone()),
        }
    }

    if quiet && verbose {
        bail!("--quiet and --verbose are mutually exclusive");
    }
    config.output_mode = if quiet {
        OutputMode::Quiet
    } else if verbose {
        OutputMode::Verbose
    } else {
        OutputMode::Summary
    };

    if !stage_tokens.is_empty() {
        config.stages = resolve_selection(&stage_tokens)?;
    }
    config.worklist = match (explicit_ids.is_empty(), list_file) {
        (false, Some(_)) => bail!("--pdb and --pdb-list are mutually exclusive"),
        (false, None) => WorklistSource::Explicit { ids: explicit_ids },
        (true, Some(path)) => WorklistSource::ListFile { path },
        (true, None) => WorklistSource::Discover,
    };
    if let Some(path) = tolerances_path {
        config.compare.tolerances = ToleranceSet::load_overrides(&path)?;
    }
    if regenerate {
        let (Some(modern_exe), Some(legacy_exe)) = (modern_exe, legacy_exe) else {
            bail!("--regenerate requires --modern-exe and --legacy-exe");
        };
        config.generator = Some(GeneratorSettings::new(structure_dir, modern_exe, legacy_exe));
    }

    Ok(CliArgs {
        config,
        print_help: print_help_flag,
    })
}

fn print_help() {
    println!("basepair_parity_runner [STAGES...] [options]");
    println!("  STAGES: 1-12, stage names, or groups (atoms, frames, pairs, hbonds, steps, all)");
    println!("  --legacy-root <dir>         default: {DEFAULT_LEGACY_ROOT}");
    println!("  --modern-root <dir>         default: {DEFAULT_MODERN_ROOT}");
    println!("  --pdb <id[,id...]>          explicit structure ids");
    println!("  --pdb-list <file>           one structure id per line");
    println!("  --max <n>");
    println!("  --test-set <n> [--seed <s>] seeded sample of discovered ids");
    println!("  --workers <n>");
    println!("  -q, --quiet | -v, --verbose");
    println!("  --stop-on-first");
    println!("  --skip-dependents");
    println!("  --report <path>             differences report JSON");
    println!("  --checkpoint <path> [--resume]");
    println!("  --tolerances <path>         JSON tolerance overrides");
    println!("  --legacy-index-base <0|1>");
    println!("  --modern-index-base <0|1>");
    println!("  --log-jsonl <path>");
    println!("  --summary-json <path>");
    println!("  --regenerate --modern-exe <path> --legacy-exe <path> [--pdb-dir <dir>]");
    println!("  default structure dir: {DEFAULT_STRUCTURE_DIR}");
}

#[cfg(test)]
mod tests {
    use basepair_parity::stage_registry::StageId;

    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs> {
        parse_args(args.iter().map(ToString::to_string))
    }

    #[test]
    fn positional_tokens_select_stages() {
        let args = parse(&["frames", "10", "--pdb", "1EHZ,1H4S"]).expect("parse");
        assert_eq!(
            args.config.stages,
            vec![
                StageId::BaseFrameCalc,
                StageId::LsFitting,
                StageId::FrameCalc,
                StageId::FindBestpairSelection
            ]
        );
        assert_eq!(
            args.config.worklist,
            WorklistSource::Explicit {
                ids: vec!["1EHZ".to_string(), "1H4S".to_string()]
            }
        );
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        assert!(parse(&["-q", "-v"]).is_err());
        assert!(parse(&["--pdb", "1EHZ", "--pdb-list", "ids.txt"]).is_err());
        assert!(parse(&["--regenerate"]).is_err());
        assert!(parse(&["--legacy-index-base", "2"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["nonsense-stage"]).is_err());
    }
}
