//! versiondb - command-line administration for a versioned metadata store.

use std::path::PathBuf;
use std::process::ExitCode;

use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use versiondb::query::CommitQuery;
use versiondb::service::{FindCommitsRequest, Projection, ServiceConfig, VersioningService};
use versiondb::storage::{NewRepository, RepositoryKind, SHA_HEX_LEN};
use versiondb::versioning::{CreateCommitRequest, FixedRootHash, ListCommitsRequest, RepositoryRef};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

struct GlobalArgs {
    database: Option<PathBuf>,
    config: Option<PathBuf>,
    verbose: bool,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Global options come before the command.
    let mut globals = GlobalArgs {
        database: None,
        config: None,
        verbose: false,
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--database" => {
                i += 1;
                globals.database = args.get(i).map(PathBuf::from);
            }
            "-c" | "--config" => {
                i += 1;
                globals.config = args.get(i).map(PathBuf::from);
            }
            "-v" | "--verbose" => globals.verbose = true,
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("versiondb v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
            _ => break,
        }
        i += 1;
    }

    init_tracing(globals.verbose);

    let Some(command) = args.get(i) else {
        print_help();
        return ExitCode::FAILURE;
    };
    let rest = &args[i + 1..];

    match run(&globals, command, rest) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_help() {
    println!("versiondb - a versioned metadata store");
    println!();
    println!("Usage: versiondb [OPTIONS] COMMAND [ARGS]");
    println!();
    println!("Options:");
    println!("  -d, --database PATH    Path to the database file (default: versiondb.sqlite)");
    println!("  -c, --config FILE      JSON configuration file");
    println!("  -v, --verbose          Debug logging (otherwise RUST_LOG, default warn)");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Commands:");
    println!("  init                                        Create the database");
    println!("  repo-create WS NAME [--dataset] [--initial MESSAGE]");
    println!("  commit WS/NAME -m MESSAGE --root HASH [-a AUTHOR] [-p PARENT]...");
    println!("  log WS/NAME SHA|BRANCH                      Ancestry, newest first");
    println!("  list WS/NAME [--page N --limit N] [--asc]   Commits by update time");
    println!("  branch WS/NAME [NAME SHA]                   List or set branches");
    println!("  find [--workspace WS] [--query JSON] [--ids]");
    println!("  delete WS/NAME SHA... [--dataset-version]");
}

fn load_config(globals: &GlobalArgs) -> CliResult<ServiceConfig> {
    let mut config = match &globals.config {
        Some(path) => ServiceConfig::from_json_file(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(path) = &globals.database {
        config.path = path.clone();
    }
    Ok(config)
}

fn repository_arg(raw: Option<&String>) -> CliResult<RepositoryRef> {
    let raw = raw.ok_or("missing repository (WS/NAME)")?;
    match raw.split_once('/') {
        Some((workspace, name)) if !name.is_empty() => Ok(RepositoryRef::name(workspace, name)),
        _ => Err(format!("repository must be WS/NAME, got '{}'", raw).into()),
    }
}

fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a String> {
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1))
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(globals: &GlobalArgs, command: &str, args: &[String]) -> CliResult<()> {
    let config = load_config(globals)?;
    let service = VersioningService::open(config)?;

    match command {
        "init" => {
            println!("initialized {}", service.config().path.display());
        }
        "repo-create" => {
            let workspace = args.first().ok_or("missing workspace")?;
            let name = args.get(1).ok_or("missing repository name")?;
            let kind = if args.iter().any(|a| a == "--dataset") {
                RepositoryKind::Dataset
            } else {
                RepositoryKind::Regular
            };
            let new = NewRepository::new(workspace.as_str(), name.as_str()).kind(kind);
            match flag_value(args, &["--initial"]) {
                Some(message) => {
                    let request = CreateCommitRequest::new(message.as_str(), whoami());
                    let (repo, commit) = service.create_repository_with_initial_commit(
                        &new,
                        &request,
                        &FixedRootHash::new("empty")?,
                    )?;
                    print_json(&repo)?;
                    print_json(&commit)?;
                }
                None => print_json(&service.create_repository(&new)?)?,
            }
        }
        "commit" => {
            let repo = repository_arg(args.first())?;
            let message = flag_value(args, &["-m", "--message"]).ok_or("missing -m MESSAGE")?;
            let root = flag_value(args, &["--root"]).ok_or("missing --root HASH")?;
            let author = flag_value(args, &["-a", "--author"]).cloned().unwrap_or_else(whoami);
            let parents: Vec<&String> = args
                .iter()
                .enumerate()
                .filter(|(_, a)| a.as_str() == "-p" || a.as_str() == "--parent")
                .filter_map(|(i, _)| args.get(i + 1))
                .collect();
            let request = CreateCommitRequest::new(message.as_str(), author).parents(parents);
            let commit = service.create_commit(&repo, &request, &FixedRootHash::new(root.as_str())?, None)?;
            print_json(&commit)?;
        }
        "log" => {
            let repo = repository_arg(args.first())?;
            let target = args.get(1).ok_or("missing SHA or BRANCH")?;
            let sha = if target.len() == SHA_HEX_LEN && target.chars().all(|c| c.is_ascii_hexdigit()) {
                target.clone()
            } else {
                service.get_branch(&repo, target)?.sha.to_string()
            };
            for commit in service.commit_log(&repo, &sha)? {
                println!("{}  {}  {}", commit.sha.short(), commit.author, commit.summary());
            }
        }
        "list" => {
            let repo = repository_arg(args.first())?;
            let request = ListCommitsRequest {
                ascending: args.iter().any(|a| a == "--asc"),
                page_number: flag_value(args, &["--page"]).map(|v| v.parse()).transpose()?.unwrap_or(0),
                page_limit: flag_value(args, &["--limit"]).map(|v| v.parse()).transpose()?.unwrap_or(0),
                ..ListCommitsRequest::default()
            };
            print_json(&service.list_commits(&repo, &request)?)?;
        }
        "branch" => {
            let repo = repository_arg(args.first())?;
            match (args.get(1), args.get(2)) {
                (Some(name), Some(sha)) => print_json(&service.set_branch(&repo, name, sha)?)?,
                (None, _) => print_json(&service.list_branches(&repo)?)?,
                (Some(_), None) => return Err("branch needs both NAME and SHA".into()),
            }
        }
        "find" => {
            let query: CommitQuery = match flag_value(args, &["--query"]) {
                Some(raw) => serde_json::from_str(raw)?,
                None => CommitQuery::default(),
            };
            let projection = if args.iter().any(|a| a == "--ids") {
                Projection::IdsOnly
            } else {
                Projection::Full
            };
            let request = FindCommitsRequest {
                query,
                workspace: flag_value(args, &["--workspace"]).cloned(),
                projection,
            };
            print_json(&service.find_commits(&request)?)?;
        }
        "delete" => {
            let repo = repository_arg(args.first())?;
            let shas: Vec<String> = args[1..].iter().filter(|a| !a.starts_with("--")).cloned().collect();
            if shas.is_empty() {
                return Err("nothing to delete".into());
            }
            if args.iter().any(|a| a == "--dataset-version") {
                for outcome in service.delete_dataset_versions(Some(&repo), &shas)? {
                    println!("{:?}", outcome);
                }
            } else {
                service.delete_commits(&repo, &shas)?;
                println!("deleted {} commit(s)", shas.len());
            }
        }
        other => return Err(format!("unknown command '{}'", other).into()),
    }
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}
