use anyhow::Result;
use clap::Parser;
use modman::commands::{self, Config, InfoField, InstallOptions};
use modman::error::exit_code;
use modman::resolver::MajorFallback;
use modman::runtime::RealRuntime;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// modman - workspace module manager
///
/// Installs versioned modules and their dependencies into a workspace and
/// answers queries about what is installed.
///
/// Examples:
///   modman init
///   modman install nos.sys.vulkan 5.3
///   modman info nos.sys.vulkan 5.3 public_include_folder
///   modman remote add https://mirror.example.org/index.json
#[derive(Parser, Debug)]
#[command(author, version = env!("MODMAN_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace directory; the root is found by walking up from here
    #[arg(
        long = "workspace",
        short = 'w',
        env = "MODMAN_WORKSPACE",
        value_name = "PATH",
        default_value = ".",
        global = true
    )]
    workspace: PathBuf,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Create an empty workspace
    Init(InitArgs),

    /// Install a module and its dependencies
    Install(InstallArgs),

    /// Print information about an installed module
    Info(InfoArgs),

    /// Rebuild the workspace index from the install tree
    Rescan(RescanArgs),

    /// Update modman itself to the latest published release
    Update(UpdateArgs),

    /// List installed modules
    List(ListArgs),

    /// Uninstall one version of a module
    Remove(RemoveArgs),

    /// Manage the catalog remotes of this workspace
    Remote(RemoteArgs),

    /// Remove the workspace state, keeping installed module directories
    Deinit,
}

#[derive(clap::Args, Debug)]
struct InitArgs {
    /// Catalog URL to remember for this workspace
    #[arg(long = "catalog-url", env = "MODMAN_CATALOG_URL", value_name = "URL")]
    catalog_url: Option<String>,

    /// Default number of parallel downloads for this workspace
    #[arg(long = "jobs", short = 'j', value_name = "N")]
    jobs: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Module name, e.g. nos.sys.vulkan
    name: String,

    /// Exact version (1.2.3) or relaxed request (1.2)
    #[arg(value_name = "VERSION")]
    spec: String,

    /// Number of parallel downloads
    #[arg(long = "jobs", short = 'j', env = "MODMAN_JOBS", value_name = "N")]
    jobs: Option<usize>,

    /// Substitute the nearest available major version when the requested one does not exist
    #[arg(long = "allow-major-fallback")]
    allow_major_fallback: bool,

    /// Catalog URL for this request
    #[arg(long = "catalog-url", env = "MODMAN_CATALOG_URL", value_name = "URL")]
    catalog_url: Option<String>,
}

#[derive(clap::Args, Debug)]
struct InfoArgs {
    name: String,

    #[arg(value_name = "VERSION")]
    spec: String,

    /// Single field to print
    #[arg(value_enum)]
    field: Option<InfoField>,

    /// Print the whole record as JSON
    #[arg(long = "record", conflicts_with = "field")]
    record: bool,
}

#[derive(clap::Args, Debug)]
struct RescanArgs {
    /// Refresh the cached catalog before rescanning
    #[arg(long = "fetch-index")]
    fetch_index: bool,

    #[arg(long = "catalog-url", env = "MODMAN_CATALOG_URL", value_name = "URL")]
    catalog_url: Option<String>,
}

#[derive(clap::Args, Debug)]
struct UpdateArgs {
    /// Release channel URL
    #[arg(long = "update-url", env = "MODMAN_UPDATE_URL", value_name = "URL")]
    update_url: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ListArgs {
    /// Glob over module names, e.g. 'nos.sys.*'
    pattern: Option<String>,
}

#[derive(clap::Args, Debug)]
struct RemoveArgs {
    name: String,

    /// Exact version to remove
    version: String,
}

#[derive(clap::Args, Debug)]
struct RemoteArgs {
    #[command(subcommand)]
    command: RemoteCommand,
}

#[derive(clap::Subcommand, Debug)]
enum RemoteCommand {
    /// Add a catalog remote; earlier remotes win on duplicate releases
    Add {
        url: String,

        /// Name for the remote, defaults to the URL's host
        #[arg(long = "name")]
        name: Option<String>,
    },

    /// List the catalog remotes in priority order
    List,

    /// Remove a catalog remote by name or URL
    Remove { remote: String },
}

impl Commands {
    fn catalog_url(&self) -> Option<String> {
        match self {
            Commands::Init(args) => args.catalog_url.clone(),
            Commands::Install(args) => args.catalog_url.clone(),
            Commands::Rescan(args) => args.catalog_url.clone(),
            _ => None,
        }
    }

    fn update_url(&self) -> Option<String> {
        match self {
            Commands::Update(args) => args.update_url.clone(),
            _ => None,
        }
    }
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let runtime = RealRuntime;
    let config = Config::new(
        &runtime,
        cli.workspace,
        cli.command.catalog_url(),
        cli.command.update_url(),
    )?;

    match cli.command {
        Commands::Init(args) => {
            commands::init(runtime, &config, args.jobs)?;
        }
        Commands::Install(args) => {
            let options = InstallOptions {
                jobs: args.jobs,
                fallback: if args.allow_major_fallback {
                    MajorFallback::WarnAndSubstitute
                } else {
                    MajorFallback::Deny
                },
            };
            commands::install(runtime, &config, &args.name, &args.spec, options, cancel).await?;
        }
        Commands::Info(args) => {
            let field = if args.record { None } else { args.field };
            let output = commands::info(runtime, &config, &args.name, &args.spec, field)?;
            println!("{}", output);
        }
        Commands::Rescan(args) => {
            commands::rescan(runtime, &config, args.fetch_index, cancel).await?;
        }
        Commands::Update(_) => {
            commands::update(runtime, &config, cancel).await?;
        }
        Commands::List(args) => {
            commands::list(runtime, &config, args.pattern.as_deref())?;
        }
        Commands::Remove(args) => {
            commands::remove(runtime, &config, &args.name, &args.version)?;
        }
        Commands::Remote(args) => match args.command {
            RemoteCommand::Add { url, name } => {
                commands::remote_add(runtime, &config, &url, name.as_deref())?;
            }
            RemoteCommand::List => {
                commands::remote_list(runtime, &config)?;
            }
            RemoteCommand::Remove { remote } => {
                commands::remote_remove(runtime, &config, &remote)?;
            }
        },
        Commands::Deinit => {
            commands::deinit(runtime, &config)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.verbose)),
    )
    .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            for cause in err.chain().skip(1) {
                eprintln!("Caused by: {}", cause);
            }
            ExitCode::from(exit_code(&err))
        }
    }
}
