//! The `pandora` command line: a thin shell over `pandora-store`'s
//! operations. All terminal I/O lives here; the libraries below only
//! return errors and emit tracing events.

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use pandora_archive::pnd;
use pandora_store::ops::{self, InstallOptions};
use pandora_store::{PandoraRoot, PkgId};
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "pandora", version, about = "A single-user, home-directory package manager")]
struct Cli {
    /// A global log level to use when printing logs.
    /// It's also possible to set `RUST_LOG` according to
    /// `tracing_subscriber::filter::EnvFilter`, which will always have
    /// priority.
    #[arg(long, default_value_t = Level::WARN)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the Pandora root directory skeleton
    Init {
        /// Also seed an initial profile with empty bin/ and lib/
        #[arg(long)]
        seed: bool,
    },

    /// Fetch, verify and import a package into the store
    Fetch {
        name: String,
        version: String,

        /// Registry index URL or local path
        #[arg(long)]
        index: String,
    },

    /// Install a package (and its dependency closure) and activate a
    /// profile containing it
    Install {
        /// Package spec, `name@version`
        spec: String,

        /// Registry index URL or local path
        #[arg(long)]
        index: String,

        /// Import into the store but do not build or activate a profile
        #[arg(long)]
        no_activate: bool,

        /// Profile label to activate under
        #[arg(long, default_value = "default")]
        profile: String,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// List store entries and the active profile
    List,

    /// Re-activate the previous profile
    Rollback,

    /// Remove superseded profiles and unreferenced store entries
    Gc {
        /// How many superseded profiles to keep around
        #[arg(long, default_value_t = 3)]
        keep: usize,
    },

    /// Pack files or directories into a .pnd archive
    Pack {
        output: PathBuf,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Unpack a .pnd archive into a directory
    Unpack {
        archive: PathBuf,
        dest: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(cli.log_level.into())
                .from_env_lossy(),
        )
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pandora: {e}");
            ExitCode::FAILURE
        }
    }
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Init { seed } => {
            let root = PandoraRoot::discover()?;
            ops::init(&root, seed)?;
            println!("initialized {}", root.path().display());
        }

        Command::Fetch {
            name,
            version,
            index,
        } => {
            let root = PandoraRoot::discover()?;
            let id = PkgId::new(name, version)?;
            let path = ops::fetch_package(&root, &id, &index)?;
            println!("{}", path.display());
        }

        Command::Install {
            spec,
            index,
            no_activate,
            profile,
            yes,
        } => {
            let root = PandoraRoot::discover()?;
            let id: PkgId = spec.parse()?;

            let mut opts = InstallOptions::new(index);
            opts.profile = profile;
            opts.activate = !no_activate;

            // a --no-activate install never touches the live view and
            // runs without prompting
            if opts.activate && !yes && !confirm(&format!("install and activate {id}?"))? {
                return Err("aborted by user".into());
            }

            let outcome = ops::install(&root, &id, &opts)?;
            for pkg in &outcome.installed {
                println!("installed {pkg}");
            }
            if let Some(profile) = outcome.profile {
                println!("active profile {}", profile.display());
            }
        }

        Command::List => {
            let root = PandoraRoot::discover()?;
            for id in root.list_store()? {
                println!("{id}");
            }
            if let Some(profile) = root.active_profile()? {
                println!("active: {}", profile.display());
            }
        }

        Command::Rollback => {
            let root = PandoraRoot::discover()?;
            let profile = ops::rollback(&root)?;
            println!("active profile {}", profile.display());
        }

        Command::Gc { keep } => {
            let root = PandoraRoot::discover()?;
            let stats = ops::collect_garbage(&root, keep)?;
            println!(
                "removed {} profiles, {} store entries",
                stats.profiles_removed, stats.entries_removed
            );
        }

        Command::Pack { output, inputs } => {
            let mut out = File::create(&output)?;
            pnd::pack(&mut out, &inputs)?;
            println!("{}", output.display());
        }

        Command::Unpack { archive, dest } => {
            fs::create_dir_all(&dest)?;
            let file = File::open(&archive)?;
            let summary = pnd::unpack(&mut BufReader::new(file), &dest)?;
            for path in &summary.manifest {
                println!("{path}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
