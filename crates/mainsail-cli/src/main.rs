use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use mainsail_core::config::{
    ConfigRecord, ConfigStore, FolderLayout, GitVisibility, MathRendering, ReconcileReport,
    RetryPolicy, SecretMove,
};
use mainsail_core::mirror::{self, DirectoryMirror, ProfileMirror};
use mainsail_core::paths::AppPaths;
use mainsail_core::profile::Profile;
use mainsail_core::review::{self, PendingFile};
use mainsail_core::secret::{SecretError, SecretLocator, SystemBackends};
use mainsail_core::signing;
use mainsail_core::trust::{Assessment, ReviewChoice, TrustVerifier, Verdict};
use mainsail_core::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mainsail")]
#[command(about = "Sign files and authenticate signed bundles", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a signing key and store it at the configured location
    InitKey,

    /// Print the public key to register with the profile mirrors
    PublicKey,

    /// Sign a file into a .edbdl bundle
    Sign {
        file: PathBuf,
        /// Write the bundle here instead of next to the file
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Check a bundle's signature (no profile lookup)
    Verify { bundle: PathBuf },

    /// Review every bundle in the to-check folder
    Review {
        /// Carry out automatic verdicts (quarantine / authenticate)
        #[arg(long)]
        apply: bool,
        /// Use local profile directories instead of the HTTP mirrors
        #[arg(long = "mirror-dir")]
        mirror_dirs: Vec<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Act on a bundle that needs a decision
    Decide {
        bundle: PathBuf,
        /// quarantine, authenticate, authenticate-and-trust,
        /// authenticate-and-update-trust or authenticate-and-remove-trust
        choice: ReviewChoice,
        #[arg(long = "mirror-dir")]
        mirror_dirs: Vec<PathBuf>,
    },

    /// List trusted signers
    Trusted,

    /// Remove a signer from the trust store
    Revoke { public_key: String },

    #[command(subcommand)]
    Config(ConfigCommands),

    /// Converge the primary and backup configuration
    Reconcile,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the active configuration
    Show,

    /// Change the primary configuration; keys and folders follow
    Set {
        /// Desktop, Documents or project_home
        #[arg(long)]
        folders_location: Option<String>,
        /// MathJax3 or KaTeX
        #[arg(long)]
        math_rendering: Option<String>,
        /// Hidden or Visible
        #[arg(long)]
        git_extensions: Option<String>,
        /// Keychain, Locker or Filesystem
        #[arg(long)]
        key_management_strategy: Option<String>,
        #[arg(long)]
        keychain_name: Option<String>,
        #[arg(long)]
        key_dir: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Asks on the terminal before retrying an unavailable store. Never asks
/// when stdin is not a terminal.
fn prompt_retry() -> RetryPolicy {
    Arc::new(|err: &SecretError| {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return false;
        }
        eprint!("{err}\nConnect the drive or unlock the store, then retry? [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    })
}

fn print_load_warnings(report: &ReconcileReport) {
    for (preserved, reason) in report.load.replaced() {
        eprintln!(
            "warning: configuration was {reason}; replaced with defaults, original kept at {}",
            preserved.display()
        );
    }
}

fn opened(store: ConfigStore, report: ReconcileReport) -> Arc<ConfigStore> {
    tracing::debug!(
        secret_move = ?report.secret_move,
        folders_moved = report.folders_moved,
        backup_written = report.backup_written,
        "configuration reconciled"
    );
    print_load_warnings(&report);
    if report.secret_move == SecretMove::Deferred {
        eprintln!(
            "warning: the signing key was not moved to {}; run `mainsail reconcile` once the old location is reachable",
            store.secret_location()
        );
    }
    Arc::new(store)
}

fn open_store() -> Result<Arc<ConfigStore>> {
    let paths = AppPaths::from_env()?;
    let (store, report) =
        ConfigStore::open_with_retry(paths, Arc::new(SystemBackends), prompt_retry())
            .context("opening configuration")?;
    Ok(opened(store, report))
}

/// For review and decide: never prompts, and an unreachable secret store
/// only postpones the key move.
fn open_review_store() -> Result<Arc<ConfigStore>> {
    let paths = AppPaths::from_env()?;
    let (store, report) = ConfigStore::open_for_review(paths, Arc::new(SystemBackends))
        .context("opening configuration")?;
    Ok(opened(store, report))
}

fn mirrors_for(dirs: &[PathBuf]) -> Result<Vec<Arc<dyn ProfileMirror>>> {
    if dirs.is_empty() {
        let urls = mirror::mirror_urls_from_env();
        return mirror::http_mirrors(&urls).map_err(|e| anyhow!("building mirrors: {e}"));
    }
    Ok(dirs
        .iter()
        .map(|d| Arc::new(DirectoryMirror::new(d)) as Arc<dyn ProfileMirror>)
        .collect())
}

fn verifier(store: &Arc<ConfigStore>, mirror_dirs: &[PathBuf]) -> Result<TrustVerifier> {
    Ok(TrustVerifier::new(
        Arc::clone(store),
        mirrors_for(mirror_dirs)?,
        mirror::mirror_timeout_from_env(),
    ))
}

fn parse_setting<T: DeserializeOwned>(name: &str, value: &str) -> Result<T> {
    toml::Value::String(value.to_string())
        .try_into()
        .map_err(|_| anyhow!("'{value}' is not a valid value for {name}"))
}

fn describe_profile(profile: &Profile) -> String {
    let mut out = profile.name().unwrap_or("(no name)").to_string();
    let details: Vec<&str> = [profile.affiliation(), profile.location()]
        .into_iter()
        .flatten()
        .collect();
    if !details.is_empty() {
        out.push_str(&format!(" ({})", details.join(", ")));
    }
    if let Some(date) = profile.last_verification_date() {
        out.push_str(&format!(", verified {}", date.format("%Y-%m-%d")));
    }
    out
}

fn describe_verdict(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Quarantine(reason) => format!("quarantine: {}", reason.advisory()),
        Verdict::Authenticated => "authenticated".to_string(),
        Verdict::Pending(_) => "needs a decision".to_string(),
    }
}

fn print_assessment(path: &Path, assessment: &Assessment) {
    println!("{}", path.display());
    println!("  public key: {}", assessment.public_key);
    if let Some(profile) = &assessment.profile {
        println!("  signer:     {}", describe_profile(profile));
    }
    let c = &assessment.checks;
    println!(
        "  checks:     verified={} found={} agreement={} active={} trusted={} changed={}",
        c.verified, c.found, c.agreement, c.active, c.in_trusted, c.changed
    );
    println!("  verdict:    {}", describe_verdict(&assessment.verdict));
    if assessment.verdict.automatic_choice().is_none() {
        for choice in assessment.verdict.allowed_choices() {
            println!(
                "    mainsail decide {} {:<30} # {}",
                path.display(),
                choice.as_str(),
                choice.label()
            );
        }
    }
}

#[derive(Serialize)]
struct ReviewRow {
    bundle: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    assessment: Option<Assessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<review::Applied>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn review_command(apply: bool, mirror_dirs: Vec<PathBuf>, json: bool) -> Result<ExitCode> {
    let store = open_review_store()?;
    let verifier = verifier(&store, &mirror_dirs)?;
    let to_check = store.signing_folders().to_check;
    let mut rows = Vec::new();

    for path in review::pending_bundles(&to_check)? {
        let pending = match PendingFile::open(&path) {
            Ok(p) => p,
            Err(e) => {
                if !json {
                    eprintln!("{}: {e}", path.display());
                }
                rows.push(ReviewRow {
                    bundle: path,
                    assessment: None,
                    applied: None,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };
        let assessment = verifier.review(&pending.bundle).await?;
        if !json {
            print_assessment(&path, &assessment);
        }
        let applied = match assessment.verdict.automatic_choice() {
            Some(choice) if apply => {
                let done = review::apply(&verifier, &pending, &assessment, choice)?;
                if !json {
                    println!("  moved to:   {}", done.destination.display());
                }
                Some(done)
            }
            _ => None,
        };
        rows.push(ReviewRow {
            bundle: path,
            assessment: Some(assessment),
            applied,
            error: None,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("nothing to review in {}", to_check.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn decide_command(
    bundle: PathBuf,
    choice: ReviewChoice,
    mirror_dirs: Vec<PathBuf>,
) -> Result<ExitCode> {
    let store = open_review_store()?;
    let verifier = verifier(&store, &mirror_dirs)?;
    let pending = PendingFile::open(&bundle)?;
    let assessment = verifier.review(&pending.bundle).await?;
    match review::apply(&verifier, &pending, &assessment, choice) {
        Ok(done) => {
            println!("{} -> {}", bundle.display(), done.destination.display());
            if done.trust_changed {
                println!("trust store updated");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(Error::ChoiceNotAllowed(_)) => {
            let allowed: Vec<&str> = assessment
                .verdict
                .allowed_choices()
                .iter()
                .map(|c| c.as_str())
                .collect();
            bail!(
                "{choice} is not available ({}); choose one of: {}",
                describe_verdict(&assessment.verdict),
                allowed.join(", ")
            )
        }
        Err(e) => Err(e.into()),
    }
}

fn config_set(
    store: &ConfigStore,
    folders_location: Option<String>,
    math_rendering: Option<String>,
    git_extensions: Option<String>,
    key_management_strategy: Option<String>,
    keychain_name: Option<String>,
    key_dir: Option<PathBuf>,
) -> Result<ReconcileReport> {
    let mut record: ConfigRecord = store.primary();
    if let Some(v) = folders_location {
        record.folders_location = parse_setting::<FolderLayout>("folders_location", &v)?;
    }
    if let Some(v) = math_rendering {
        record.math_rendering = parse_setting::<MathRendering>("math_rendering", &v)?;
    }
    if let Some(v) = git_extensions {
        record.git_extensions = parse_setting::<GitVisibility>("git_extensions", &v)?;
    }
    match key_management_strategy.as_deref() {
        None => {
            if keychain_name.is_some() || key_dir.is_some() {
                bail!("--keychain-name and --key-dir need --key-management-strategy");
            }
        }
        Some("Keychain") => {
            record.secret = SecretLocator::Keychain {
                name: keychain_name.unwrap_or_else(|| "login".to_string()),
            }
        }
        Some("Locker") => record.secret = SecretLocator::CredentialLocker,
        Some("Filesystem") => {
            let dir = key_dir.ok_or_else(|| anyhow!("Filesystem needs --key-dir"))?;
            record.secret = SecretLocator::Filesystem { dir };
        }
        Some(other) => bail!("'{other}' is not a valid value for key_management_strategy"),
    }
    Ok(store.update_primary(record)?)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::InitKey => {
            let store = open_store()?;
            match signing::generate_and_save_key(&store) {
                Ok(key) => {
                    println!("key stored in {}", store.secret_location());
                    println!("public key: {}", key.public_key_text());
                }
                Err(Error::AlreadyExists) => bail!(
                    "a key already exists in {}; remove it first if you really want a new one",
                    store.secret_location()
                ),
                Err(e) => return Err(e.into()),
            }
        }

        Commands::PublicKey => {
            let store = open_store()?;
            let key = signing::load_key(&store).context("loading signing key")?;
            println!("{}", key.public_key_text());
        }

        Commands::Sign { file, out_dir } => {
            let store = open_store()?;
            let key = signing::load_key(&store).context("loading signing key")?;
            let path = key.write_bundle(&file, out_dir.as_deref())?;
            println!("{}", path.display());
        }

        Commands::Verify { bundle } => {
            if signing::verify_file(&bundle)? {
                println!("signature verified: {}", bundle.display());
            } else {
                println!("signature does NOT match: {}", bundle.display());
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Review {
            apply,
            mirror_dirs,
            json,
        } => return review_command(apply, mirror_dirs, json).await,

        Commands::Decide {
            bundle,
            choice,
            mirror_dirs,
        } => return decide_command(bundle, choice, mirror_dirs).await,

        Commands::Trusted => {
            let store = open_store()?;
            let trusted = store.trusted()?;
            if trusted.is_empty() {
                println!("no trusted signers");
            }
            for (public_key, profile) in &trusted {
                println!("{public_key}  {}", describe_profile(profile));
            }
        }

        Commands::Revoke { public_key } => {
            let store = open_store()?;
            if store.revoke_trust(&public_key)? {
                println!("removed {public_key}");
            } else {
                bail!("{public_key} is not a trusted signer");
            }
        }

        Commands::Config(ConfigCommands::Show) => {
            let store = open_store()?;
            let folders = store.signing_folders();
            print!("{}", store.primary().to_toml()?);
            println!();
            println!("# config:  {}", store.paths().primary_config().display());
            println!("# folders: {}", folders.to_sign.display());
            println!("#          {}", folders.to_check.display());
        }

        Commands::Config(ConfigCommands::Set {
            folders_location,
            math_rendering,
            git_extensions,
            key_management_strategy,
            keychain_name,
            key_dir,
        }) => {
            let store = open_store()?;
            let report = config_set(
                &store,
                folders_location,
                math_rendering,
                git_extensions,
                key_management_strategy,
                keychain_name,
                key_dir,
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Reconcile => {
            let store = open_store()?;
            let report = store.reconcile()?;
            print_load_warnings(&report);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
