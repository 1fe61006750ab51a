//! accounts-audit: audit the accounts an administrator can access.
//!
//! Usage:
//!   accounts-audit audit -e prod -u admin@place.org
//!   accounts-audit audit -e prod -u admin@place.org -r ./audit_..._prod_....txt
//!   accounts-audit audit-report -r ./audit_..._prod_....txt --uploads

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use accounts_audit_lib::commands::{prepare_audit_report, run_audit, AuditRequest};
use accounts_audit_lib::config::{load_config, Environment};
use accounts_audit_lib::directory::{AccountDirectory, Session};
use accounts_audit_lib::error::{AuditError, AuditResult};

#[derive(Parser)]
#[command(name = "accounts-audit")]
#[command(version)]
#[command(about = "Audit the accounts an administrator can access")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file (defaults to ~/.accounts-audit/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an audit, or re-run one from an existing raw audit
    #[command(visible_alias = "a")]
    Audit {
        /// Environment to run against: local, devel, staging or prod
        #[arg(short, long)]
        env: String,

        /// Administrator username
        #[arg(short, long)]
        username: String,

        /// Existing raw audit to re-run
        #[arg(short = 'r', long = "reportpath")]
        report_path: Option<PathBuf>,
    },

    /// Build a summary report from a raw audit
    #[command(name = "audit-report", visible_alias = "ar")]
    AuditReport {
        /// Raw audit to report on
        #[arg(short = 'r', long = "reportpath")]
        report_path: PathBuf,

        /// Only include accounts with a recorded upload
        #[arg(short, long)]
        uploads: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("accounts_audit=info,accounts_audit_lib=info"),
    )
    .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Audit {
            env,
            username,
            report_path,
        } => cmd_audit(cli.config, &env, &username, report_path).await,
        Commands::AuditReport {
            report_path,
            uploads,
        } => cmd_audit_report(&report_path, uploads),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("{}", e.recovery_suggestion());
            ExitCode::FAILURE
        }
    }
}

async fn cmd_audit(
    config_path: Option<PathBuf>,
    env: &str,
    username: &str,
    report_path: Option<PathBuf>,
) -> AuditResult<()> {
    let env: Environment = env.parse()?;
    let config = load_config(config_path.as_deref())?;
    if username.trim().is_empty() {
        return Err(AuditError::Configuration(
            "an administrator username is required".to_string(),
        ));
    }

    let mut session = Session::from_config(&config, env)?;
    let password = read_password(username)?;
    let identity = session.authenticate(username, &password).await?;
    drop(password);

    let directory: Arc<dyn AccountDirectory> = Arc::new(session);
    let request = AuditRequest {
        env,
        resume_from: report_path,
    };
    let report = run_audit(directory, identity, &config, &request).await?;

    for failed in &report.failed_blocks {
        eprintln!("warning: {}", failed);
    }
    for path in &report.written {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_audit_report(report_path: &std::path::Path, uploads_only: bool) -> AuditResult<()> {
    let summary = prepare_audit_report(report_path, uploads_only)?;
    println!("{}", summary.path.display());
    Ok(())
}

/// Prompt without echo on a terminal; read the first stdin line otherwise.
fn read_password(username: &str) -> AuditResult<String> {
    let password = if io::stdin().is_terminal() {
        rpassword::prompt_password(format!("{} password: ", username))
            .map_err(|e| AuditError::Authentication(format!("could not read password: {}", e)))?
    } else {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| AuditError::Authentication(format!("could not read password: {}", e)))?;
        input.lines().next().unwrap_or_default().to_string()
    };
    if password.is_empty() {
        return Err(AuditError::Authentication("password must not be empty".to_string()));
    }
    Ok(password)
}
