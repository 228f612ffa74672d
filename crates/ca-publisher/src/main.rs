use ca_publish_proto::encoding::decode_pem_or_der;
use ca_publish_proto::{Artifact, CertificateArtifact, CertificatePairArtifact, CrlArtifact};
use ca_publisher::{
    AuditLogger, CallContext, Config, ConfigStore, JsonConfigStore, MemoryConfigStore,
    PublishReport, PublishSweep, Selection, TargetOutcome,
};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CA artifact publisher - pushes certificates and CRLs to LDAP, file mirrors
/// and OCSP responders
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "ca-publish")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "publish.json")]
    config: String,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish an artifact to the configured targets
    Publish(ArtifactArgs),
    /// Withdraw an artifact from the configured targets
    Unpublish(ArtifactArgs),
}

#[derive(Args, Debug)]
struct ArtifactArgs {
    /// CRL file (DER or PEM)
    #[arg(long, conflicts_with_all = ["cert", "pair"])]
    crl: Option<String>,

    /// Certificate file (DER or PEM)
    #[arg(long, conflicts_with = "pair")]
    cert: Option<String>,

    /// Cross-certificate pair file (DER)
    #[arg(long)]
    pair: Option<String>,

    /// Issuing point id used to name CRL files
    #[arg(long, requires = "crl")]
    issuing_point: Option<String>,

    /// Directory entry DN overriding each target's mapping
    #[arg(long)]
    dn: Option<String>,

    /// Restrict to the named targets (repeatable)
    #[arg(short, long = "target")]
    targets: Vec<String>,

    /// Overall time limit in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl ArtifactArgs {
    fn load(&self) -> Result<Artifact, String> {
        if let Some(path) = &self.crl {
            let der = read_der(path)?;
            let mut crl = CrlArtifact::from_der(&der).map_err(|e| format!("{}: {}", path, e))?;
            if let Some(id) = &self.issuing_point {
                crl = crl.with_issuing_point(id.clone());
            }
            return Ok(Artifact::Crl(crl));
        }
        if let Some(path) = &self.cert {
            let der = read_der(path)?;
            let cert = CertificateArtifact::from_der(&der).map_err(|e| format!("{}: {}", path, e))?;
            return Ok(Artifact::Certificate(cert));
        }
        if let Some(path) = &self.pair {
            let bytes = fs::read(path).map_err(|e| format!("{}: {}", path, e))?;
            return Ok(Artifact::CertificatePair(CertificatePairArtifact::new(bytes)));
        }
        Err("one of --crl, --cert or --pair is required".to_string())
    }

    fn selection(&self) -> Selection {
        Selection {
            targets: self.targets.clone(),
            dn: self.dn.clone(),
        }
    }

    fn context(&self) -> CallContext {
        match self.timeout {
            Some(secs) => CallContext::new().with_timeout(Duration::from_secs(secs)),
            None => CallContext::new(),
        }
    }
}

fn read_der(path: &str) -> Result<Vec<u8>, String> {
    let bytes = fs::read(path).map_err(|e| format!("{}: {}", path, e))?;
    decode_pem_or_der(&bytes).map_err(|e| format!("{}: {}", path, e))
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate || cli.command.is_some() {
                eprintln!("Configuration error in {}: {}", cli.config, e);
                process::exit(1);
            }

            warn!("Could not load config file from: {}", cli.config);
            info!("Creating example configuration at: {}", cli.config);
            if let Err(e) = Config::example().to_file(&cli.config) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }
            info!("Please edit {} and run again", cli.config);
            process::exit(0);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully");
        println!("  Log level: {}", config.log_level.as_deref().unwrap_or("info"));
        if let Some(directory) = &config.directory {
            println!("  Directory: {}", directory.url());
        }
        if let Some(path) = &config.audit_log_path {
            println!("  Audit log: {}", path);
        }
        println!("  Targets:");
        for target in &config.targets {
            println!("    {} ({})", target.name(), target.kind());
        }
        process::exit(0);
    }

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (args, publish) = match &cli.command {
        Some(Command::Publish(args)) => (args, true),
        Some(Command::Unpublish(args)) => (args, false),
        None => {
            eprintln!("Nothing to do: use the publish or unpublish subcommand");
            process::exit(2);
        }
    };

    let artifact = match args.load() {
        Ok(artifact) => artifact,
        Err(e) => {
            error!("Cannot load artifact: {}", e);
            process::exit(1);
        }
    };

    let store: Arc<dyn ConfigStore> = match &config.state_path {
        Some(path) => match JsonConfigStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Cannot open state file {}: {}", path, e);
                process::exit(1);
            }
        },
        None => Arc::new(MemoryConfigStore::new()),
    };

    let audit = match AuditLogger::new(config.audit_log_path.clone()) {
        Ok(logger) => Arc::new(logger),
        Err(e) => {
            error!("Cannot open audit log: {}", e);
            process::exit(1);
        }
    };

    let sweep = match PublishSweep::from_config(&config, store, audit) {
        Ok(sweep) => sweep,
        Err(e) => {
            error!("Cannot set up publishers: {}", e);
            process::exit(1);
        }
    };

    info!("{} {}", if publish { "Publishing" } else { "Unpublishing" }, artifact.describe());
    let outcomes = if publish {
        sweep.publish(&artifact, &args.selection(), &args.context())
    } else {
        sweep.unpublish(&artifact, &args.selection(), &args.context())
    };

    report(&outcomes);
    if outcomes.iter().any(TargetOutcome::is_failure) {
        process::exit(1);
    }
}

fn report(outcomes: &[TargetOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(PublishReport::Absorbed(reason)) => {
                println!("  ~ {} ({}): failed, ignored: {}", outcome.target, outcome.kind, reason)
            }
            Ok(report) => println!("  + {} ({}): {}", outcome.target, outcome.kind, report),
            Err(e) => println!("  ! {} ({}): {}", outcome.target, outcome.kind, e),
        }
    }
}
