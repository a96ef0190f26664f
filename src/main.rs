//! s3verify -- conformance tests for S3-compatible servers.
//!
//! Runs every registered case against one endpoint and exits non-zero
//! when any of them fails.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use s3verify::auth::Credentials;
use s3verify::config::{self, Config};
use s3verify::executor::Executor;
use s3verify::report::ConsoleReporter;
use s3verify::trace::TraceObserver;
use s3verify::{cases, fixtures, Env};

/// Command-line arguments.  Flags win over the configuration file.
#[derive(Parser, Debug)]
#[command(
    name = "s3verify",
    version,
    about = "Conformance tests for S3-compatible object storage servers"
)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Endpoint under test, e.g. http://127.0.0.1:9000.
    #[arg(long, env = "S3_URL")]
    endpoint: Option<String>,

    /// Access key.
    #[arg(long, env = "S3_ACCESS")]
    access_key: Option<String>,

    /// Secret key.
    #[arg(long, env = "S3_SECRET", hide_env_values = true)]
    secret_key: Option<String>,

    /// Region in the credential scope.
    #[arg(long, env = "S3_REGION")]
    region: Option<String>,

    /// Fixture operations in flight at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Objects seeded per case.
    #[arg(long)]
    objects: Option<usize>,

    /// Prepare shared fixtures and also run the read-only cases on them.
    #[arg(long)]
    prepare: bool,

    /// Keep the shared fixtures after the run.
    #[arg(long)]
    keep: bool,

    /// Log every request and response, credentials redacted.
    #[arg(long)]
    trace: bool,

    /// Print a JSON summary on stdout after the run.
    #[arg(long)]
    json: bool,

    /// Only run cases whose name contains this string.
    #[arg(long)]
    filter: Option<String>,

    /// List the selected cases and exit.
    #[arg(long)]
    list: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(endpoint) = &self.endpoint {
            config.server.endpoint = endpoint.clone();
        }
        if let Some(region) = &self.region {
            config.server.region = region.clone();
        }
        if let Some(access_key) = &self.access_key {
            config.auth.access_key = access_key.clone();
        }
        if let Some(secret_key) = &self.secret_key {
            config.auth.secret_key = secret_key.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency;
        }
        if let Some(objects) = self.objects {
            config.run.objects = objects;
        }
        config.run.prepare |= self.prepare;
        config.run.keep_fixtures |= self.keep;
    }
}

fn init_logging(config: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    cli.apply(&mut config);

    let suite = cases::registry(config.run.prepare).with_filter(cli.filter.clone());
    if cli.list {
        for name in suite.selected() {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    config::validate(&config)?;
    init_logging(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {path}");
    }

    let credentials = Credentials::new(
        &config.server.endpoint,
        &config.auth.access_key,
        &config.auth.secret_key,
        &config.server.region,
    )?;
    let mut executor = Executor::new(config.run.timeout())?;
    if cli.trace {
        executor = executor.with_observer(Arc::new(TraceObserver::new()));
    }
    let mut env = Env::new(credentials, executor)
        .with_concurrency(config.run.concurrency)
        .with_objects(config.run.objects);
    info!(
        "Testing {} (region {}, concurrency {})",
        config.server.endpoint,
        config.server.region,
        env.concurrency()
    );

    let shared = if config.run.prepare {
        let (prepared, set) = cases::prepare_env(env).await;
        env = prepared;
        set
    } else {
        None
    };

    let reporter = ConsoleReporter::stdout();
    let report = suite.run(&env, &reporter).await;

    if let Some(set) = shared {
        if config.run.keep_fixtures {
            info!("Keeping shared fixtures in bucket {}", set.bucket);
        } else if let Err(e) = fixtures::teardown(&env, &set).await {
            warn!("Failed to remove shared fixtures: {e}");
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report.summary())?);
    }

    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
