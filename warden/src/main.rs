use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use warden_core::analytics::{ErrorAnalyticsEngine, ErrorInsight, ErrorPattern, ErrorTrend, SystemHealth};
use warden_core::classifier::{ErrorClassifier, ErrorContext, ErrorReport, RawError};
use warden_core::config::WardenConfig;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Client-side resilience core: classify failures and analyze error logs", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables are used when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a raw error given as JSON (use `-` to read stdin)
    Classify {
        /// Raw error JSON, e.g. '{"code":4001,"message":"User rejected"}'
        input: String,

        /// Component the error came from
        #[arg(long)]
        component: Option<String>,

        /// Action that was being performed
        #[arg(long)]
        action: Option<String>,

        /// Affected user id
        #[arg(long)]
        user: Option<String>,
    },
    /// Run one analytics pass over a JSON array of error reports
    Analyze {
        /// File holding the reports
        file: PathBuf,

        /// Analysis time (RFC 3339); defaults to the newest report
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Maximum patterns, trends and insights to print
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Validate a TOML configuration file
    CheckConfig {
        file: PathBuf,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisOutput {
    analyzed_at: DateTime<Utc>,
    reports: usize,
    health: SystemHealth,
    patterns: Vec<ErrorPattern>,
    trends: Vec<ErrorTrend>,
    insights: Vec<ErrorInsight>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging falls back to defaults when the configuration is invalid
    let config = load_config(cli.config.as_deref());
    init_logging(config.as_ref().ok());

    match cli.command {
        Commands::Classify {
            input,
            component,
            action,
            user,
        } => {
            let config = config?;
            let mut context = ErrorContext::new();
            if let Some(component) = component {
                context = context.component(component);
            }
            if let Some(action) = action {
                context = context.action(action);
            }
            if let Some(user) = user {
                context = context.user(user);
            }
            let report = classify(&config, &input, &context)?;
            print_json(&report)
        }
        Commands::Analyze { file, at, limit } => {
            let config = config?;
            let output = analyze(&config, &file, at, limit)?;
            print_json(&output)
        }
        Commands::Config => {
            let config = config?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::CheckConfig { file } => {
            WardenConfig::from_file(&file).with_context(|| format!("{} is not a valid configuration", file.display()))?;
            println!("{}: ok", file.display());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<WardenConfig> {
    match path {
        Some(path) => {
            WardenConfig::from_file(path).with_context(|| format!("failed to load configuration from {}", path.display()))
        }
        None => WardenConfig::from_env().context("invalid configuration in environment"),
    }
}

fn init_logging(config: Option<&WardenConfig>) {
    let logging = config.map(|c| c.logging.clone()).unwrap_or_default();
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in logging.directives() {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring invalid log directive {}: {}", directive, e),
        }
    }

    // stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(logging.ansi)
        .with_writer(std::io::stderr)
        .init();
}

fn classify(config: &WardenConfig, input: &str, context: &ErrorContext) -> Result<ErrorReport> {
    let text = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        buffer
    } else {
        input.to_string()
    };

    // Anything that is not JSON is treated as a bare message
    let value = serde_json::from_str(text.trim()).unwrap_or_else(|_| serde_json::Value::String(text.trim().to_string()));
    let raw = RawError::from_value(&value);
    debug!(?raw, "Parsed raw error");

    let classifier = ErrorClassifier::new(config.classifier.clone());
    Ok(classifier.classify(&raw, context))
}

fn analyze(config: &WardenConfig, file: &Path, at: Option<DateTime<Utc>>, limit: usize) -> Result<AnalysisOutput> {
    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let reports: Vec<ErrorReport> =
        serde_json::from_str(&content).with_context(|| format!("{} is not a JSON array of error reports", file.display()))?;

    let analyzed_at = at
        .or_else(|| reports.iter().map(|r| r.timestamp).max())
        .unwrap_or_else(Utc::now);
    info!(reports = reports.len(), %analyzed_at, "Running analysis pass");

    let engine = ErrorAnalyticsEngine::new(config.analytics.clone());
    let summary = engine.analyze_at(&reports, analyzed_at);

    Ok(AnalysisOutput {
        analyzed_at,
        reports: reports.len(),
        health: summary.health,
        patterns: engine.get_error_patterns(limit),
        trends: engine.get_error_trends(limit),
        insights: engine.get_insights(limit),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;
    use warden_core::classifier::ErrorType;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_classify_json_and_plain_text() {
        let config = WardenConfig::default();
        let context = ErrorContext::new().component("cli");

        let report = classify(&config, r#"{"code": 4001, "message": "User rejected the request"}"#, &context).unwrap();
        assert_eq!(report.error_type, ErrorType::Wallet);
        assert!(!report.retryable);

        let report = classify(&config, "socket hang up", &context).unwrap();
        assert_eq!(report.error_type, ErrorType::Network);
        assert_eq!(report.context.component.as_deref(), Some("cli"));
    }

    #[test]
    fn test_analyze_file() {
        let config = WardenConfig::default();
        let classifier = ErrorClassifier::new(config.classifier.clone());
        let reports: Vec<ErrorReport> = (0..4)
            .map(|i| {
                classifier.classify(
                    &RawError::new(format!("Failed to fetch /listings/{}", i)),
                    &ErrorContext::new().user(format!("user-{}", i)),
                )
            })
            .collect();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&reports).unwrap().as_bytes()).unwrap();

        let output = analyze(&config, file.path(), None, 5).unwrap();
        assert_eq!(output.reports, 4);
        assert_eq!(output.patterns.len(), 1);
        assert_eq!(output.patterns[0].frequency, 4);
        assert_eq!(output.health.affected_users, 4);
    }

    #[test]
    fn test_check_config_rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[threat]\nmax_requests_per_second = 0").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }
}
