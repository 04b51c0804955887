use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scout_core::{
    Orchestrator, OrchestratorEvent, Priority, ResearchQuery, ResearchResult, ToolRegistry,
};
use scout_providers::AnthropicProvider;
use scout_tools::create_research_tools;

mod config;
mod event_log;

use config::Config;
use event_log::EventLog;

/// Categories researched when none are given on the command line.
const DEFAULT_TARGETS: [&str; 3] = ["website", "social_media", "linkedin_company"];

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Everything, including raw provider payloads
    Trace,
    /// Model turns and tool calls
    Debug,
    /// Run start and end
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
        }
    }
}

#[derive(Parser)]
#[command(name = "scout")]
#[command(author, version, long_about = None)]
#[command(about = "Research music festivals with a tool-calling language model")]
pub struct Cli {
    /// Config file (default: ~/.config/scout/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    /// Write logs to this file as JSON instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Append every orchestrator event to this file (JSON lines)
    #[arg(long, global = true)]
    pub event_log: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Research a festival
    Research {
        /// Festival name
        #[arg(required_unless_present = "query")]
        festival: Option<String>,

        /// Read the whole query from a JSON file instead
        #[arg(long, conflicts_with = "festival")]
        query: Option<PathBuf>,

        /// Festival id carried into the result
        #[arg(long)]
        id: Option<String>,

        /// Information to find (comma separated, repeatable)
        #[arg(short, long = "target", value_delimiter = ',')]
        targets: Vec<String>,

        /// How many hops away from search results to follow links
        #[arg(long, default_value_t = 2)]
        max_depth: u32,

        #[arg(long, value_enum, default_value = "normal")]
        priority: PriorityArg,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Find the LinkedIn company page and organizers of a festival
    Linkedin {
        /// Festival name
        festival: String,

        /// Festival id carried into the result
        #[arg(long)]
        id: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the effective configuration (secrets masked)
    Config,
}

/// Overrides shared by the research commands.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Maximum number of model turns
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Stream model responses
    #[arg(long)]
    pub stream: bool,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Do not print progress to stderr
    #[arg(short, long)]
    pub quiet: bool,

    /// Pretty-print the result JSON
    #[arg(long)]
    pub pretty: bool,
}

fn init_logging(level: LogLevel, log_file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::new(level.as_filter());

    if let Some(log_path) = log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn apply_run_args(config: &mut Config, run: &RunArgs) {
    if let Some(model) = &run.model {
        config.llm.model = Some(model.clone());
    }
    if let Some(max) = run.max_iterations {
        config.orchestrator.max_iterations = max.max(1);
    }
    if run.stream {
        config.orchestrator.enable_streaming = true;
    }
    if let Some(secs) = run.timeout {
        config.orchestrator.timeout_secs = Some(secs);
    }
}

fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let api_key = config.llm.api_key.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured. Set llm.api_key in the config file or ANTHROPIC_API_KEY"
        )
    })?;

    let mut provider = AnthropicProvider::new(api_key);
    if let Some(base_url) = &config.llm.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    if let Some(model) = &config.llm.model {
        provider = provider.with_default_model(model.clone());
    }

    let tools = ToolRegistry::from_tools(create_research_tools(&config.tools))
        .context("Failed to register research tools")?;
    info!(tools = ?tools.names(), "Research tools ready");

    Ok(Orchestrator::new(
        Arc::new(provider),
        Arc::new(tools),
        config.orchestrator_config(),
    ))
}

/// One-line progress description, or `None` for events not worth showing.
fn progress_line(event: &OrchestratorEvent) -> Option<String> {
    match event {
        OrchestratorEvent::Start { query } => Some(format!(
            "Researching \"{}\" ({})",
            query.festival_name,
            query.target_info.join(", ")
        )),
        OrchestratorEvent::ToolCall { tool, input } => Some(format!("  → {} {}", tool, input)),
        OrchestratorEvent::Finding { finding } => Some(format!(
            "  ✓ {} (confidence {:.2})",
            finding.finding_type, finding.confidence
        )),
        OrchestratorEvent::Error { error } => Some(format!("  ✗ {}", error)),
        OrchestratorEvent::Complete { result } => Some(format!(
            "Done: {} findings, {} LinkedIn profiles",
            result.findings.len(),
            result.linkedin_profiles.len()
        )),
        OrchestratorEvent::Thinking { .. } | OrchestratorEvent::ToolResult { .. } => None,
    }
}

fn load_query(path: &Path) -> Result<ResearchQuery> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read query file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid query file: {:?}", path))
}

/// What a command asks the orchestrator to do.
#[derive(Debug, Clone, PartialEq)]
enum Job {
    Research(ResearchQuery),
    Linkedin {
        festival: String,
        id: Option<String>,
    },
}

impl Job {
    async fn run(&self, orchestrator: &Orchestrator) -> Result<ResearchResult> {
        let result = match self {
            Job::Research(query) => orchestrator.research(query).await,
            Job::Linkedin { festival, id } => {
                orchestrator.find_linkedin(festival, id.as_deref()).await
            }
        };
        result.context("Research query rejected")
    }
}

async fn run_research(
    cli: &Cli,
    mut config: Config,
    run_args: &RunArgs,
    job: Job,
) -> Result<ResearchResult> {
    apply_run_args(&mut config, run_args);
    let orchestrator = build_orchestrator(&config)?;

    // Subscriptions live as long as the orchestrator; they are never removed.
    if let Some(path) = &cli.event_log {
        let log = EventLog::new(path)
            .with_context(|| format!("Failed to open event log: {:?}", path))?;
        let _ = orchestrator.on_event(move |event| log.record(event));
    }
    if !run_args.quiet {
        let _ = orchestrator.on_event(|event| {
            if let Some(line) = progress_line(event) {
                eprintln!("{}", line);
            }
        });
    }

    let started = std::time::Instant::now();
    let result = job.run(&orchestrator).await?;
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        status = ?result.status,
        "Research finished"
    );
    Ok(result)
}

fn print_result(result: &ResearchResult, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_file.as_ref())?;

    let config = Config::load(cli.config.as_deref())?;

    let (job, run_args) = match &cli.command {
        Commands::Config => {
            print!("{}", config.to_masked_toml()?);
            return Ok(());
        }
        Commands::Research {
            festival,
            query,
            id,
            targets,
            max_depth,
            priority,
            run,
        } => {
            let query = match (query, festival) {
                (Some(path), _) => load_query(path)?,
                (None, Some(name)) => {
                    let targets: Vec<String> = if targets.is_empty() {
                        DEFAULT_TARGETS.iter().map(|t| t.to_string()).collect()
                    } else {
                        targets.clone()
                    };
                    let mut query = ResearchQuery::new(name.clone())
                        .with_target_info(targets)
                        .with_max_depth(*max_depth)
                        .with_priority((*priority).into());
                    query.festival_id = id.clone();
                    query
                }
                (None, None) => anyhow::bail!("Either a festival name or --query is required"),
            };
            (Job::Research(query), run.clone())
        }
        Commands::Linkedin { festival, id, run } => {
            let job = Job::Linkedin {
                festival: festival.clone(),
                id: id.clone(),
            };
            (job, run.clone())
        }
    };

    let result = run_research(&cli, config, &run_args, job).await?;
    print_result(&result, run_args.pretty)?;

    if !result.is_completed() {
        std::process::exit(2);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::testing::MockProvider;
    use scout_core::{Finding, OrchestratorConfig};
    use std::time::Duration;
    use serde_json::json;

    #[test]
    fn test_cli_parses_research() {
        let cli = Cli::try_parse_from([
            "scout",
            "research",
            "Tomorrowland",
            "-t",
            "website,linkedin_company",
            "--priority",
            "high",
            "--max-iterations",
            "5",
            "--event-log",
            "events.jsonl",
        ])
        .unwrap();

        assert_eq!(cli.event_log, Some(PathBuf::from("events.jsonl")));
        match cli.command {
            Commands::Research {
                festival,
                targets,
                priority,
                run,
                ..
            } => {
                assert_eq!(festival.as_deref(), Some("Tomorrowland"));
                assert_eq!(targets, vec!["website", "linkedin_company"]);
                assert_eq!(priority, PriorityArg::High);
                assert_eq!(run.max_iterations, Some(5));
            }
            _ => panic!("expected research command"),
        }
    }

    #[test]
    fn test_research_needs_festival_or_query() {
        assert!(Cli::try_parse_from(["scout", "research"]).is_err());
        assert!(Cli::try_parse_from(["scout", "research", "--query", "q.json"]).is_ok());
    }

    #[test]
    fn test_run_args_override_config() {
        let mut config = Config::default();
        let run = RunArgs {
            model: Some("claude-haiku".to_string()),
            max_iterations: Some(0),
            stream: true,
            timeout: Some(90),
            ..Default::default()
        };
        apply_run_args(&mut config, &run);

        assert_eq!(config.llm.model.as_deref(), Some("claude-haiku"));
        assert_eq!(config.orchestrator.max_iterations, 1);
        assert!(config.orchestrator.enable_streaming);
        assert_eq!(config.timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_missing_api_key_is_reported() {
        let err = build_orchestrator(&Config::default()).err().unwrap();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_progress_lines() {
        let finding = Finding::new("web_search", json!({"answer": "x"}), 0.7);
        let line = progress_line(&OrchestratorEvent::Finding { finding }).unwrap();
        assert!(line.contains("web_search"));
        assert!(line.contains("0.70"));
        assert!(progress_line(&OrchestratorEvent::Thinking {
            text: "hmm".to_string()
        })
        .is_none());
    }

    #[test]
    fn test_query_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.json");
        std::fs::write(
            &path,
            r#"{"festivalName": "Melt", "targetInfo": ["website"], "priority": "low"}"#,
        )
        .unwrap();

        let query = load_query(&path).unwrap();
        assert_eq!(query.festival_name, "Melt");
        assert_eq!(query.max_depth, 2);
        assert_eq!(query.priority, Priority::Low);
    }

    #[tokio::test]
    async fn test_linkedin_job_uses_linkedin_search() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("No LinkedIn pages found.");
        let orchestrator = Orchestrator::new(
            provider.clone(),
            Arc::new(ToolRegistry::new()),
            OrchestratorConfig::new(),
        );

        let job = Job::Linkedin {
            festival: "Melt Festival".to_string(),
            id: Some("f-7".to_string()),
        };
        let result = job.run(&orchestrator).await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.festival_id.as_deref(), Some("f-7"));

        let request = provider.last_request().unwrap();
        let prompt: String = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert!(prompt.contains("\"Melt Festival\""));
        assert!(prompt.contains("linkedin_company"));
        assert!(prompt.contains("linkedin_organizers"));
        assert!(!prompt.contains("- website"));
    }

    #[tokio::test]
    async fn test_invalid_research_job_is_rejected() {
        let orchestrator = Orchestrator::new(
            Arc::new(MockProvider::new()),
            Arc::new(ToolRegistry::new()),
            OrchestratorConfig::new(),
        );
        let job = Job::Research(ResearchQuery::new("  ").with_target_info(["website"]));
        let err = job.run(&orchestrator).await.unwrap_err();
        assert!(err.to_string().contains("Research query rejected"));
    }
}
