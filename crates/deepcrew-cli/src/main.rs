use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use deepcrew_core::report::persist_report;
use deepcrew_core::{
    ConfigLoader, CrewExecutor, EventRelay, PhaseController, PhaseExecutor, QualityControl,
    ResearchInputs, TelemetryOptions, init_telemetry, relay_research,
};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "deepcrew-cli",
    version,
    about = "DeepCrew phased research runner"
)]
struct Cli {
    /// Configuration file (defaults to `DEEPCREW_CONFIG` or `deepcrew.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a research request to completion.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Query to research.
    #[arg(long)]
    query: String,

    /// First date of the research window (YYYY-MM-DD).
    #[arg(long)]
    start_date: Option<String>,

    /// Last date of the research window (YYYY-MM-DD).
    #[arg(long)]
    end_date: Option<String>,

    /// Comma separated source kinds.
    #[arg(long)]
    sources: Option<String>,

    #[arg(long)]
    max_docs: Option<u32>,

    /// 1 = basic, 3 = standard, 5 = exhaustive.
    #[arg(long)]
    depth_level: Option<u8>,

    #[arg(long)]
    quality_threshold: Option<f64>,

    /// Skip cross-reference fact checking.
    #[arg(long)]
    no_fact_checking: bool,

    /// Go straight from research to reporting.
    #[arg(long)]
    no_refinement: bool,

    #[arg(long)]
    max_iterations: Option<u32>,

    #[arg(long)]
    min_sources_per_claim: Option<u32>,

    /// Print the relayed status events as server-sent-event frames.
    #[arg(long)]
    stream: bool,

    /// Write the final report into this directory.
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

impl RunArgs {
    fn quality(&self, defaults: &QualityControl) -> QualityControl {
        QualityControl {
            depth_level: self.depth_level.unwrap_or(defaults.depth_level),
            quality_threshold: self
                .quality_threshold
                .unwrap_or(defaults.quality_threshold),
            enable_fact_checking: defaults.enable_fact_checking && !self.no_fact_checking,
            enable_iterative_refinement: defaults.enable_iterative_refinement
                && !self.no_refinement,
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            min_sources_per_claim: self
                .min_sources_per_claim
                .unwrap_or(defaults.min_sources_per_claim),
        }
    }

    fn inputs(&self, defaults: &QualityControl) -> ResearchInputs {
        let inputs = ResearchInputs::new(self.query.trim())
            .with_quality(self.quality(defaults))
            .with_dates(self.start_date.clone(), self.end_date.clone())
            .with_sources(self.sources.clone());
        match self.max_docs {
            Some(max_docs) => inputs.with_max_docs(max_docs),
            None => inputs,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.clone())?;

    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        with_ansi: true,
    })?;

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args, config).await?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(args: RunArgs, config: deepcrew_core::Config) -> Result<()> {
    let inputs = args.inputs(&config.research);
    inputs.validate()?;

    let executor: Arc<dyn PhaseExecutor> = Arc::new(CrewExecutor::default());
    let report_dir = args.report_dir.or(config.server.report_dir);

    if args.stream {
        let (relay, receiver) = EventRelay::channel();
        let run = tokio::spawn(async move {
            relay_research(executor, inputs, relay, report_dir.as_deref()).await
        });

        let mut frames = receiver.frames(config.relay.heartbeat());
        let mut stdout = std::io::stdout();
        while let Some(frame) = frames.next().await {
            stdout.write_all(frame.encode().as_bytes())?;
            stdout.flush()?;
        }

        let outcome = run.await??;
        info!(
            score = outcome.final_score.value(),
            refinements = outcome.refinement_iterations,
            "research finished"
        );
        return Ok(());
    }

    let outcome = PhaseController::new(executor).run(inputs).await?;
    println!("{}", outcome.report);

    if let Some(path) = save_report(report_dir.as_deref(), &outcome.report)? {
        info!(path = %path.display(), "report written");
    }

    info!(
        score = %outcome.final_score,
        refinements = outcome.refinement_iterations,
        phases = outcome.phases.len(),
        "research finished"
    );
    Ok(())
}

fn save_report(dir: Option<&Path>, report: &str) -> Result<Option<PathBuf>> {
    let Some(dir) = dir else {
        return Ok(None);
    };
    let path = persist_report(dir, &Uuid::new_v4().to_string(), report)?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_configured_defaults() {
        let cli = Cli::try_parse_from([
            "deepcrew-cli",
            "run",
            "--query",
            "soil carbon",
            "--no-fact-checking",
            "--max-iterations",
            "5",
            "--sources",
            "papers",
        ])
        .unwrap();
        let Command::Run(args) = cli.command;

        let inputs = args.inputs(&QualityControl::default());

        assert_eq!(inputs.query, "soil carbon");
        assert_eq!(inputs.sources, "papers");
        assert!(!inputs.quality.enable_fact_checking);
        assert!(inputs.quality.enable_iterative_refinement);
        assert_eq!(inputs.quality.max_iterations, 5);
        assert_eq!(inputs.quality.depth_level, 3);
    }

    #[test]
    fn report_write_failure_fails_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "occupied").unwrap();

        assert!(save_report(Some(&blocker), "# Report").is_err());
        assert!(save_report(None, "# Report").unwrap().is_none());

        let written = save_report(Some(dir.path()), "# Report").unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(written).unwrap(), "# Report");
    }
}
