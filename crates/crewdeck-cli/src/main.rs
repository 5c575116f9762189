use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crewdeck_client::CrewConsole;
use crewdeck_core::{CrewEvent, EngineHealth, RunStatus};
use tokio::time;
use tracing_subscriber::EnvFilter;
use url::Url;

const PRESET_TOPICS: &[&str] = &[
    "Analyze the competitive landscape for edge AI inference providers in 2025",
    "Compare GPU cloud providers for machine learning inference workloads",
    "Evaluate the market opportunity for AI-powered content moderation at the network edge",
    "Assess the impact of on-device AI vs cloud AI for real-time video analytics",
];

#[derive(Parser)]
#[command(name = "crewdeck")]
#[command(about = "Cockpit CLI for crew research runs", long_about = None)]
struct Cli {
    /// Backend origin, e.g. http://127.0.0.1:8000
    #[arg(long, global = true, default_value = "http://127.0.0.1:8000")]
    api: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a crew run and follow it live
    Run {
        /// Research topic for the crew
        #[arg(long, conflicts_with = "preset")]
        topic: Option<String>,
        /// Use one of the built-in topics (1-4)
        #[arg(long)]
        preset: Option<usize>,
    },
    /// Follow an existing run's event stream
    Watch { run_id: String },
    /// Point-in-time status of a run
    Status { run_id: String },
    /// List known runs
    Runs,
    /// Print a completed run's report
    Report { run_id: String },
    /// Backend health summary
    Health,
    /// Ask the backend to pre-load its models
    Warmup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let base = Url::parse(&cli.api).context("invalid --api origin")?;

    match cli.command {
        Commands::Run { topic, preset } => {
            let topic = resolve_topic(topic, preset)?;
            let console = CrewConsole::new(base);
            if !console.refresh_health().await {
                println!("warning: backend health probe failed");
            }
            let run_id = console.start_run(&topic).await?;
            println!("run {run_id}: {topic}");
            follow(&console).await
        }
        Commands::Watch { run_id } => {
            let console = CrewConsole::new(base);
            let status = console.api().run_status(&run_id).await?;
            console.run().begin(&run_id, &status.topic);
            if let Some(elapsed) = status.elapsed_seconds {
                console.run().tick_elapsed(elapsed);
            }
            println!("run {run_id}: {}", status.topic);
            console.attach(&run_id);
            follow(&console).await
        }
        Commands::Status { run_id } => {
            let console = CrewConsole::new(base);
            let status = console.api().run_status(&run_id).await?;
            println!("run {}: {}", status.run_id, status.status);
            println!("topic: {}", status.topic);
            if let Some(elapsed) = status.elapsed_seconds {
                println!("elapsed: {elapsed:.1}s");
            }
            println!("events: {}", status.events_count);
            if let Some(path) = &status.report_path {
                println!("report: {path}");
            }
            for chart in &status.charts {
                println!("chart: {chart}");
            }
            if let Some(error) = &status.error {
                println!("error: {error}");
            }
            Ok(())
        }
        Commands::Runs => {
            let console = CrewConsole::new(base);
            let runs = console.api().list_runs().await?;
            if runs.is_empty() {
                println!("no runs");
            }
            for entry in &runs {
                println!("- [{}] {} ({})", entry.run_id, entry.topic, entry.status);
            }
            Ok(())
        }
        Commands::Report { run_id } => {
            let console = CrewConsole::new(base);
            let document = console.api().report(&run_id).await?;
            println!("{}", document.report);
            for chart in &document.charts {
                println!("chart: {chart}");
            }
            Ok(())
        }
        Commands::Health => {
            let console = CrewConsole::new(base);
            let health = console.api().health().await?;
            let mock = if health.mock_mode { " (mock mode)" } else { "" };
            println!("backend: {}{mock}", health.status.as_str());
            print_engine("orchestrator", &health.orchestrator);
            print_engine("specialist", &health.specialist);
            Ok(())
        }
        Commands::Warmup => {
            let console = CrewConsole::new(base);
            let warmup = console.api().warmup().await?;
            print_warmup("orchestrator", warmup.orchestrator_ms);
            print_warmup("specialist", warmup.specialist_ms);
            Ok(())
        }
    }
}

fn resolve_topic(topic: Option<String>, preset: Option<usize>) -> Result<String> {
    match (topic, preset) {
        (Some(topic), _) => Ok(topic),
        (None, Some(n)) => n
            .checked_sub(1)
            .and_then(|index| PRESET_TOPICS.get(index))
            .map(|topic| topic.to_string())
            .ok_or_else(|| anyhow!("preset must be 1-{}", PRESET_TOPICS.len())),
        (None, None) => bail!("pass --topic or --preset <1-{}>", PRESET_TOPICS.len()),
    }
}

/// Print the run's events as they arrive until the run reaches a terminal
/// status or the stream closes for good. The wall clock here is the tick
/// source for the projection's elapsed time.
async fn follow(console: &CrewConsole) -> Result<()> {
    let run = console.run();
    let mut events_rx = run.events().subscribe();
    let mut live_rx = console.stream_live().subscribe();
    let started = Instant::now();
    let mut ticker = time::interval(Duration::from_secs(1));
    let mut printed = 0;

    loop {
        let log = run.events().get();
        for event in &log[printed..] {
            print_event(event);
        }
        printed = log.len();

        if run.status().get().is_terminal() || !*live_rx.borrow_and_update() {
            break;
        }
        tokio::select! {
            changed = events_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = live_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                run.tick_elapsed(started.elapsed().as_secs_f64());
            }
        }
    }

    let log = run.events().get();
    for event in &log[printed..] {
        print_event(event);
    }

    match run.status().get() {
        RunStatus::Completed => {
            // The console fetches the resolved report in the background
            // once crew_complete lands; give it a moment.
            let mut report_rx = run.report_markdown().subscribe();
            if report_rx.borrow_and_update().is_none() {
                let _ = time::timeout(Duration::from_secs(10), report_rx.changed()).await;
            }
            println!();
            println!("run completed in {:.1}s", run.elapsed_seconds().get());
            match run.report_markdown().get() {
                Some(report) => println!("\n{report}"),
                None => {
                    if let Some(path) = run.report_path().get() {
                        println!("report at {path}");
                    }
                }
            }
            for chart in run.charts().get() {
                println!("chart: {chart}");
            }
            Ok(())
        }
        RunStatus::Error => {
            let message = run
                .error()
                .get()
                .unwrap_or_else(|| "crew run failed".to_string());
            bail!("run failed: {message}")
        }
        _ => bail!("stream ended before the run finished"),
    }
}

fn print_event(event: &CrewEvent) {
    match event {
        CrewEvent::AgentStart {
            agent,
            task_summary,
            ..
        } => {
            let who = agent_label(agent.as_deref());
            match task_summary {
                Some(task) => println!("[start] {who}: {task}"),
                None => println!("[start] {who}"),
            }
        }
        CrewEvent::AgentOutput { agent, content, .. } => {
            if let Some(content) = content {
                println!("        {}: {content}", agent_label(agent.as_deref()));
            }
        }
        CrewEvent::AgentComplete {
            agent,
            elapsed_seconds,
            ..
        } => {
            let who = agent_label(agent.as_deref());
            match elapsed_seconds {
                Some(elapsed) => println!("[done]  {who} ({elapsed:.1}s)"),
                None => println!("[done]  {who}"),
            }
        }
        CrewEvent::Delegation {
            from,
            to,
            instruction,
            ..
        } => {
            let from = agent_label(from.as_deref());
            let to = agent_label(to.as_deref());
            match instruction {
                Some(instruction) => println!("[hand]  {from} -> {to}: {instruction}"),
                None => println!("[hand]  {from} -> {to}"),
            }
        }
        CrewEvent::ChartCreated {
            chart_title, path, ..
        } => {
            let title = chart_title.as_deref().unwrap_or("chart");
            match path {
                Some(path) => println!("[chart] {title} ({path})"),
                None => println!("[chart] {title}"),
            }
        }
        CrewEvent::CrewComplete { total_seconds, .. } => match total_seconds {
            Some(total) => println!("[crew]  complete in {total:.1}s"),
            None => println!("[crew]  complete"),
        },
        CrewEvent::Error {
            message,
            recoverable,
            ..
        } => {
            let message = message.as_deref().unwrap_or("unknown error");
            if recoverable.unwrap_or(false) {
                println!("[warn]  {message}");
            } else {
                println!("[error] {message}");
            }
        }
    }
}

fn print_engine(name: &str, engine: &EngineHealth) {
    let state = if engine.ollama { "up" } else { "down" };
    match (&engine.model, &engine.models) {
        (Some(model), _) => println!("{name}: {state} ({model})"),
        (None, Some(models)) if !models.is_empty() => {
            println!("{name}: {state} ({})", models.join(", "))
        }
        _ => println!("{name}: {state}"),
    }
}

fn print_warmup(vm: &str, ms: i64) {
    if ms < 0 {
        println!("{vm}: warmup failed");
    } else {
        println!("{vm}: {ms} ms");
    }
}

fn agent_label(agent: Option<&str>) -> &str {
    match agent {
        Some("manager") => "Manager",
        Some("researcher") => "Researcher",
        Some("analyst") => "Analyst",
        Some("visualizer") => "Visualizer",
        Some("writer") => "Writer",
        Some("system") => "System",
        Some(other) => other,
        None => "crew",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_one_indexed() {
        let topic = resolve_topic(None, Some(1)).expect("first preset");
        assert_eq!(topic, PRESET_TOPICS[0]);
        assert!(resolve_topic(None, Some(0)).is_err());
        assert!(resolve_topic(None, Some(PRESET_TOPICS.len() + 1)).is_err());
    }

    #[test]
    fn explicit_topic_wins() {
        let topic = resolve_topic(Some("custom".to_string()), None).expect("topic");
        assert_eq!(topic, "custom");
        assert!(resolve_topic(None, None).is_err());
    }

    #[test]
    fn unknown_agents_keep_their_name() {
        assert_eq!(agent_label(Some("researcher")), "Researcher");
        assert_eq!(agent_label(Some("auditor")), "auditor");
        assert_eq!(agent_label(None), "crew");
    }
}
