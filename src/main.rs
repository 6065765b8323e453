use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use uxagent::agent::AgentController;
use uxagent::browser::{ScriptedBrowser, SiteFixture};
use uxagent::config::AgentConfig;
use uxagent::llm_client::LlmClient;
use uxagent::memory::MemoryStream;
use uxagent::persona::Persona;
use uxagent::recorder::SessionRecorder;
use uxagent::server;
use uxagent::session::SessionDriver;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,uxagent=debug")),
        )
        .init();

    let config = AgentConfig::load();
    let args: Vec<String> = std::env::args().skip(1).collect();

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    match args.first().map(String::as_str) {
        None | Some("serve") => {
            tracing::info!("Starting uxagent API (set UXAGENT_API_TOKEN to require auth)");
            runtime.block_on(server::serve(config))
        }
        Some("run") => {
            let options = RunOptions::parse(&args[1..])?;
            runtime.block_on(run_session(config, options))
        }
        Some(other) => {
            anyhow::bail!("Unknown command '{}'. Usage: uxagent [serve|run]", other)
        }
    }
}

struct RunOptions {
    persona_path: PathBuf,
    intent: String,
    start_url: String,
    site_path: Option<PathBuf>,
    max_cycles: Option<usize>,
    trace_path: Option<PathBuf>,
    memory_path: Option<PathBuf>,
}

impl RunOptions {
    fn parse(args: &[String]) -> Result<Self> {
        let mut persona_path = None;
        let mut intent = None;
        let mut start_url = None;
        let mut site_path = None;
        let mut max_cycles = None;
        let mut trace_path = None;
        let mut memory_path = None;

        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            let mut value = |name: &str| -> Result<String> {
                iter.next()
                    .cloned()
                    .with_context(|| format!("{} requires a value", name))
            };
            match flag.as_str() {
                "--persona" => persona_path = Some(PathBuf::from(value("--persona")?)),
                "--intent" => intent = Some(value("--intent")?),
                "--url" => start_url = Some(value("--url")?),
                "--site" => site_path = Some(PathBuf::from(value("--site")?)),
                "--max-cycles" => {
                    max_cycles = Some(
                        value("--max-cycles")?
                            .parse::<usize>()
                            .context("--max-cycles must be a number")?,
                    )
                }
                "--trace" => trace_path = Some(PathBuf::from(value("--trace")?)),
                "--memory" => memory_path = Some(PathBuf::from(value("--memory")?)),
                other => anyhow::bail!("Unknown flag '{}'", other),
            }
        }

        Ok(Self {
            persona_path: persona_path.context("--persona <file> is required")?,
            intent: intent.context("--intent <text> is required")?,
            start_url: start_url.context("--url <url> is required")?,
            site_path,
            max_cycles,
            trace_path,
            memory_path,
        })
    }
}

async fn run_session(config: AgentConfig, options: RunOptions) -> Result<()> {
    let persona = Persona::load(&options.persona_path)?;
    let site = match &options.site_path {
        Some(path) => SiteFixture::load(path)?,
        None => SiteFixture::default(),
    };

    let llm = Arc::new(LlmClient::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone().unwrap_or_default(),
        config.llm_model.clone(),
    ));
    let embedder = server::build_embedder(&config);
    let browser = Arc::new(ScriptedBrowser::new(site));
    let memory = MemoryStream::new(embedder);

    let mut controller = AgentController::new(llm, browser, memory)
        .with_temperature(config.llm_temperature)
        .with_recorder(SessionRecorder::new());
    controller.set_persona(persona).await?;
    controller.set_intent(&options.intent).await?;

    let max_cycles = options.max_cycles.unwrap_or(config.max_cycles);
    let mut driver = SessionDriver::new(controller);
    let result = driver.run(&options.start_url, max_cycles).await?;

    tracing::info!(
        "Session finished: {} cycle(s), task_completed={}",
        result.cycles_completed,
        result.task_completed
    );
    for reflection in &result.reflections {
        tracing::info!("reflection: {}", reflection);
    }
    for wondering in &result.wonderings {
        tracing::info!("wondering: {}", wondering);
    }

    let controller = driver.into_controller();
    if let Some(path) = &options.trace_path {
        if let Some(recorder) = controller.recorder() {
            recorder.save(path)?;
            tracing::info!("Wrote action trace to {}", path.display());
        }
    }
    if let Some(path) = &options.memory_path {
        controller.memory().save(path)?;
        tracing::info!("Wrote memory ledger to {}", path.display());
    }

    println!(
        "{}",
        serde_json::json!({
            "final_url": result.final_url,
            "cycles_completed": result.cycles_completed,
            "task_completed": result.task_completed,
            "reflections": result.reflections,
            "wonderings": result.wonderings,
            "memory_count": result.memories.len(),
        })
    );
    Ok(())
}
