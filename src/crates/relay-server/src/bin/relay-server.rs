//! relay-server binary: SQLite-backed runtime behind the HTTP adapter
//!
//! Runs the full topology in one process: the coordinator-facing API plus
//! an in-process worker claiming from the shared queue. A single
//! cancellation token ties HTTP shutdown and the worker's claim loop to
//! Ctrl-C.

use anyhow::Context;
use clap::Parser;
use relay_agent::{Agent, Provider};
use relay_dispatch::{
    AgentProcessor, Coordinator, GraphProcessor, ModeProcessor, RetryPolicy, SqliteQueue, Worker,
    WorkerConfig,
};
use relay_events::EventBus;
use relay_graph::{build_graph, parse_graph_file, CompiledGraph, GraphExecutor};
use relay_server::{router, AppState, HttpProvider, ServerConfig};
use relay_store::{HybridStore, MemoryStore, SqliteStore, StateStore, StoreSink};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::parse();
    let shutdown = CancellationToken::new();

    let store = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .context("connecting state store")?,
    );
    let queue = Arc::new(
        SqliteQueue::with_pool(store.pool().clone())
            .await
            .context("preparing queue tables")?,
    );

    let bus = Arc::new(EventBus::new());
    bus.attach_sink(Arc::new(StoreSink(store.clone())));

    // SQLite stays authoritative; the in-process cache accelerates hot
    // run and checkpoint reads.
    let hybrid: Arc<dyn StateStore> =
        Arc::new(HybridStore::new(store.clone(), Arc::new(MemoryStore::new())));

    let coordinator = Arc::new(
        Coordinator::new(
            hybrid.clone(),
            store.clone(),
            queue.clone(),
            bus.clone(),
            RetryPolicy::default(),
        )
        .with_queue_name(&config.queue_name),
    );

    let provider: Option<Arc<dyn Provider>> = config.provider_url.as_ref().map(|url| {
        let mut provider = HttpProvider::new(url, &config.provider_model);
        if let Some(key) = &config.provider_api_key {
            provider = provider.with_api_key(key);
        }
        Arc::new(provider) as Arc<dyn Provider>
    });
    if provider.is_none() {
        warn!("no provider endpoint configured; agent tasks will fail until one is set");
    }
    let agent = provider
        .clone()
        .map(|p| Arc::new(Agent::new(p).with_event_bus(bus.clone())));

    // The worker serves both execution shapes through one processor.
    let executor = Arc::new(GraphExecutor::new(hybrid.clone()).with_event_bus(bus.clone()));
    let mut graph_processor = GraphProcessor::new(executor);
    if let Some(dir) = &config.workflows_dir {
        for (name, graph) in load_workflows(dir, agent.clone()).context("loading workflows")? {
            info!(workflow = %name, "workflow registered");
            graph_processor = graph_processor.with_workflow(name, graph);
        }
    }
    let mut processor = ModeProcessor::new().with_graph(Arc::new(graph_processor));
    if let Some(provider) = provider.clone() {
        processor = processor.with_agent(Arc::new(
            AgentProcessor::new(provider, hybrid.clone()).with_event_bus(bus.clone()),
        ));
    }

    let worker = Arc::new(Worker::new(
        WorkerConfig::new(&config.worker_id, config.capacity),
        queue,
        hybrid.clone(),
        store.clone(),
        bus.clone(),
        Arc::new(processor),
        RetryPolicy::default(),
    ));
    let worker_task = {
        let worker = worker.clone();
        let ctx = shutdown.clone();
        tokio::spawn(async move { worker.start(ctx).await })
    };

    let mut state = AppState::new(hybrid, store, coordinator, bus);
    if let Some(agent) = agent {
        state = state.with_playground(agent);
    }
    let app = router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    info!(address = %address, worker_id = %config.worker_id, "relay server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
                shutdown.cancel();
            }
        })
        .await
        .context("serving")?;

    // serve can also return without the signal firing; the worker must
    // still wind down and flip its heartbeat to offline
    shutdown.cancel();
    worker_task
        .await
        .context("joining worker")?
        .context("worker exited with error")?;

    Ok(())
}

/// Read every `*.json` graph definition in `dir` and compile it
fn load_workflows(
    dir: &Path,
    agent: Option<Arc<Agent>>,
) -> anyhow::Result<Vec<(String, CompiledGraph)>> {
    let mut workflows = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file = parse_graph_file(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        let graph = build_graph(&file, agent.clone())
            .and_then(|g| g.compile())
            .with_context(|| format!("compiling {}", path.display()))?;
        workflows.push((file.name.clone(), graph));
    }
    Ok(workflows)
}
