// src/main.rs

use std::io::{stdout, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::prelude::*;
use tracing::{error, info};
use uuid::Uuid;

mod app;
mod core;
mod logging;
mod ui;

use app::{App, AppState, ExportStatus};
use crate::core::browser::ChromeDriver;
use crate::core::config::ScannerConfig;
use crate::core::orchestrator::Orchestrator;
use crate::core::scanner::{DnsResolver, HttpProbe, IpApiLocator};
use crate::core::store::MemoryStore;

const TICK: Duration = Duration::from_millis(100);

/// The scan engine plus a handle on its store for exports.
struct Engine {
    orchestrator: Orchestrator,
    store: Arc<MemoryStore>,
}

impl Engine {
    fn build() -> Result<Self> {
        let config = ScannerConfig::from_env();
        let store = Arc::new(MemoryStore::new());
        let geo = IpApiLocator::new(&config.geolocation_endpoint, config.http_timeout)
            .wrap_err("failed to build the geolocation client")?;
        let probe = HttpProbe::new(config.http_timeout).wrap_err("failed to build the HTTP client")?;
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(ChromeDriver::new()),
            Arc::new(DnsResolver::new()),
            Arc::new(geo),
            Arc::new(probe),
            config,
        );
        Ok(Self { orchestrator, store })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::initialize_logging()?;
    let engine = Engine::build()?;
    info!("Starting {}.", env!("CARGO_PKG_NAME"));

    // --- Setup ---
    stdout().execute(EnterAlternateScreen)?;
    enable_raw_mode()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let result = run(&mut terminal, &engine).await;

    // --- Restore Terminal ---
    stdout().execute(LeaveAlternateScreen)?;
    disable_raw_mode()?;
    result
}

async fn run(terminal: &mut Terminal<CrosstermBackend<Stdout>>, engine: &Engine) -> Result<()> {
    let mut app = App::new();
    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        if event::poll(TICK)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(&mut app, engine, key.code).await;
                }
            }
        }
        app.on_tick();
        poll_execution(&mut app, engine).await;
    }
    Ok(())
}

async fn handle_key(app: &mut App, engine: &Engine, key_code: KeyCode) {
    match app.state {
        AppState::Disclaimer => match key_code {
            KeyCode::Enter => app.acknowledge_disclaimer(),
            KeyCode::Esc => app.quit(),
            _ => {}
        },
        AppState::Idle => handle_idle_input(app, engine, key_code).await,
        AppState::Scanning => {
            if matches!(key_code, KeyCode::Char('q') | KeyCode::Esc) {
                app.quit();
            }
        }
        AppState::Finished => handle_finished_input(app, engine, key_code).await,
    }
}

async fn handle_idle_input(app: &mut App, engine: &Engine, key_code: KeyCode) {
    match key_code {
        KeyCode::Esc => app.quit(),
        KeyCode::Tab => app.cycle_depth(),
        KeyCode::Char(c) => {
            app.error = None;
            app.input.push(c);
        }
        KeyCode::Backspace => {
            app.input.pop();
        }
        KeyCode::Enter => {
            let Some(request) = app.build_request() else {
                return;
            };
            let outcome = engine.orchestrator.scan(request).await;
            match (outcome.task_execution_id, outcome.error) {
                (Some(id), _) => app.start_scan(id),
                (None, error) => app.error = Some(error.unwrap_or_else(|| "Scan could not be started.".into())),
            }
        }
        _ => {}
    }
}

async fn handle_finished_input(app: &mut App, engine: &Engine, key_code: KeyCode) {
    match key_code {
        KeyCode::Char('q') | KeyCode::Esc => app.quit(),
        KeyCode::Char('n') => app.reset(),
        KeyCode::Char('e') => {
            app.export_status = match export_snapshot(&engine.store, app.execution_id).await {
                Ok(path) => ExportStatus::Success(path.display().to_string()),
                Err(e) => {
                    error!(error = ?e, "Export failed.");
                    ExportStatus::Error(e.to_string())
                }
            };
        }
        KeyCode::Up => app.select_previous(),
        KeyCode::Down => app.select_next(),
        _ => {}
    }
}

/// Refreshes the running execution and loads its report once it is terminal.
async fn poll_execution(app: &mut App, engine: &Engine) {
    if !matches!(app.state, AppState::Scanning) {
        return;
    }
    let Some(id) = app.execution_id else {
        return;
    };
    let execution = match engine.orchestrator.task_execution(id).await {
        Ok(execution) => execution,
        Err(e) => {
            error!(task_execution_id = %id, error = %e, "Lost track of execution.");
            app.reset();
            app.error = Some(e.to_string());
            return;
        }
    };
    if !execution.status.is_terminal() {
        app.execution = Some(execution);
        return;
    }
    match engine.orchestrator.report(id).await {
        Ok(report) => app.load_report(report),
        Err(e) => {
            error!(task_execution_id = %id, error = %e, "Could not load report.");
            app.reset();
            app.error = Some(e.to_string());
        }
    }
}

/// Writes every stored record as pretty JSON into the data directory.
async fn export_snapshot(store: &MemoryStore, execution_id: Option<Uuid>) -> Result<PathBuf> {
    let snapshot = store.snapshot().await;
    let directory = logging::get_data_dir();
    tokio::fs::create_dir_all(&directory).await.wrap_err("failed to create the data directory")?;
    let name = execution_id.map(|id| format!("scan-{id}.json")).unwrap_or_else(|| "scan.json".to_string());
    let path = directory.join(name);
    let json = serde_json::to_vec_pretty(&snapshot)?;
    tokio::fs::write(&path, json).await.wrap_err_with(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "Snapshot exported.");
    Ok(path)
}
