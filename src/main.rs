mod api;
mod app;
mod config;
mod constants;
mod kit;
mod theme;
mod ui;
mod write;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{ApiClient, FileField, FormValue, Method};
use app::App;
use config::{AppConfig, Page};
use write::{ConfirmedWrite, WriteRequest};

#[derive(Parser, Debug)]
#[command(name = "ch2-tui")]
#[command(version)]
#[command(about = "Edit ch2 constants and browse kit statistics from the terminal")]
struct Args {
    /// Base URL of the ch2 web server (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// Page to open
    #[arg(short, long, value_enum)]
    page: Option<Page>,

    /// Print a page's data as JSON and exit
    #[arg(long, value_enum)]
    dump: Option<Page>,

    /// CSRF token to send with writes (normally read from the server's cookie)
    #[arg(long)]
    csrf_token: Option<String>,

    /// Upload activity files (asks for confirmation first)
    #[arg(long, num_args = 1..)]
    upload: Vec<PathBuf>,

    /// Kit items to associate with uploaded files
    #[arg(long, num_args = 1.., requires = "upload")]
    kit: Vec<String>,

    /// Answer yes to the upload confirmation
    #[arg(short, long, requires = "upload")]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let interactive = args.dump.is_none() && args.upload.is_empty();

    init_logging(interactive);

    let config = AppConfig::load().unwrap_or_default();
    let server = args.server.clone().unwrap_or_else(|| config.server.clone());
    let csrf_token = args.csrf_token.clone().or_else(|| config.csrf_token.clone());
    let client = ApiClient::new(&server, csrf_token, config.timeout())?;

    // Handle CLI-only commands
    if let Some(page) = args.dump {
        return dump(&client, page).await;
    }

    if !args.upload.is_empty() {
        return upload(&client, &args.upload, &args.kit, args.yes).await;
    }

    ui::init_theme(theme::Theme::from_config(&config.theme));
    run_tui(client, args.page.unwrap_or(config.default_page)).await
}

/// Log to stderr for CLI commands; to a file while the TUI owns the terminal
fn init_logging(interactive: bool) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env());

    if interactive {
        if let Some(file) = log_file() {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        return;
    }

    registry
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn log_file() -> Option<std::fs::File> {
    let dir = dirs::data_local_dir()?.join("ch2-tui");
    std::fs::create_dir_all(&dir).ok()?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("ch2-tui.log"))
        .ok()
}

async fn dump(client: &ApiClient, page: Page) -> Result<()> {
    let output = match page {
        Page::Constants => {
            let list: Vec<constants::Constant> = client.get_json(constants::CONSTANTS_URL).await?;
            let list = constants::annotate_all(list);
            serde_json::to_string_pretty(&list)?
        }
        Page::Kit => {
            let groups: Vec<kit::Group> = client.get_json(kit::STATISTICS_URL).await?;
            let today = kit::today();
            kit::lines(&groups, today)
                .into_iter()
                .map(|line| match line {
                    kit::Line::Heading(s) => s,
                    kit::Line::Subheading(s) => format!("  {}", s),
                    kit::Line::Age(s) | kit::Line::Statistic(s) => format!("    {}", s),
                    kit::Line::Blank => String::new(),
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    };
    println!("{}", output);
    Ok(())
}

/// Outcome of a command-line write
#[derive(Debug, Default)]
struct UploadResult {
    data: Option<serde_json::Value>,
    error: Option<api::ApiError>,
}

async fn upload(client: &ApiClient, paths: &[PathBuf], kit: &[String], yes: bool) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(FileField::from_path(path).await?);
    }
    let names: Vec<String> = files.iter().map(|f| f.file_name.clone()).collect();

    let mut form = vec![("files".to_string(), FormValue::from(files))];
    if !kit.is_empty() {
        form.push(("kit".to_string(), FormValue::from(kit.to_vec())));
    }

    let mut control: ConfirmedWrite<UploadResult> =
        ConfirmedWrite::new("Upload", WriteRequest::new("/api/upload").method(Method::Post).form(form))
            .prompt(format!("Upload {} to the server?", names.join(", ")))
            .on_data(|result: &mut UploadResult, data| result.data = Some(data))
            .on_error(|result: &mut UploadResult, error| result.error = Some(error));

    control.trigger();
    if !yes && !ask(control.prompt_text())? {
        control.cancel();
        println!("Cancelled");
        return Ok(());
    }

    eprintln!("Please wait. Writing data.");
    let mut result = UploadResult::default();
    control.run(client, &mut result).await;

    match (result.data, result.error) {
        (_, Some(error)) => Err(error).context("Upload failed"),
        (data, None) => {
            if let Some(data) = data.filter(|d| !d.is_null()) {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
            Ok(())
        }
    }
}

fn ask(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn run_tui(client: ApiClient, page: Page) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = match App::new(client, page).await {
        Ok(mut app) => run_app(&mut terminal, &mut app).await,
        Err(e) => Err(e),
    };

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') if app.can_quit() => return Ok(()),
                        KeyCode::Char('c') if key.modifiers.contains(event::KeyModifiers::CONTROL) => {
                            if app.is_waiting() {
                                tracing::warn!("Quitting with a write still in flight");
                            }
                            return Ok(());
                        }
                        _ => {
                            // Handle key and catch any errors to prevent crashes
                            if let Err(e) = app.handle_key(key).await {
                                app.error_message = Some(format!("{:#}", e));
                            }
                        }
                    }
                }
            }
        }

        // Deliver settled writes
        let _ = app.tick().await;
    }
}
