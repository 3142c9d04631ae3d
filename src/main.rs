mod backend;
mod ui;

use backend::config::{self, Config};
use backend::error::Result as CatalogueResult;
use backend::favorites::{FavoriteRecord, FavoritesStore};
use backend::prefetch::{FetchOutcome, PrefetchScheduler};
use backend::rawg::{GamePage, GameRecord, RawgClient};
use ui::app::{App, Tab, View};
use ui::ui::ui;

use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use log::{debug, error, info, warn};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::fs::OpenOptions;
use std::sync::Arc;
use std::{error::Error, io};
use tokio::sync::mpsc;

enum BackgroundTask {
    PageLoaded { generation: u64, page: u32, result: CatalogueResult<GamePage> },
    SearchResults { query: String, page: u32, result: CatalogueResult<GamePage> },
    DescriptionLoaded { game_id: i64, result: CatalogueResult<String> },
    FavoriteStatus { game_id: i64, result: CatalogueResult<bool> },
    FavoriteToggled { game_id: i64, result: CatalogueResult<bool> },
    FavoritesLoaded { result: CatalogueResult<Vec<FavoriteRecord>> },
    FavoritesCleared { result: CatalogueResult<u64> },
}

/// Handles the input handlers need to start background work.
struct Services {
    client: Arc<RawgClient>,
    favorites: FavoritesStore,
    tasks: mpsc::UnboundedSender<BackgroundTask>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging()?;
    let config = Config::load()?;
    let client = Arc::new(RawgClient::new(&config)?);
    let favorites = FavoritesStore::open(&config::favorites_db_path()?).await?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BackgroundTask>();
    let (cover_tx, mut cover_rx) = mpsc::unbounded_channel::<FetchOutcome>();

    let scheduler = PrefetchScheduler::new(Arc::clone(&client), cover_tx);
    let mut app = App::new(scheduler, &config);
    let services = Services {
        client,
        favorites,
        tasks: task_tx,
    };

    app.set_loading("Fetching games from RAWG...");
    terminal.draw(|f| ui(f, &mut app))?;

    let generation = app.reload_browse();
    match services.client.list_games(1).await {
        Ok(page) => {
            info!("Loaded {} of {} games", page.games.len(), page.count);
            app.set_browse_page(generation, page, 1);
        }
        Err(e) => {
            error!("Initial catalogue load failed: {}", e);
            app.browse.loading = false;
            app.show_notice("Not found!", format!("Please try again ({})", e));
        }
    }
    app.set_ready();

    let res = run_app(&mut terminal, &mut app, &mut task_rx, &mut cover_rx, &services).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

fn init_logging() -> Result<(), Box<dyn Error>> {
    let path = config::log_path()?;
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

impl Services {
    fn spawn_page_loader(&self, generation: u64, page: u32) {
        let client = Arc::clone(&self.client);
        let tx = self.tasks.clone();
        tokio::spawn(async move {
            let result = client.list_games(page).await;
            let _ = tx.send(BackgroundTask::PageLoaded {
                generation,
                page,
                result,
            });
        });
    }

    fn spawn_search(&self, query: String, page: u32) {
        let client = Arc::clone(&self.client);
        let tx = self.tasks.clone();
        tokio::spawn(async move {
            let result = client.search_games(&query, page).await;
            let _ = tx.send(BackgroundTask::SearchResults { query, page, result });
        });
    }

    fn spawn_description_loader(&self, game_id: i64) {
        let client = Arc::clone(&self.client);
        let tx = self.tasks.clone();
        tokio::spawn(async move {
            let result = client.game_description(game_id).await;
            let _ = tx.send(BackgroundTask::DescriptionLoaded { game_id, result });
        });
    }

    fn spawn_favorite_lookup(&self, game_id: i64) {
        let favorites = self.favorites.clone();
        let tx = self.tasks.clone();
        tokio::spawn(async move {
            let result = favorites.is_favorite(game_id).await;
            let _ = tx.send(BackgroundTask::FavoriteStatus { game_id, result });
        });
    }

    fn spawn_favorite_toggle(&self, game: GameRecord) {
        let favorites = self.favorites.clone();
        let tx = self.tasks.clone();
        tokio::spawn(async move {
            let result = favorites.toggle(&game).await;
            let _ = tx.send(BackgroundTask::FavoriteToggled {
                game_id: game.id,
                result,
            });
        });
    }

    fn spawn_favorites_loader(&self) {
        let favorites = self.favorites.clone();
        let tx = self.tasks.clone();
        tokio::spawn(async move {
            let result = favorites.list_all().await;
            let _ = tx.send(BackgroundTask::FavoritesLoaded { result });
        });
    }

    fn spawn_favorites_clear(&self) {
        let favorites = self.favorites.clone();
        let tx = self.tasks.clone();
        tokio::spawn(async move {
            let result = favorites.delete_all().await;
            let _ = tx.send(BackgroundTask::FavoritesCleared { result });
        });
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    task_rx: &mut mpsc::UnboundedReceiver<BackgroundTask>,
    cover_rx: &mut mpsc::UnboundedReceiver<FetchOutcome>,
    services: &Services,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();

    loop {
        terminal.draw(|f| ui(f, app))?;

        // Rows on screen are known only after drawing.
        app.settle_scroll();
        app.request_visible_covers();

        if app.search_due() {
            app.search_debounce = None;
            if !app.search_query.is_empty() && app.search_query != app.last_search_query {
                start_search(app, services);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(50)) => {}

            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event {
                    if key.kind == KeyEventKind::Press && handle_key(app, key, services) {
                        return Ok(());
                    }
                }
            }

            Some(task) = task_rx.recv() => apply_task(app, task, services),

            Some(outcome) = cover_rx.recv() => app.on_cover_outcome(outcome),
        }
    }
}

fn apply_task(app: &mut App, task: BackgroundTask, services: &Services) {
    match task {
        BackgroundTask::PageLoaded {
            generation,
            page,
            result,
        } => match result {
            Ok(games) => {
                app.set_browse_page(generation, games, page);
            }
            Err(e) if generation == app.browse_generation() => {
                error!("Loading page {} failed: {}", page, e);
                app.browse.loading = false;
                app.show_notice("Not found!", format!("Please try again ({})", e));
            }
            Err(e) => debug!("Ignoring failure of page {} from an earlier load: {}", page, e),
        },
        BackgroundTask::SearchResults { query, page, result } => {
            if query != app.last_search_query {
                debug!("Dropping stale results for {:?}", query);
                return;
            }
            match result {
                Ok(games) => app.set_search_results(games, page),
                Err(e) => {
                    error!("Search for {:?} failed: {}", query, e);
                    app.searching = false;
                    app.search.loading = false;
                    app.show_notice("Not found!", format!("Please try again ({})", e));
                }
            }
        }
        BackgroundTask::DescriptionLoaded { game_id, result } => {
            let description = result.unwrap_or_else(|e| {
                warn!("Description for game {} failed: {}", game_id, e);
                String::new()
            });
            if let Some(detail) = app.detail_for(game_id) {
                detail.description = Some(description);
            }
        }
        BackgroundTask::FavoriteStatus { game_id, result } => match result {
            Ok(is_favorite) => {
                if let Some(detail) = app.detail_for(game_id) {
                    detail.is_favorite = is_favorite;
                }
            }
            Err(e) => warn!("Favorite lookup for game {} failed: {}", game_id, e),
        },
        BackgroundTask::FavoriteToggled { game_id, result } => match result {
            Ok(is_favorite) => {
                info!("Game {} favorite: {}", game_id, is_favorite);
                if let Some(detail) = app.detail_for(game_id) {
                    detail.is_favorite = is_favorite;
                }
                let message = if is_favorite {
                    "Added to favorites"
                } else {
                    "Removed from favorites"
                };
                app.show_notice("Successful", message);
                if app.tab == Tab::Favorites {
                    services.spawn_favorites_loader();
                }
            }
            Err(e) => {
                error!("Toggling favorite {} failed: {}", game_id, e);
                app.show_notice("Favorite failed", e.to_string());
            }
        },
        BackgroundTask::FavoritesLoaded { result } => match result {
            Ok(records) => app.set_favorites(records),
            Err(e) => {
                error!("Loading favorites failed: {}", e);
                app.show_notice("Favorites unavailable", e.to_string());
            }
        },
        BackgroundTask::FavoritesCleared { result } => match result {
            Ok(removed) => {
                info!("Cleared {} favorites", removed);
                app.show_notice("Successful", format!("Removed {} favorites", removed));
                services.spawn_favorites_loader();
            }
            Err(e) => {
                error!("Clearing favorites failed: {}", e);
                app.show_notice("Favorites unavailable", e.to_string());
            }
        },
    }
}

/// Returns `true` when the user asked to quit.
fn handle_key(app: &mut App, key: KeyEvent, services: &Services) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    if app.notice.is_some() {
        if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
            app.notice = None;
        }
        return false;
    }

    match app.view {
        View::Detail => handle_detail_input(app, key.code, services),
        View::List => match app.tab {
            Tab::Search if app.search_editing => {
                handle_search_input(app, key.code, services);
                return false;
            }
            _ => handle_list_input(app, key.code, services),
        },
    }

    key.code == KeyCode::Char('q')
}

fn switch_tab(app: &mut App, tab: Tab, services: &Services) {
    if app.switch_tab(tab) && tab == Tab::Favorites {
        services.spawn_favorites_loader();
    }
}

fn start_search(app: &mut App, services: &Services) {
    app.search_debounce = None;
    app.searching = true;
    app.last_search_query = app.search_query.clone();
    services.spawn_search(app.search_query.clone(), 1);
}

fn load_more(app: &mut App, services: &Services) {
    if !app.active_list().wants_more() {
        return;
    }
    let Some(page) = app.active_list().next_page else {
        return;
    };
    match app.tab {
        Tab::Browse => {
            app.browse.loading = true;
            services.spawn_page_loader(app.browse_generation(), page);
        }
        Tab::Search => {
            app.search.loading = true;
            services.spawn_search(app.last_search_query.clone(), page);
        }
        Tab::Favorites => {}
    }
}

fn handle_list_input(app: &mut App, key: KeyCode, services: &Services) {
    match key {
        KeyCode::Tab => switch_tab(app, app.tab.next(), services),
        KeyCode::BackTab => switch_tab(app, app.tab.prev(), services),
        KeyCode::Down => {
            if app.active_list_mut().select_next() {
                app.begin_scroll();
            }
            load_more(app, services);
        }
        KeyCode::Up => {
            if app.active_list_mut().select_prev() {
                app.begin_scroll();
            } else if app.tab == Tab::Search {
                app.search_editing = true;
            }
        }
        KeyCode::PageDown => {
            let list = app.active_list_mut();
            let mut moved = false;
            for _ in 0..list.visible.max(1) {
                moved |= list.select_next();
            }
            if moved {
                app.begin_scroll();
            }
            load_more(app, services);
        }
        KeyCode::PageUp => {
            let list = app.active_list_mut();
            let mut moved = false;
            for _ in 0..list.visible.max(1) {
                moved |= list.select_prev();
            }
            if moved {
                app.begin_scroll();
            }
        }
        KeyCode::Enter => {
            if let Some(game_id) = app.open_detail() {
                services.spawn_description_loader(game_id);
                services.spawn_favorite_lookup(game_id);
            }
        }
        KeyCode::Char('r') => match app.tab {
            Tab::Browse => {
                let generation = app.reload_browse();
                services.spawn_page_loader(generation, 1);
            }
            Tab::Search => {
                if !app.last_search_query.is_empty() {
                    app.searching = true;
                    services.spawn_search(app.last_search_query.clone(), 1);
                }
            }
            Tab::Favorites => services.spawn_favorites_loader(),
        },
        KeyCode::Char('X') if app.tab == Tab::Favorites => services.spawn_favorites_clear(),
        KeyCode::Char('/') | KeyCode::Esc if app.tab == Tab::Search => {
            app.search_editing = true;
        }
        _ => {}
    }
}

fn handle_search_input(app: &mut App, key: KeyCode, services: &Services) {
    match key {
        KeyCode::Char(c) => {
            app.search_query.push(c);
            app.search_debounce = Some(std::time::Instant::now());
        }
        KeyCode::Backspace => {
            app.search_query.pop();
            if app.search_query.is_empty() {
                app.clear_search();
            } else {
                app.search_debounce = Some(std::time::Instant::now());
            }
        }
        KeyCode::Enter => {
            if !app.search_query.is_empty() {
                start_search(app, services);
            }
        }
        KeyCode::Down => {
            if !app.search.games.is_empty() {
                app.search_editing = false;
            }
        }
        KeyCode::Esc => {
            app.search_query.clear();
            app.clear_search();
        }
        KeyCode::Tab => switch_tab(app, Tab::Favorites, services),
        KeyCode::BackTab => switch_tab(app, Tab::Browse, services),
        _ => {}
    }
}

fn handle_detail_input(app: &mut App, key: KeyCode, services: &Services) {
    let Some(detail) = &app.detail else {
        app.close_detail();
        return;
    };

    match key {
        KeyCode::Esc | KeyCode::Backspace => app.close_detail(),
        KeyCode::Char('f') => services.spawn_favorite_toggle(detail.game.clone()),
        KeyCode::Char('o') => {
            let url = detail.game.web_url();
            if let Err(e) = webbrowser::open(&url) {
                warn!("Could not open {}: {}", url, e);
                app.show_notice("Browser unavailable", format!("Open {} manually", url));
            }
        }
        _ => {}
    }
}
