use image::DynamicImage;
use log::debug;
use ratatui_image::{picker::Picker, protocol::StatefulProtocol};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::ops::Range;
use std::time::{Duration, Instant};

use crate::backend::config::Config;
use crate::backend::favorites::FavoriteRecord;
use crate::backend::prefetch::{FetchOutcome, ImageFetcher, PrefetchScheduler};
use crate::backend::rawg::{GamePage, GameRecord, RawgClient};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum Tab {
    #[default]
    Browse,
    Search,
    Favorites,
}

impl Tab {
    pub fn next(self) -> Self {
        match self {
            Tab::Browse => Tab::Search,
            Tab::Search => Tab::Favorites,
            Tab::Favorites => Tab::Browse,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Tab::Browse => Tab::Favorites,
            Tab::Search => Tab::Browse,
            Tab::Favorites => Tab::Search,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    List,
    Detail,
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Loading,
    Ready,
}

/// One scrollable list of games plus its paging state.
#[derive(Debug, Default)]
pub struct GameList {
    pub games: Vec<GameRecord>,
    pub selected: usize,
    pub offset: usize,
    /// Rows that fit on screen, updated every frame.
    pub visible: usize,
    pub total: u64,
    pub next_page: Option<u32>,
    pub loading: bool,
}

impl GameList {
    pub fn replace(&mut self, page: GamePage, page_no: u32) {
        self.games = page.games;
        self.selected = 0;
        self.offset = 0;
        self.total = page.count;
        self.next_page = page.has_next.then_some(page_no + 1);
        self.loading = false;
    }

    /// Existing rows keep their positions, so downloads in flight stay valid.
    pub fn append(&mut self, page: GamePage, page_no: u32) {
        self.games.extend(page.games);
        self.total = page.count;
        self.next_page = page.has_next.then_some(page_no + 1);
        self.loading = false;
    }

    pub fn clear(&mut self) {
        *self = GameList {
            visible: self.visible,
            ..GameList::default()
        };
    }

    pub fn selected_game(&self) -> Option<&GameRecord> {
        self.games.get(self.selected)
    }

    pub fn select_next(&mut self) -> bool {
        if self.selected + 1 < self.games.len() {
            self.selected += 1;
            self.scroll_into_view();
            true
        } else {
            false
        }
    }

    pub fn select_prev(&mut self) -> bool {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_into_view();
            true
        } else {
            false
        }
    }

    pub fn scroll_into_view(&mut self) {
        let visible = self.visible.max(1);
        if self.selected < self.offset {
            self.offset = self.selected;
        } else if self.selected >= self.offset + visible {
            self.offset = self.selected + 1 - visible;
        }
    }

    pub fn visible_rows(&self) -> Range<usize> {
        let end = (self.offset + self.visible).min(self.games.len());
        self.offset.min(end)..end
    }

    /// Whether the cursor sits on the last row and another page exists.
    pub fn wants_more(&self) -> bool {
        !self.loading
            && self.next_page.is_some()
            && self.selected + 1 >= self.games.len()
    }
}

pub struct Detail {
    pub game: GameRecord,
    /// `None` while the description is still being fetched.
    pub description: Option<String>,
    pub is_favorite: bool,
}

pub struct Notice {
    pub title: String,
    pub message: String,
}

pub struct App<F = RawgClient> {
    pub state: AppState,
    pub loading_message: String,
    pub tab: Tab,
    pub view: View,
    pub browse: GameList,
    pub search: GameList,
    pub favorites: GameList,
    pub search_query: String,
    pub last_search_query: String,
    pub search_editing: bool,
    pub search_debounce: Option<Instant>,
    pub searching: bool,
    pub detail: Option<Detail>,
    pub notice: Option<Notice>,
    pub picker: Option<Picker>,
    pub covers: HashMap<i64, StatefulProtocol>,
    scheduler: PrefetchScheduler<F>,
    /// Bumped whenever Browse reloads from page 1; older page results are dropped.
    browse_generation: u64,
    last_scroll: Option<Instant>,
    scroll_settle: Duration,
    search_delay: Duration,
}

impl<F: ImageFetcher> App<F> {
    pub fn new(scheduler: PrefetchScheduler<F>, config: &Config) -> Self {
        Self::with_picker(scheduler, config, Picker::from_query_stdio().ok())
    }

    pub fn with_picker(
        scheduler: PrefetchScheduler<F>,
        config: &Config,
        picker: Option<Picker>,
    ) -> Self {
        Self {
            state: AppState::Loading,
            loading_message: "Initializing...".to_string(),
            tab: Tab::Browse,
            view: View::List,
            browse: GameList::default(),
            search: GameList::default(),
            favorites: GameList::default(),
            search_query: String::new(),
            last_search_query: String::new(),
            search_editing: true,
            search_debounce: None,
            searching: false,
            detail: None,
            notice: None,
            picker,
            covers: HashMap::new(),
            scheduler,
            browse_generation: 0,
            last_scroll: None,
            scroll_settle: config.scroll_settle(),
            search_delay: config.search_debounce(),
        }
    }

    pub fn set_loading(&mut self, message: &str) {
        self.state = AppState::Loading;
        self.loading_message = message.to_string();
    }

    pub fn set_ready(&mut self) {
        self.state = AppState::Ready;
    }

    pub fn show_notice(&mut self, title: &str, message: impl Into<String>) {
        self.notice = Some(Notice {
            title: title.to_string(),
            message: message.into(),
        });
    }

    pub fn active_list(&self) -> &GameList {
        match self.tab {
            Tab::Browse => &self.browse,
            Tab::Search => &self.search,
            Tab::Favorites => &self.favorites,
        }
    }

    pub fn active_list_mut(&mut self) -> &mut GameList {
        match self.tab {
            Tab::Browse => &mut self.browse,
            Tab::Search => &mut self.search,
            Tab::Favorites => &mut self.favorites,
        }
    }

    /// Switch tabs. Downloads for the list being left are cancelled so the
    /// scheduler only ever serves the list on screen.
    pub fn switch_tab(&mut self, tab: Tab) -> bool {
        if tab == self.tab {
            return false;
        }
        self.scheduler.cancel_all();
        self.end_scroll();
        self.tab = tab;
        self.search_editing = tab == Tab::Search && self.search.games.is_empty();
        true
    }

    pub fn begin_scroll(&mut self) {
        self.scheduler.suspend();
        self.last_scroll = Some(Instant::now());
    }

    fn end_scroll(&mut self) {
        self.last_scroll = None;
        self.scheduler.resume();
    }

    pub fn is_scrolling(&self) -> bool {
        self.scheduler.is_suspended()
    }

    /// Resume downloads once no scroll key has arrived for the settle period.
    pub fn settle_scroll(&mut self) {
        if let Some(at) = self.last_scroll {
            if at.elapsed() >= self.scroll_settle {
                debug!(
                    "Scroll settled, resuming covers ({} queued, {} in flight)",
                    self.scheduler.queued(),
                    self.scheduler.in_flight()
                );
                self.end_scroll();
            }
        }
    }

    /// Ask for covers of every row currently on screen.
    pub fn request_visible_covers(&mut self) {
        if self.is_scrolling() || self.view != View::List || self.state != AppState::Ready {
            return;
        }
        let list = match self.tab {
            Tab::Browse => &self.browse,
            Tab::Search => &self.search,
            Tab::Favorites => return,
        };
        let rows = list.visible_rows();
        self.scheduler.cancel_outside(rows.clone());
        for row in rows {
            self.scheduler.ensure_loading(row, &list.games[row]);
        }
    }

    /// Covers queued or downloading for the list on screen.
    pub fn covers_loading(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Outcomes always apply to the list on screen; downloads for other tabs
    /// were cancelled when the tab changed.
    pub fn on_cover_outcome(&mut self, outcome: FetchOutcome) {
        let list = match self.tab {
            Tab::Browse => &mut self.browse,
            Tab::Search => &mut self.search,
            Tab::Favorites => &mut self.favorites,
        };
        if let Some(row) = self.scheduler.complete(outcome, &mut list.games) {
            self.refresh_row(row);
        }
    }

    /// Rebuild the thumbnail of a single row after its download resolved.
    fn refresh_row(&mut self, row: usize) {
        let Some(game) = self.active_list().games.get(row).cloned() else {
            return;
        };
        if let Some(bytes) = &game.image {
            self.add_cover(game.id, bytes);
        }
        if let Some(detail) = self.detail.as_mut().filter(|d| d.game.id == game.id) {
            detail.game.image = game.image;
            detail.game.state = game.state;
        }
    }

    fn add_cover(&mut self, game_id: i64, bytes: &[u8]) {
        let Some(picker) = &self.picker else {
            return;
        };
        match decode_cover(bytes) {
            Some(image) => {
                let protocol = picker.new_resize_protocol(image);
                self.covers.insert(game_id, protocol);
            }
            None => debug!("Cover for game {} is not a decodable image", game_id),
        }
    }

    /// Drop thumbnails of games no longer shown in any list or the detail view.
    fn prune_covers(&mut self) {
        let live: HashSet<i64> = [&self.browse, &self.search, &self.favorites]
            .into_iter()
            .flat_map(|list| list.games.iter().map(|g| g.id))
            .chain(self.detail.as_ref().map(|d| d.game.id))
            .collect();
        let before = self.covers.len();
        self.covers.retain(|id, _| live.contains(id));
        if self.covers.len() < before {
            debug!("Dropped {} unused covers", before - self.covers.len());
        }
    }

    /// Start a Browse load from page 1, returning the generation to tag it with.
    pub fn reload_browse(&mut self) -> u64 {
        self.browse_generation += 1;
        self.browse.loading = true;
        self.browse_generation
    }

    pub fn browse_generation(&self) -> u64 {
        self.browse_generation
    }

    /// Apply a Browse page. Returns `false` when the page belongs to an
    /// earlier load and was dropped.
    pub fn set_browse_page(&mut self, generation: u64, page: GamePage, page_no: u32) -> bool {
        if generation != self.browse_generation {
            debug!(
                "Dropping page {} of load {} (current load {})",
                page_no, generation, self.browse_generation
            );
            return false;
        }
        if page_no <= 1 {
            if self.tab == Tab::Browse {
                self.scheduler.cancel_all();
            }
            self.browse.replace(page, page_no);
            self.prune_covers();
        } else {
            self.browse.append(page, page_no);
        }
        true
    }

    pub fn set_search_results(&mut self, page: GamePage, page_no: u32) {
        self.searching = false;
        if page_no <= 1 {
            if self.tab == Tab::Search {
                self.scheduler.cancel_all();
            }
            self.search.replace(page, page_no);
            self.prune_covers();
        } else {
            self.search.append(page, page_no);
        }
    }

    pub fn clear_search(&mut self) {
        if self.tab == Tab::Search {
            self.scheduler.cancel_all();
        }
        self.search.clear();
        self.last_search_query.clear();
        self.search_debounce = None;
        self.prune_covers();
    }

    pub fn search_due(&self) -> bool {
        self.search_debounce
            .is_some_and(|at| at.elapsed() >= self.search_delay)
    }

    pub fn set_favorites(&mut self, records: Vec<FavoriteRecord>) {
        let count = records.len() as u64;
        self.favorites.replace(
            GamePage {
                games: records.iter().map(GameRecord::from).collect(),
                count,
                has_next: false,
            },
            1,
        );
        self.prune_covers();
        for record in &records {
            if !record.image.is_empty() {
                self.add_cover(record.id, &record.image);
            }
        }
    }

    /// Open the detail view for the selected row, returning the game id.
    pub fn open_detail(&mut self) -> Option<i64> {
        let game = self.active_list().selected_game()?.clone();
        let id = game.id;
        self.detail = Some(Detail {
            game,
            description: None,
            is_favorite: false,
        });
        self.view = View::Detail;
        Some(id)
    }

    pub fn close_detail(&mut self) {
        self.detail = None;
        self.view = View::List;
        self.prune_covers();
    }

    pub fn detail_for(&mut self, game_id: i64) -> Option<&mut Detail> {
        self.detail.as_mut().filter(|d| d.game.id == game_id)
    }
}

pub fn decode_cover(bytes: &[u8]) -> Option<DynamicImage> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()
}
