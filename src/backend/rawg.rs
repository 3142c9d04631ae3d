use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::config::Config;
use super::error::{CatalogueError, Result};
use super::prefetch::ImageFetcher;

/// Games requested per catalogue page.
pub const PAGE_SIZE: u32 = 10;

const WEB_BASE_URL: &str = "https://rawg.io/games";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadState {
    #[default]
    Pending,
    Loaded,
    Failed,
}

/// A game as shown in a list row. `image` and `state` are filled in by the
/// prefetch scheduler once the cover has been fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub released: String,
    pub cover_url: String,
    pub rating: f64,
    pub image: Option<Vec<u8>>,
    pub state: DownloadState,
}

impl GameRecord {
    pub fn web_url(&self) -> String {
        if self.slug.is_empty() {
            format!("{}/{}", WEB_BASE_URL, self.id)
        } else {
            format!("{}/{}", WEB_BASE_URL, self.slug)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GamePage {
    pub games: Vec<GameRecord>,
    /// Total number of matches reported by the API, across all pages.
    pub count: u64,
    pub has_next: bool,
}

#[derive(Debug, Deserialize)]
struct GamesResponse {
    count: u64,
    next: Option<String>,
    results: Vec<GameData>,
}

#[derive(Debug, Deserialize)]
struct GameData {
    id: i64,
    #[serde(default)]
    slug: String,
    name: String,
    released: Option<String>,
    background_image: Option<String>,
    rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GameDetailResponse {
    description_raw: Option<String>,
}

fn parse_game_page(response: GamesResponse) -> GamePage {
    let games = response
        .results
        .into_iter()
        .map(|g| GameRecord {
            id: g.id,
            slug: g.slug,
            name: g.name,
            released: g.released.unwrap_or_default(),
            cover_url: g.background_image.unwrap_or_default(),
            rating: g.rating.unwrap_or_default(),
            image: None,
            state: DownloadState::Pending,
        })
        .collect();

    GamePage {
        games,
        count: response.count,
        has_next: response.next.is_some(),
    }
}

#[derive(Debug, Clone)]
pub struct RawgClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RawgClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("game-catalogue-tui/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub async fn list_games(&self, page: u32) -> Result<GamePage> {
        let response: GamesResponse = self.get_json(&self.games_url(page, None)).await?;
        Ok(parse_game_page(response))
    }

    pub async fn search_games(&self, query: &str, page: u32) -> Result<GamePage> {
        let response: GamesResponse = self.get_json(&self.games_url(page, Some(query))).await?;
        Ok(parse_game_page(response))
    }

    pub async fn game_description(&self, id: i64) -> Result<String> {
        let mut url = format!("{}/games/{}", self.base_url, id);
        if let Some(key) = &self.api_key {
            url.push_str(&format!("?key={}", urlencoding::encode(key)));
        }
        let detail: GameDetailResponse = self.get_json(&url).await?;
        Ok(detail.description_raw.unwrap_or_default())
    }

    fn games_url(&self, page: u32, search: Option<&str>) -> String {
        let mut url = format!(
            "{}/games?page_size={}&page={}",
            self.base_url,
            PAGE_SIZE,
            page.max(1)
        );
        if let Some(query) = search {
            url.push_str(&format!("&search={}", urlencoding::encode(query)));
        }
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&key={}", urlencoding::encode(key)));
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.get_bytes(url).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogueError::Status(status));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl ImageFetcher for RawgClient {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        if url.is_empty() {
            return Err(CatalogueError::InvalidUrl(url.to_string()));
        }
        self.get_bytes(url).await
    }
}
