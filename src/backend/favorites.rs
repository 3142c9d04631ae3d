use log::info;
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

use super::error::Result;
use super::rawg::{DownloadState, GameRecord};

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct FavoriteRecord {
    pub id: i64,
    pub name: String,
    pub released: String,
    pub image_url: String,
    pub rating: f64,
    pub image: Vec<u8>,
}

impl From<&GameRecord> for FavoriteRecord {
    fn from(game: &GameRecord) -> Self {
        FavoriteRecord {
            id: game.id,
            name: game.name.clone(),
            released: game.released.clone(),
            image_url: game.cover_url.clone(),
            rating: game.rating,
            image: game.image.clone().unwrap_or_default(),
        }
    }
}

impl From<&FavoriteRecord> for GameRecord {
    fn from(fav: &FavoriteRecord) -> Self {
        let (image, state) = if fav.image.is_empty() {
            (None, DownloadState::Failed)
        } else {
            (Some(fav.image.clone()), DownloadState::Loaded)
        };

        GameRecord {
            id: fav.id,
            slug: String::new(),
            name: fav.name.clone(),
            released: fav.released.clone(),
            cover_url: fav.image_url.clone(),
            rating: fav.rating,
            image,
            state,
        }
    }
}

/// Favorited games kept in a local SQLite database.
#[derive(Clone)]
pub struct FavoritesStore {
    pool: SqlitePool,
}

impl FavoritesStore {
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening favorites at {:?}", path);
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        use std::str::FromStr;

        // one connection, or every pooled connection would see its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS favorites (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id INTEGER NOT NULL UNIQUE,
                name TEXT NOT NULL,
                released TEXT NOT NULL,
                image_url TEXT NOT NULL,
                rating REAL NOT NULL,
                image BLOB NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn list_all(&self) -> Result<Vec<FavoriteRecord>> {
        let records = sqlx::query_as::<_, FavoriteRecord>(
            "SELECT id, name, released, image_url, rating, image FROM favorites ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn get(&self, id: i64) -> Result<Option<FavoriteRecord>> {
        let record = sqlx::query_as::<_, FavoriteRecord>(
            "SELECT id, name, released, image_url, rating, image FROM favorites WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Insert a favorite. A stored copy with the same id is updated in place
    /// and keeps its position in [`list_all`](Self::list_all).
    pub async fn create(&self, record: &FavoriteRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO favorites (id, name, released, image_url, rating, image)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                released = excluded.released,
                image_url = excluded.image_url,
                rating = excluded.rating,
                image = excluded.image",
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(&record.released)
        .bind(&record.image_url)
        .bind(record.rating)
        .bind(&record.image)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns whether a favorite was actually removed.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM favorites WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM favorites")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn is_favorite(&self, id: i64) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Flip the favorite status of `game`, returning the new status.
    pub async fn toggle(&self, game: &GameRecord) -> Result<bool> {
        if self.delete(game.id).await? {
            Ok(false)
        } else {
            self.create(&FavoriteRecord::from(game)).await?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(id: i64, image: Option<Vec<u8>>) -> GameRecord {
        GameRecord {
            id,
            slug: "portal-2".to_string(),
            name: "Portal 2".to_string(),
            released: "2011-04-18".to_string(),
            cover_url: "https://media.rawg.io/portal2.jpg".to_string(),
            rating: 4.61,
            state: if image.is_some() {
                DownloadState::Loaded
            } else {
                DownloadState::Pending
            },
            image,
        }
    }

    #[tokio::test]
    async fn create_get_and_list() {
        let store = FavoritesStore::in_memory().await.unwrap();
        let first = FavoriteRecord::from(&game(4200, Some(vec![1, 2, 3])));
        let second = FavoriteRecord::from(&game(13, None));

        store.create(&first).await.unwrap();
        store.create(&second).await.unwrap();

        assert_eq!(store.get(4200).await.unwrap(), Some(first.clone()));
        assert_eq!(store.get(1).await.unwrap(), None);
        assert_eq!(store.list_all().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn create_replaces_existing_id() {
        let store = FavoritesStore::in_memory().await.unwrap();
        let mut record = FavoriteRecord::from(&game(7, None));
        store.create(&record).await.unwrap();

        record.image = vec![9; 4];
        store.create(&record).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].image, vec![9; 4]);
    }

    #[tokio::test]
    async fn list_follows_insertion_order_not_game_id() {
        let store = FavoritesStore::in_memory().await.unwrap();
        for id in [4200, 13, 980] {
            store.create(&FavoriteRecord::from(&game(id, None))).await.unwrap();
        }

        let mut updated = FavoriteRecord::from(&game(4200, Some(vec![3; 6])));
        updated.name = "Portal 2: Remastered".to_string();
        store.create(&updated).await.unwrap();

        let all = store.list_all().await.unwrap();
        let ids: Vec<i64> = all.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![4200, 13, 980]);
        assert_eq!(all[0], updated);
    }

    #[tokio::test]
    async fn refavorited_game_moves_to_the_end() {
        let store = FavoritesStore::in_memory().await.unwrap();
        let portal = game(4200, None);
        store.toggle(&portal).await.unwrap();
        store.toggle(&game(13, None)).await.unwrap();

        assert!(!store.toggle(&portal).await.unwrap());
        assert!(store.toggle(&portal).await.unwrap());

        let ids: Vec<i64> = store.list_all().await.unwrap().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![13, 4200]);
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let store = FavoritesStore::in_memory().await.unwrap();
        store.create(&FavoriteRecord::from(&game(1, None))).await.unwrap();

        assert!(store.delete(1).await.unwrap());
        assert!(!store.delete(1).await.unwrap());
        assert!(!store.is_favorite(1).await.unwrap());
    }

    #[tokio::test]
    async fn delete_all_clears_everything() {
        let store = FavoritesStore::in_memory().await.unwrap();
        for id in 1..=3 {
            store.create(&FavoriteRecord::from(&game(id, None))).await.unwrap();
        }

        assert_eq!(store.delete_all().await.unwrap(), 3);
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn toggle_flips_status() {
        let store = FavoritesStore::in_memory().await.unwrap();
        let portal = game(4200, Some(vec![5; 8]));

        assert!(store.toggle(&portal).await.unwrap());
        assert!(store.is_favorite(4200).await.unwrap());
        assert!(!store.toggle(&portal).await.unwrap());
        assert!(!store.is_favorite(4200).await.unwrap());
    }

    #[test]
    fn favorite_converts_back_to_resolved_record() {
        let with_image = GameRecord::from(&FavoriteRecord::from(&game(1, Some(vec![1]))));
        assert_eq!(with_image.state, DownloadState::Loaded);
        assert_eq!(with_image.image, Some(vec![1]));

        let without_image = GameRecord::from(&FavoriteRecord::from(&game(2, None)));
        assert_eq!(without_image.state, DownloadState::Failed);
        assert!(without_image.image.is_none());
        assert_eq!(without_image.cover_url, "https://media.rawg.io/portal2.jpg");
    }
}
