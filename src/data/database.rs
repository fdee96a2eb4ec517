//! SQLite database operations
//!
//! All database access goes through this module.
//! The schema is reconciled on connect from the embedded migrations.

use chrono::Utc;
use sqlx::{Pool, QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;
use crate::metrics::{DB_QUERIES_TOTAL, DB_QUERY_DURATION_SECONDS, POSTS_TOTAL};

const POST_COLUMNS: &str = "id, title, content, created_at, updated_at";

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

fn observe(operation: &str) -> prometheus::HistogramTimer {
    DB_QUERIES_TOTAL
        .with_label_values(&[operation, "posts"])
        .inc();
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation, "posts"])
        .start_timer()
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &PostQuery) {
    builder.push(" WHERE 1 = 1");

    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        builder
            .push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR content LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }

    if let Some(title) = &query.title {
        builder.push(" AND title = ").push_bind(title.clone());
    }

    if let Some(content) = &query.content {
        builder.push(" AND content = ").push_bind(content.clone());
    }
}

impl Database {
    /// Connect to database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            AppError::from(e)
        })?;

        let database = Self { pool };
        POSTS_TOTAL.set(database.count_posts(&PostQuery::default()).await?);

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(database)
    }

    // =========================================================================
    // Posts
    // =========================================================================

    /// List posts within the query window
    pub async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>, AppError> {
        let timer = observe("select");

        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {POST_COLUMNS} FROM posts"));
        push_filters(&mut builder, query);

        builder.push(" ORDER BY ");
        for key in &query.sort {
            builder.push(key.field.column());
            builder.push(if key.descending { " DESC, " } else { " ASC, " });
        }
        // id keeps the order stable across pages
        builder.push("id ASC");

        builder
            .push(" LIMIT ")
            .push_bind(query.count)
            .push(" OFFSET ")
            .push_bind(query.offset);

        let posts = builder
            .build_query_as::<Post>()
            .fetch_all(&self.pool)
            .await?;
        timer.observe_duration();

        Ok(posts)
    }

    /// Count posts matching the query filters (window ignored)
    pub async fn count_posts(&self, query: &PostQuery) -> Result<i64, AppError> {
        let timer = observe("count");

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM posts");
        push_filters(&mut builder, query);

        let total = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        timer.observe_duration();

        Ok(total)
    }

    /// Get post by ID
    pub async fn get_post(&self, id: i64) -> Result<Option<Post>, AppError> {
        let timer = observe("select");
        let post = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        timer.observe_duration();

        Ok(post)
    }

    /// Insert a new post and return the stored row
    pub async fn insert_post(&self, new_post: &NewPost) -> Result<Post, AppError> {
        let timer = observe("insert");
        let now = Utc::now();

        let post = sqlx::query_as::<_, Post>(&format!(
            r#"
            INSERT INTO posts (title, content, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(&new_post.title)
        .bind(&new_post.content)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        timer.observe_duration();

        POSTS_TOTAL.inc();
        Ok(post)
    }

    /// Update a post
    ///
    /// Returns `None` if the post does not exist. Only the attributes present
    /// in `changes` are written, in a single statement, so concurrent updates
    /// of different attributes never overwrite each other. `updated_at` only
    /// moves when an attribute actually changed.
    pub async fn update_post(
        &self,
        id: i64,
        changes: &PostChanges,
    ) -> Result<Option<Post>, AppError> {
        if changes.is_empty() {
            return self.get_post(id).await;
        }

        let timer = observe("update");
        let (set_title, title) = match &changes.title {
            Some(title) => (true, title.clone()),
            None => (false, None),
        };
        let (set_content, content) = match &changes.content {
            Some(content) => (true, content.clone()),
            None => (false, None),
        };

        let post = sqlx::query_as::<_, Post>(&format!(
            r#"
            UPDATE posts SET
                title = CASE WHEN ?1 THEN ?2 ELSE title END,
                content = CASE WHEN ?3 THEN ?4 ELSE content END,
                updated_at = CASE
                    WHEN (?1 AND title IS NOT ?2) OR (?3 AND content IS NOT ?4) THEN ?5
                    ELSE updated_at
                END
            WHERE id = ?6
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(set_title)
        .bind(title)
        .bind(set_content)
        .bind(content)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        timer.observe_duration();

        Ok(post)
    }

    /// Delete a post, returning whether a row was removed
    pub async fn delete_post(&self, id: i64) -> Result<bool, AppError> {
        let timer = observe("delete");
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        timer.observe_duration();

        let deleted = result.rows_affected() == 1;
        if deleted {
            POSTS_TOTAL.dec();
        }
        Ok(deleted)
    }
}
