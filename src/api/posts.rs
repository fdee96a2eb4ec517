//! Posts resource
//!
//! List/create on `/posts`, read/update/delete on `/posts/:id`.
//! Every route sits behind [`require_session`], so an anonymous caller gets
//! a 401 before any query runs.

use axum::{
    Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::auth::{CurrentUser, require_session};
use crate::data::{NewPost, Post, PostChanges, PostQuery, SortKey};
use crate::error::AppError;

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1000;

/// Create posts router
///
/// Routes:
/// - GET /posts - List posts
/// - POST /posts - Create post
/// - GET /posts/:id - Get post
/// - PUT /posts/:id - Update post
/// - DELETE /posts/:id - Delete post
pub fn posts_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route(
            "/posts/:id",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route_layer(middleware::from_fn_with_state(state, require_session))
}

/// List query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub offset: Option<i64>,
    pub count: Option<i64>,
    /// Comma-separated attributes, `-` prefix for descending
    pub sort: Option<String>,
    /// Substring search across title and content
    pub q: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
}

impl ListParams {
    fn into_query(self) -> Result<PostQuery, AppError> {
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::Validation(
                "offset must not be negative".to_string(),
            ));
        }

        let count = self.count.unwrap_or(DEFAULT_PAGE_SIZE);
        if count < 0 {
            return Err(AppError::Validation("count must not be negative".to_string()));
        }

        let sort = match self.sort.as_deref() {
            Some(raw) => SortKey::parse_list(raw)?,
            None => Vec::new(),
        };

        Ok(PostQuery {
            offset,
            count: count.min(MAX_PAGE_SIZE),
            sort,
            search: self.q,
            title: self.title,
            content: self.content,
        })
    }
}

/// `Content-Range` value describing the returned window
///
/// An empty window has no first or last item, so it is written `items */total`.
fn content_range(offset: i64, returned: usize, total: i64) -> String {
    if returned == 0 {
        return format!("items */{total}");
    }
    let last = offset + returned as i64 - 1;
    format!("items {offset}-{last}/{total}")
}

fn parse_id(id: Result<Path<i64>, PathRejection>) -> Result<i64, AppError> {
    id.map(|Path(id)| id)
        .map_err(|_| AppError::Validation("post id must be an integer".to_string()))
}

/// GET /posts
async fn list_posts(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Query(params) = params.map_err(|e| AppError::Validation(e.body_text()))?;
    let query = params.into_query()?;

    let posts = state.db.list_posts(&query).await?;
    let total = state.db.count_posts(&query).await?;

    let mut headers = HeaderMap::new();
    let range = content_range(query.offset, posts.len(), total);
    headers.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&range).map_err(|e| AppError::Internal(e.into()))?,
    );

    Ok((headers, Json(posts)))
}

/// POST /posts
async fn create_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<NewPost>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(new_post) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    let post = state.db.insert_post(&new_post).await?;
    tracing::info!(post_id = post.id, subject = %user.subject, "Post created");

    let location = HeaderValue::from_str(&format!("/posts/{}", post.id))
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(post)))
}

/// GET /posts/:id
async fn get_post(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Post>, AppError> {
    let id = parse_id(id)?;
    let post = state.db.get_post(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(post))
}

/// PUT /posts/:id
///
/// Only the attributes present in the body change.
async fn update_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<PostChanges>, JsonRejection>,
) -> Result<Json<Post>, AppError> {
    let id = parse_id(id)?;
    let Json(changes) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    let post = state
        .db
        .update_post(id, &changes)
        .await?
        .ok_or(AppError::NotFound)?;
    tracing::info!(post_id = post.id, subject = %user.subject, "Post updated");

    Ok(Json(post))
}

/// DELETE /posts/:id
async fn delete_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(id)?;

    if !state.db.delete_post(id).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!(post_id = id, subject = %user.subject, "Post deleted");

    Ok(Json(serde_json::json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_describes_window() {
        assert_eq!(content_range(0, 3, 10), "items 0-2/10");
        assert_eq!(content_range(5, 5, 10), "items 5-9/10");
        assert_eq!(content_range(0, 0, 0), "items */0");
        assert_eq!(content_range(20, 0, 5), "items */5");
    }

    #[test]
    fn list_params_default_and_clamp() {
        let query = ListParams::default().into_query().unwrap();
        assert_eq!(query.offset, 0);
        assert_eq!(query.count, DEFAULT_PAGE_SIZE);

        let query = ListParams {
            count: Some(50_000),
            ..ListParams::default()
        }
        .into_query()
        .unwrap();
        assert_eq!(query.count, MAX_PAGE_SIZE);
    }

    #[test]
    fn list_params_reject_negative_window_and_bad_sort() {
        let negative = ListParams {
            offset: Some(-1),
            ..ListParams::default()
        };
        assert!(matches!(
            negative.into_query(),
            Err(AppError::Validation(_))
        ));

        let bad_sort = ListParams {
            sort: Some("password".to_string()),
            ..ListParams::default()
        };
        assert!(matches!(
            bad_sort.into_query(),
            Err(AppError::Validation(_))
        ));
    }
}
