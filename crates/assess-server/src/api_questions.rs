use crate::api::{with_conn, ApiError};
use crate::AppState;
use assess_types::Question;
use axum::extract::{Extension, Json};
use std::sync::Arc;

/// Handler for `GET /api/questions`: the active questions in asking order.
pub async fn list_questions_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Question>>, ApiError> {
    let questions =
        with_conn(&state, |conn| Ok(assess_db::questions::list_questions(conn)?)).await?;
    Ok(Json(questions))
}
