use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    classes: Vec<String>,
}

pub async fn healthcheck(State(state): State<SharedState>) -> Json<Health> {
    let classes = state
        .model_service
        .labels()
        .iter()
        .map(|label| label.label.clone())
        .collect();

    Json(Health {
        status: "Available",
        classes,
    })
}
