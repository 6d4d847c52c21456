use axum::response::Html;

const HOME_PAGE: &str = r#"
    <h1>Coin Detection API</h1>
    <p>Server is running</p>
    <p>Send images to: POST /detect</p>
    <p>Supported coins: 1, 5, 10 baht</p>
"#;

pub async fn home() -> Html<&'static str> {
    Html(HOME_PAGE)
}
