//! Home page and counter.
//!
//! The page embeds a counter fragment. `POST /count` returns only that
//! fragment so an HTMX button can swap it in place.

use axum::extract::State;
use axum::response::Html;
use tracing::{debug, instrument};

use crate::state::AppState;

const TITLE: &str = "Example Site";

/// `GET /` - full page showing the current count.
#[instrument(skip(state))]
pub async fn home(State(state): State<AppState>) -> Html<String> {
    Html(page(TITLE, &counter_fragment(state.count())))
}

/// `POST /count` - increment and return the updated fragment.
#[instrument(skip(state))]
pub async fn count(State(state): State<AppState>) -> Html<String> {
    let count = state.increment();
    debug!(count, "Counter incremented");
    Html(counter_fragment(count))
}

fn counter_fragment(count: i64) -> String {
    format!(r#"<div id="counter">Count: {count}</div>"#)
}

fn page(title: &str, counter: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body>
<main>
<h1>Welcome!</h1>
{counter}
<button hx-post="/count" hx-target="#counter" hx-swap="outerHTML">Increment</button>
</main>
</body>
</html>
"##
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_fragment() {
        assert_eq!(counter_fragment(7), r#"<div id="counter">Count: 7</div>"#);
    }

    #[test]
    fn test_page_embeds_counter() {
        let html = page(TITLE, &counter_fragment(0));
        assert!(html.contains("<title>Example Site</title>"));
        assert!(html.contains("Welcome!"));
        assert!(html.contains(r#"<div id="counter">Count: 0</div>"#));
        assert!(html.contains(r##"hx-target="#counter""##));
    }
}
