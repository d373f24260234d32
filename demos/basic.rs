use serde::Deserialize;
use serde_json::json;
use smartgoals_http::{ApiClient, RequestOptions};

#[derive(Debug, Deserialize)]
struct Goal {
    id: u64,
    title: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = ApiClient::from_env().map_err(anyhow::Error::msg)?;
    if let Ok(token) = std::env::var("SMARTGOALS_API_TOKEN") {
        client.set_auth_token(token);
    }

    let created = client
        .post::<Goal, _>(
            "/goals",
            &json!({ "title": "Run a half marathon", "category": "health" }),
            RequestOptions::new(),
        )
        .await?;
    println!("created goal {} ({})", created.data.id, created.data.title);

    let goals = client
        .get::<Vec<Goal>>("/goals", RequestOptions::new().param("status", "active"))
        .await?;
    for goal in goals.data {
        println!("{goal:?}");
    }

    client.clear_cache(Some("^GET:/goals"))?;
    println!("{:?}", client.get_stats());

    Ok(())
}
