//! Run with: cargo run --bin ask -- "Posso ter um cachorro no apartamento?"

use std::env;
use std::io::Write;

use futures::StreamExt;
use norma::modules::norma::{routes::ASK_NORMA_PATH, streamer::{SseLine, SseLineBuffer}};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct Fragment {
    content: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let message = env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let message = if message.is_empty() {
        "Qual o horário de silêncio do condomínio?".to_string()
    } else {
        message
    };

    let base_url = env::var("NORMA_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let condominio_id = env::var("NORMA_CONDOMINIO_ID")
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
    let user_id = env::var("NORMA_USER_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    println!("\n🏢 Norma smoke test");
    println!("Condomínio: {}", condominio_id);
    println!("Pergunta: \"{}\"\n", message);

    let response = Client::new()
        .post(format!("{}{}", base_url, ASK_NORMA_PATH))
        .json(&json!({
            "message": message,
            "condominioId": condominio_id,
            "userId": user_id,
        }))
        .send()
        .await?;

    let status = response.status();
    let is_stream = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"));

    if !is_stream {
        let body: serde_json::Value = response.json().await?;
        println!("Status: {}", status);
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let mut body = response.bytes_stream();
    let mut lines = SseLineBuffer::new();
    let mut stdout = std::io::stdout();
    let mut fragments = 0;

    'read: while let Some(chunk) = body.next().await {
        for line in lines.feed(&chunk?) {
            match line {
                SseLine::Done => break 'read,
                SseLine::Data(data) => {
                    if let Ok(fragment) = serde_json::from_str::<Fragment>(&data) {
                        print!("{}", fragment.content);
                        stdout.flush()?;
                        fragments += 1;
                    }
                }
            }
        }
    }

    println!("\n\n✓ {} fragments received", fragments);
    Ok(())
}
