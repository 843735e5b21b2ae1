//! HTTP chat endpoint for the SQL assistant
//! Simple HTTP server using tokio and basic HTTP handling

use schema_sql_assistant::config::AppConfig;
use schema_sql_assistant::initialize_components;
use schema_sql_assistant::response_handler::ResponseHandler;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 1_000_000;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let components = initialize_components(&config).await?;
    let handler = Arc::new(components.response_handler(&config));

    let addr = std::env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("New connection from: {}", peer);
        tokio::spawn(handle_connection(stream, handler.clone()));
    }
}

async fn handle_connection(mut stream: TcpStream, handler: Arc<ResponseHandler>) {
    use tokio::time::{timeout, Duration};

    // Read request with timeout to prevent hanging
    let mut buffer = Vec::new();
    let mut temp_buf = [0; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut temp_buf).await {
                Ok(0) => break, // EOF
                Ok(n) => {
                    buffer.extend_from_slice(&temp_buf[..n]);
                    if request_complete(&buffer) || buffer.len() > MAX_REQUEST_BYTES {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read from stream: {}", e);
                    return Err(e);
                }
            }
        }
        Ok(())
    })
    .await;

    if !matches!(read_result, Ok(Ok(()))) {
        warn!("Request read failed or timed out");
        return;
    }

    if buffer.is_empty() {
        return;
    }

    let response = match String::from_utf8(buffer) {
        Ok(request) => handle_request(&request, &handler).await,
        Err(_) => create_response(400, "Bad Request", r#"{"error":"request is not valid UTF-8"}"#),
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

/// True once the headers and the full `Content-Length` body have arrived.
fn request_complete(buffer: &[u8]) -> bool {
    let Some(headers_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4) else {
        return false;
    };
    // The body may not be UTF-8; only the headers are decoded here.
    let headers = String::from_utf8_lossy(&buffer[..headers_end]);
    match extract_content_length(&headers) {
        Some(content_length) => buffer.len() >= headers_end + content_length,
        None => true,
    }
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.is_empty() {
            break;
        }
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(value) = line.split(':').nth(1) {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

async fn handle_request(request: &str, handler: &ResponseHandler) -> String {
    let Some(request_line) = request.lines().next() else {
        return create_response(400, "Bad Request", "{}");
    };

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", "{}");
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/").trim_end_matches('/');
    let body = request.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");

    match (method, path) {
        ("GET", "/api/health") => create_response(200, "OK", r#"{"status":"ok","service":"sql-assistant"}"#),
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("POST", "/api/chat") => {
            let chat: ChatRequest = match serde_json::from_str(body) {
                Ok(chat) => chat,
                Err(e) => {
                    let error = serde_json::json!({ "error": format!("Invalid request body: {}", e) });
                    return create_response(400, "Bad Request", &error.to_string());
                }
            };
            if chat.query.trim().is_empty() {
                return create_response(400, "Bad Request", r#"{"error":"query must not be empty"}"#);
            }

            let k = chat.top_k.filter(|k| *k > 0).unwrap_or_else(|| handler.top_k());
            let answer = handler.respond_with_k(&chat.query, k).await;
            let body = serde_json::json!({
                "response": answer.text,
                "kind": answer.kind,
                "request_id": answer.request_id,
                "completed_at": answer.completed_at,
            });
            create_response(200, "OK", &body.to_string())
        }
        _ => create_response(404, "Not Found", r#"{"error":"not found"}"#),
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
