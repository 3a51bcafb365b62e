//! HTTP server for the chat events endpoint.
//! Simple HTTP server using tokio and basic HTTP handling.

use clap::Parser;
use fpa_assistant::assistant::Assistant;
use fpa_assistant::code_execution::CodeExecutionClient;
use fpa_assistant::config::Config;
use fpa_assistant::events::{AdmissionGuard, EventHandler, SEEN_EVENTS_CAPACITY};
use fpa_assistant::llm::LlmClient;
use fpa_assistant::metadata::TableMetadata;
use fpa_assistant::slack::SlackClient;
use fpa_assistant::warehouse::PostgresWarehouse;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "fpa-assistant")]
#[command(about = "Chat assistant answering business questions against the reporting warehouse")]
struct Args {
    /// Bind address override (default: BIND_ADDR env or 0.0.0.0:8080)
    #[arg(long)]
    bind: Option<String>,

    /// Path to the table configuration JSON
    #[arg(long)]
    table_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(path) = args.table_config {
        config.table_config_path = path;
    }

    let table = TableMetadata::load(&config.table_config_path)?;
    info!(table = %table.table_id, "table configuration loaded");

    let llm = Arc::new(LlmClient::new(
        config.anthropic_api_key.clone(),
        config.classifier_model.clone(),
    ));
    let warehouse = Arc::new(PostgresWarehouse::connect(&config.database_url).await?);
    let transport = Arc::new(SlackClient::new(config.slack_bot_token.clone()));
    let analysis = Arc::new(CodeExecutionClient::new(
        config.anthropic_api_key.clone(),
        config.analysis_model.clone(),
    ));

    let assistant = Arc::new(Assistant::new(
        llm,
        warehouse,
        transport.clone(),
        analysis,
        table,
    ));
    let guard = AdmissionGuard::new(config.authorized_users.clone(), SEEN_EVENTS_CAPACITY);
    let handler = Arc::new(EventHandler::new(guard, assistant, transport));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "server listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        info!(%addr, "new connection");
        let handler = handler.clone();
        tokio::spawn(handle_connection(stream, handler));
    }
}

async fn handle_connection(mut stream: TcpStream, handler: Arc<EventHandler>) {
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
                    // Check if we've reached the end of HTTP headers + body
                    if let Ok(s) = std::str::from_utf8(&buffer) {
                        if s.contains("\r\n\r\n") {
                            if let Some(content_length) = extract_content_length(s) {
                                let headers_end = match s.find("\r\n\r\n") {
                                    Some(at) => at + 4,
                                    None => break,
                                };
                                if buffer.len() >= headers_end + content_length {
                                    break; // We have the complete request
                                }
                            } else if n < temp_buf.len() {
                                // No content-length header and we got less than buffer size
                                break;
                            }
                        }
                    }
                    // If buffer is getting too large, break to prevent memory issues
                    if buffer.len() > 1_000_000 {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to read from stream");
                    return Err(e);
                }
            }
        }
        Ok(())
    })
    .await;

    if read_result.is_err() {
        warn!("request read timeout");
        return;
    }
    if buffer.is_empty() {
        return;
    }

    let request = match String::from_utf8(buffer) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "request is not valid UTF-8");
            return;
        }
    };

    let (response, admitted) = route_request(&request);
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!(error = %e, "failed to write response");
        return;
    }

    // The transport expects a fast acknowledgement; the question itself is
    // processed after the response has gone out.
    if let Some(body) = admitted {
        handler.handle(body).await;
    }
}

/// Route one parsed HTTP request. Returns the response to write and, for
/// admitted event deliveries, the JSON body to process afterwards.
fn route_request(request: &str) -> (String, Option<serde_json::Value>) {
    let request_line = request.lines().next().unwrap_or("");

    if request_line.starts_with("POST /slack/events") {
        let body = match request_body(request) {
            Some(body) => body,
            None => return (http_response(400, r#"{"error":"missing body"}"#), None),
        };
        let payload: serde_json::Value = match serde_json::from_str(body) {
            Ok(payload) => payload,
            Err(_) => return (http_response(400, r#"{"error":"invalid json"}"#), None),
        };

        // URL verification handshake: echo the challenge, nothing to process.
        if payload["type"] == "url_verification" {
            info!("verification request from transport");
            let challenge = payload["challenge"].as_str().unwrap_or("");
            let reply = serde_json::json!({ "challenge": challenge });
            return (http_response(200, &reply.to_string()), None);
        }

        return (http_response(200, r#"{"ok":true}"#), Some(payload));
    }

    if request_line.starts_with("GET /health") {
        return (http_response(200, r#"{"status":"ok"}"#), None);
    }

    (http_response(404, r#"{"error":"not found"}"#), None)
}

fn request_body(request: &str) -> Option<&str> {
    request.split_once("\r\n\r\n").map(|(_, body)| body).filter(|b| !b.is_empty())
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        let lower = line.to_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            return value.trim().parse().ok();
        }
    }
    None
}

fn http_response(status: u16, body: &str) -> String {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status, status_text, body.len(), body
    )
}
