use std::io::Write as _;

use chat_stream::prelude::*;
use chat_stream::init_observability;

/// Prints visible text as it arrives and reports metadata on the side.
struct ConsolePrinter {
    thinking_shown: bool,
}

impl StreamHandler for ConsolePrinter {
    fn on_open(&mut self) {
        eprintln!("[connected]");
    }

    fn on_message(&mut self, delta: MessageDelta) {
        if let Some(thinking) = delta.thinking_process.as_deref() {
            if !self.thinking_shown {
                eprintln!("[thinking] {thinking}");
                self.thinking_shown = true;
            }
        }
        if let Some(metadata) = &delta.metadata {
            for call in &metadata.tool_calls {
                eprintln!("[tool] {} {:?}", call.name, call.status);
            }
            for doc in &metadata.retrieved_documents {
                eprintln!("[doc] {} ({})", doc.id, doc.source);
            }
            if let Some(usage) = &metadata.usage {
                eprintln!("[usage] {:?} tokens", usage.total_tokens);
            }
        }
        print!("{}", delta.text);
        let _ = std::io::stdout().flush();
    }

    fn on_error(&mut self, error: StreamError) {
        eprintln!("\n[error] {error}");
    }

    fn on_close(&mut self) {
        println!();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    let _ = dotenvy::dotenv();
    init_observability();

    let path = std::env::var("CHAT_STREAM_PATH").unwrap_or_else(|_| "/api/chat/stream".into());
    let message = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Say hello in one sentence.".into());

    let client = ChatStreamClient::from_env()?;
    let closer = client.close_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            closer.close();
        }
    });

    let request = StreamRequest::new(path, serde_json::json!({ "message": message }));
    let state = client
        .connect(request, &mut ConsolePrinter { thinking_shown: false })
        .await?;
    eprintln!("[{state:?}]");
    Ok(())
}
