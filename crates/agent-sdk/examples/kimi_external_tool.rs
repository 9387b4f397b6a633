use agent_sdk::prelude::*;
use agent_sdk::tool_fn;
use agent_sdk::vendors::kimi_cli::KimiCliRuntime;
use futures::StreamExt as _;
use serde_json::json;

#[derive(serde::Deserialize)]
struct WordCount {
    text: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SdkError> {
    agent_sdk::init_observability();
    let runtime = KimiCliRuntime::from_env()?;

    let count_words = tool_fn(
        "count_words",
        "Counts the whitespace-separated words in a text",
        json!({
            "type": "object",
            "properties": {"text": {"type": "string", "description": "Text to count"}},
            "required": ["text"]
        }),
        |args: WordCount| async move {
            Ok::<_, String>(args.text.split_whitespace().count().to_string())
        },
    );

    let session = Session::create(
        &runtime,
        SessionOptions::new().yolo(true).tool(count_words),
    )
    .await?;
    let mut events = session.prompt("Use count_words on 'the quick brown fox' and report the result.")?;
    while let Some(event) = events.next().await {
        if let Event::ContentPart(part) = event? {
            if let Some(text) = part.as_text() {
                print!("{text}");
            }
        }
    }
    println!();

    let usage = session.token_usage();
    println!("tokens: {} in, {} out", usage.total_input(), usage.output);
    session.close().await
}
