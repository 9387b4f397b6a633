use futures::StreamExt as _;

use agent_sdk::prelude::*;
use agent_sdk::vendors::kimi_cli::KimiCliRuntime;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SdkError> {
    agent_sdk::init_observability();
    let runtime = KimiCliRuntime::from_env()?;
    let session = Session::create(&runtime, SessionOptions::new().work_dir(".")).await?;

    let result = stream_events(&session).await;
    session.close().await?;
    result
}

async fn stream_events(session: &Session) -> Result<(), SdkError> {
    let mut events = session.prompt("Show the first line of Cargo.toml.")?;
    while let Some(event) = events.next().await {
        match event? {
            Event::ContentPart(ContentPart::Text { text }) => print!("{text}"),
            Event::ToolCall(call) => eprintln!("\n[tool] {}", call.function.name),
            Event::ApprovalRequest(request) => {
                eprintln!("\n[approve] {}: {}", request.action, request.description);
                request.resolve(ApprovalResponse::Approve);
            }
            _ => {}
        }
    }
    println!();
    Ok(())
}
