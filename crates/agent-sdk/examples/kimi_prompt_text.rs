use agent_sdk::prelude::*;
use agent_sdk::vendors::kimi_cli::KimiCliRuntime;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SdkError> {
    agent_sdk::init_observability();
    let runtime = KimiCliRuntime::from_env()?;

    let text = prompt_text(
        &runtime,
        "Reply with one short sentence greeting the user.",
        PromptOptions::new().yolo(true).final_message_only(),
    )
    .await?;

    println!("{text}");
    Ok(())
}
