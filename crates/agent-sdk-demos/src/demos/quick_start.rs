use std::io::Write as _;

use agent_sdk::{AgentRuntime, PromptOptions, SdkError};
use futures::StreamExt as _;

const TASK: &str = "Please create a file named hello.txt in the current working directory and write 'hello world' into it.";

/// Streams the reply text as messages arrive.
pub async fn run(runtime: &dyn AgentRuntime, options: PromptOptions) -> Result<(), SdkError> {
    let mut messages = agent_sdk::prompt(runtime, TASK, options).await?;
    let mut stdout = std::io::stdout();
    while let Some(message) = messages.next().await {
        print!("{}", message?.extract_text());
        let _ = stdout.flush();
    }
    println!();
    Ok(())
}
