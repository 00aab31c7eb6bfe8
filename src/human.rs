//! Terminal prompt answering human nodes during `weft run`.

use futures::future::BoxFuture;

use weft_core::definition::HumanChoice;
use weft_core::error::{Result, WeftError};
use weft_core::traits::{HumanInputProvider, HumanResponse};

pub struct TerminalHuman;

impl HumanInputProvider for TerminalHuman {
    fn request(&self, prompt: String, choices: Vec<HumanChoice>) -> BoxFuture<'_, Result<HumanResponse>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || ask(&prompt, &choices))
                .await
                .map_err(|e| WeftError::HumanInput(e.to_string()))?
        })
    }
}

fn ask(prompt: &str, choices: &[HumanChoice]) -> Result<HumanResponse> {
    eprintln!("\n[HUMAN INPUT] {}", prompt);
    let choice = if choices.is_empty() {
        dialoguer::Input::<String>::new()
            .with_prompt("Answer")
            .interact_text()
            .map_err(|e| WeftError::HumanInput(e.to_string()))?
    } else {
        let labels: Vec<&str> = choices.iter().map(|c| c.label.as_str()).collect();
        let picked = dialoguer::Select::new()
            .with_prompt("Choose")
            .items(&labels)
            .default(0)
            .interact()
            .map_err(|e| WeftError::HumanInput(e.to_string()))?;
        choices[picked].id.clone()
    };

    let note = dialoguer::Input::<String>::new()
        .with_prompt("Note (optional)")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| WeftError::HumanInput(e.to_string()))?;

    let mut response = HumanResponse::new(choice);
    if !note.trim().is_empty() {
        response = response.with_text(note.trim());
    }
    Ok(response)
}
