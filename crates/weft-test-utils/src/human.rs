use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use weft_core::definition::HumanChoice;
use weft_core::error::{Result, WeftError};
use weft_core::traits::{HumanInputProvider, HumanResponse};

/// `HumanInputProvider` that answers from a fixed script and records every
/// prompt it was shown.
#[derive(Default)]
pub struct ScriptedHuman {
    answers: Mutex<VecDeque<HumanResponse>>,
    prompts: Mutex<Vec<(String, Vec<HumanChoice>)>>,
}

impl ScriptedHuman {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, choice: impl Into<String>) -> Self {
        self.answers.lock().unwrap().push_back(HumanResponse::new(choice));
        self
    }

    pub fn answer_with_text(self, choice: impl Into<String>, text: impl Into<String>) -> Self {
        self.answers
            .lock()
            .unwrap()
            .push_back(HumanResponse::new(choice).with_text(text));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn last_choices(&self) -> Vec<HumanChoice> {
        self.prompts
            .lock()
            .unwrap()
            .last()
            .map(|(_, c)| c.clone())
            .unwrap_or_default()
    }
}

impl HumanInputProvider for ScriptedHuman {
    fn request(&self, prompt: String, choices: Vec<HumanChoice>) -> BoxFuture<'_, Result<HumanResponse>> {
        self.prompts.lock().unwrap().push((prompt, choices));
        let answer = self.answers.lock().unwrap().pop_front();
        Box::pin(async move {
            answer.ok_or_else(|| WeftError::HumanInput("scripted human has no answers left".into()))
        })
    }
}
