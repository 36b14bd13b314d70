// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image classification with prompt building, label normalization and retry

pub mod gemini;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::entry::{ClassificationMode, FALLBACK_CATEGORY};
use crate::imaging::ImagePayload;
use crate::progress::CancelFlag;
use crate::{Result, SnapsortError};

pub use gemini::GeminiBackend;

const AUTO_PROMPT: &str = r#"You are an image categorization assistant. Analyze this image and assign it ONE broad category.

IMPORTANT RULES:
1. Screenshots (computer/phone UI, app interfaces, code, text on screen, software, charts with text) → "screenshots"
2. Illustrations/drawings/cartoons (digital art, graphic design, logos, icons, diagrams) → "art"
3. Real photographs of people → "people"
4. Real photographs of nature/outdoors → "nature"
5. Real photographs of food → "food"
6. Real photographs of buildings → "architecture"
7. Real photographs of objects/products → "objects"
8. Documents (papers, forms, receipts, text documents) → "documents"
9. Real photographs of animals → "animals"

Examples:
- App interface or software UI → "screenshots"
- Code editor screenshot → "screenshots"
- Robot illustration/cartoon → "art"
- Diagram or infographic → "art"
- Icon or logo → "art"
- Photo of a laptop → "objects"
- Photo of a person → "people"

Return ONLY the category name in lowercase, no punctuation or extra words."#;

/// Transport that sends one prompt plus image and returns the first text candidate
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn generate(&self, prompt: &str, image: &ImagePayload) -> Result<String>;
}

/// Turns one image into one category label
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        image: &ImagePayload,
        mode: &ClassificationMode,
        cancel: &CancelFlag,
    ) -> Result<String>;
}

/// Attempt cap and exponential backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the `failed`-th failed attempt (1-based)
    pub fn delay_after(&self, failed: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(4000),
        }
    }
}

/// Prompt sent for a classification mode
pub fn build_prompt(mode: &ClassificationMode) -> String {
    match mode {
        ClassificationMode::Auto => AUTO_PROMPT.to_string(),
        ClassificationMode::FixedList(categories) => {
            let list = categories
                .iter()
                .map(|c| format!("- {}", c))
                .collect::<Vec<_>>()
                .join("\n");
            [
                "You are an image categorization assistant. Choose the single best category",
                "for this image from the list below. Return only the category name exactly,",
                "with no punctuation or extra words. If none fit, return \"other\".",
                "",
                "Categories:",
                &list,
            ]
            .join("\n")
        }
    }
}

/// Reduce a raw model reply to a single lowercase token
pub fn normalize_label(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | ' '))
        .collect();

    cleaned
        .split_whitespace()
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_CATEGORY.to_string())
}

/// Force labels outside a fixed list to the fallback category
pub fn validate_label(label: String, mode: &ClassificationMode) -> String {
    match mode {
        ClassificationMode::Auto => label,
        ClassificationMode::FixedList(categories) => {
            if categories.iter().any(|c| *c == label) {
                label
            } else {
                debug!("Label '{}' not in category list, using '{}'", label, FALLBACK_CATEGORY);
                FALLBACK_CATEGORY.to_string()
            }
        }
    }
}

/// Classifier that drives a backend with the retry policy
pub struct ClassifierClient<B> {
    backend: B,
    retry: RetryPolicy,
}

impl<B: VisionBackend> ClassifierClient<B> {
    pub fn new(backend: B) -> Self {
        Self::with_retry(backend, RetryPolicy::default())
    }

    pub fn with_retry(backend: B, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: VisionBackend> Classifier for ClassifierClient<B> {
    async fn classify(
        &self,
        image: &ImagePayload,
        mode: &ClassificationMode,
        cancel: &CancelFlag,
    ) -> Result<String> {
        let prompt = build_prompt(mode);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(SnapsortError::Cancelled);
            }
            attempt += 1;

            let error = match self.backend.generate(&prompt, image).await {
                Ok(raw) => return Ok(validate_label(normalize_label(&raw), mode)),
                Err(e) => e,
            };

            if error.is_cancelled() {
                return Err(error);
            }
            if !error.is_retryable() || attempt >= max_attempts {
                return Err(SnapsortError::ClassificationFailed {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.retry.delay_after(attempt);
            warn!(
                error = %error,
                attempt,
                max_attempts,
                backoff_ms = delay.as_millis() as u64,
                "Retrying classification"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Backend replaying a fixed script of replies
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedBackend {
        async fn generate(&self, _prompt: &str, _image: &ImagePayload) -> Result<String> {
            self.calls.lock().unwrap().push(Instant::now());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SnapsortError::MalformedResponse("script exhausted".into())))
        }
    }

    fn server_error() -> Result<String> {
        Err(SnapsortError::ClassifierStatus {
            status: 500,
            body: "internal".into(),
        })
    }

    fn payload() -> ImagePayload {
        ImagePayload::new(vec![0xff, 0xd8], "image/jpeg")
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Food.\n"), "food");
        assert_eq!(normalize_label("\"Screenshots\" (UI)"), "screenshots");
        assert_eq!(normalize_label("street-art scene"), "street-art");
        assert_eq!(normalize_label("!!!"), "other");
        assert_eq!(normalize_label(""), "other");
        assert_eq!(normalize_label("Café"), "caf");
    }

    #[test]
    fn test_fixed_list_fallback() {
        let mode = ClassificationMode::fixed(["cats", "dogs"]);
        assert_eq!(validate_label(normalize_label("bird"), &mode), "other");
        assert_eq!(validate_label(normalize_label("Dogs"), &mode), "dogs");
        assert_eq!(validate_label("bird".into(), &ClassificationMode::Auto), "bird");
    }

    #[test]
    fn test_prompts() {
        let prompt = build_prompt(&ClassificationMode::fixed(["Cats", "dogs"]));
        assert!(prompt.contains("- Cats\n- dogs"));
        assert!(prompt.contains("If none fit, return \"other\""));

        let auto = build_prompt(&ClassificationMode::Auto);
        assert!(auto.contains("\"screenshots\""));
        assert!(auto.contains("\"animals\""));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_after(10), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_waits_one_then_two_seconds() {
        let backend = ScriptedBackend::new(vec![server_error(), server_error(), Ok("Nature".into())]);
        let client = ClassifierClient::new(backend);

        let label = client
            .classify(&payload(), &ClassificationMode::Auto, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(label, "nature");

        let calls = client.backend().call_times();
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_failure_is_terminal() {
        let backend = ScriptedBackend::new(vec![
            server_error(),
            server_error(),
            server_error(),
            Ok("nature".into()),
        ]);
        let client = ClassifierClient::new(backend);

        let start = Instant::now();
        let err = client
            .classify(&payload(), &ClassificationMode::Auto, &CancelFlag::new())
            .await
            .unwrap_err();

        match err {
            SnapsortError::ClassificationFailed { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, SnapsortError::ClassifierStatus { status: 500, .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(client.backend().call_times().len(), 3);
        // No delay after the final attempt
        assert!(start.elapsed() < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_fails_fast() {
        let backend = ScriptedBackend::new(vec![Err(SnapsortError::ClassifierStatus {
            status: 400,
            body: "API key not valid".into(),
        })]);
        let client = ClassifierClient::new(backend);

        let err = client
            .classify(&payload(), &ClassificationMode::Auto, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SnapsortError::ClassificationFailed { attempts: 1, .. }));
        assert_eq!(client.backend().call_times().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_attempt() {
        let client = ClassifierClient::new(ScriptedBackend::new(vec![Ok("food".into())]));
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = client
            .classify(&payload(), &ClassificationMode::Auto, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(client.backend().call_times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_attempts_stops_retrying() {
        let client = ClassifierClient::new(ScriptedBackend::new(vec![server_error(), Ok("food".into())]));
        let cancel = CancelFlag::new();

        let flag = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            flag.cancel();
        });

        let err = client
            .classify(&payload(), &ClassificationMode::Auto, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(client.backend().call_times().len(), 1);
    }
}
