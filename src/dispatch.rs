//! The translation dispatcher (C3, spec §4.3/§5).
//!
//! Each paragraph template is submitted to the worker pool at most once;
//! bounded parallelism comes from the pool's fixed thread count
//! ([`thread_pool::BasicThreadPool`]), not from any gate here. Result
//! ordering always matches input order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::fontmap::Translator;
use crate::thread_pool::ThreadPool;

static PLACEHOLDER_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{v\d+\}$").expect("static regex is valid"));

/// True for templates the dispatcher must not forward to the backend:
/// a lone formula placeholder, or pure whitespace (spec §4.3).
pub fn bypasses_backend(template: &str) -> bool {
    template.trim().is_empty() || PLACEHOLDER_ONLY.is_match(template)
}

/// Translates every template through `translator` using up to `pool`'s
/// worker count of concurrent calls, retrying indefinitely on error with a
/// fixed one-second wait (spec §4.3, §5). Returns results in input order.
pub fn translate_all(
    pool: &impl ThreadPool,
    translator: Arc<dyn Translator>,
    templates: Vec<String>,
) -> Vec<String> {
    let total = templates.len();
    let (result_tx, result_rx) = flume::unbounded::<(usize, String)>();

    for (index, template) in templates.into_iter().enumerate() {
        let translator = Arc::clone(&translator);
        let result_tx = result_tx.clone();
        pool.spawn(move || {
            let translated = translate_one_with_retry(translator.as_ref(), &template, index);
            // The receiver outlives every sender clone until `total` results
            // have been collected, so this can only fail if the pool itself
            // dropped the task without running it.
            let _ = result_tx.send((index, translated));
        });
    }
    drop(result_tx);

    let mut results = vec![String::new(); total];
    for _ in 0..total {
        let (index, translated) = result_rx
            .recv()
            .expect("dispatcher worker pool dropped a task without a reply");
        results[index] = translated;
    }
    results
}

fn translate_one_with_retry(translator: &dyn Translator, template: &str, index: usize) -> String {
    if bypasses_backend(template) {
        return template.to_string();
    }

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match translator.translate(template) {
            Ok(translated) => return translated,
            Err(err) => {
                log::debug!(
                    "translation attempt {attempt} for paragraph {index} via '{}' failed: {err:#}",
                    translator.name()
                );
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::thread_pool::BasicThreadPool;

    #[test]
    fn bypass_detects_placeholders_and_whitespace() {
        assert!(bypasses_backend("{v0}"));
        assert!(bypasses_backend("{v42}"));
        assert!(bypasses_backend("   \n\t"));
        assert!(bypasses_backend(""));
        assert!(!bypasses_backend("x {v0} y"));
        assert!(!bypasses_backend("hello"));
    }

    struct CountingIdentity(AtomicUsize);
    impl Translator for CountingIdentity {
        fn translate(&self, text: &str) -> anyhow::Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(text.to_string())
        }
        fn name(&self) -> &str {
            "counting-identity"
        }
    }

    #[test]
    fn placeholders_never_reach_the_backend() {
        let pool = BasicThreadPool::new(2);
        let translator = Arc::new(CountingIdentity(AtomicUsize::new(0)));
        let templates = vec!["{v0}".to_string(), "  ".to_string(), "real text".to_string()];
        let results = translate_all(&pool, translator.clone(), templates);
        assert_eq!(results, vec!["{v0}", "  ", "real text"]);
        assert_eq!(translator.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn preserves_input_order() {
        let pool = BasicThreadPool::new(4);
        let translator: Arc<dyn Translator> = Arc::new(crate::fontmap::IdentityTranslator);
        let templates: Vec<String> = (0..20).map(|i| format!("item-{i}")).collect();
        let results = translate_all(&pool, translator, templates.clone());
        assert_eq!(results, templates);
    }

    struct FlakyThenOk {
        remaining_failures: Mutex<u32>,
        calls: AtomicUsize,
    }
    impl Translator for FlakyThenOk {
        fn translate(&self, text: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("transient backend error");
            }
            Ok(format!("OK:{text}"))
        }
        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn retries_until_success_and_counts_calls() {
        let translator = FlakyThenOk {
            remaining_failures: Mutex::new(2),
            calls: AtomicUsize::new(0),
        };
        let result = translate_one_with_retry(&translator, "x", 0);
        assert_eq!(result, "OK:x");
        assert_eq!(translator.calls.load(Ordering::SeqCst), 3);
    }
}
