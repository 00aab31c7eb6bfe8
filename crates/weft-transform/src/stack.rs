//! Dedicated threads for the evaluators.
//!
//! Parsing and evaluation recurse over user-supplied trees. Their nesting
//! limits are sized against this stack, not against whatever thread the
//! caller happens to be on (tokio workers get 2 MiB).

use std::thread;

use weft_core::error::Result;

const EVALUATOR_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Run `f` to completion on a fresh thread with a large stack.
pub(crate) fn on_evaluator_stack<T, F>(f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> Result<T> + Send,
{
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("weft-eval".into())
            .stack_size(EVALUATOR_STACK_BYTES)
            .spawn_scoped(scope, f)?;
        match handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}
