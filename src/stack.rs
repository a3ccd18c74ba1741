//! Running the tree walkers on a stack of known size.
//!
//! Parsing, resolution, type checking and normalization all recurse along the
//! depth of a tree. That depth is bounded ([`crate::syntax::MAX_DEPTH`]), and
//! the public entry points run on a worker thread whose stack is large enough
//! for that bound, whatever the caller's own stack is.

use std::cell::Cell;
use std::thread;

use tracing::warn;

/// stack of the worker thread
pub const STACK_SIZE: usize = 64 << 20;

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Run `f` on a worker thread with a [`STACK_SIZE`] stack, or in place when
/// already on one. If no thread can be spawned, `f` runs in place as well.
pub(crate) fn on_large_stack<T: Send>(f: impl FnOnce() -> T + Send) -> T {
    if ON_WORKER.with(Cell::get) {
        return f();
    }

    let mut task = Some(f);
    let mut out = None;
    let spawned = thread::scope(|scope| {
        let (task, out) = (&mut task, &mut out);
        thread::Builder::new()
            .name("dhall-sel-worker".into())
            .stack_size(STACK_SIZE)
            .spawn_scoped(scope, move || {
                ON_WORKER.with(|on| on.set(true));
                *out = task.take().map(|f| f());
            })
            .map(|worker| worker.join())
    });

    match spawned {
        Ok(Ok(())) => {}
        Ok(Err(panic)) => std::panic::resume_unwind(panic),
        Err(error) => warn!(%error, "could not spawn a worker, running on the current stack"),
    }

    match (out, task) {
        (Some(out), _) => out,
        (None, Some(f)) => f(),
        (None, None) => unreachable!("the worker took the task but did not finish it"),
    }
}

#[test]
fn test() {
    let name = || thread::current().name().map(str::to_string);
    assert_eq!(Some("dhall-sel-worker".into()), on_large_stack(name));
    // nested calls stay on the same worker
    assert_eq!(
        Some("dhall-sel-worker".into()),
        on_large_stack(|| on_large_stack(name))
    );

    fn depth(n: usize) -> usize {
        let pad = std::hint::black_box([0u8; 1024]);
        if 0 == n {
            pad[0] as usize
        } else {
            1 + depth(n - 1) + pad[n % 1024] as usize
        }
    }
    // about 16 MiB of frames, beyond what a test thread has
    assert_eq!(16 * 1024, on_large_stack(|| depth(16 * 1024)));
}
