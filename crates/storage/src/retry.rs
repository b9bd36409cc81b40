//! Shared out-of-memory retry loop: run one GC step, try again, stop when
//! GC reports no further progress is possible (spec: "retries through GC
//! once per round").

use duskdb_core::{Error, Result};

/// Attempt `try_alloc`. On `OutOfMemory`, invoke `gc_step` once (it returns
/// `true` if it freed something and progress might be possible) and retry;
/// give up and propagate the error once `gc_step` returns `false`.
pub fn retry_with_gc<T>(
    mut try_alloc: impl FnMut() -> Result<T>,
    mut gc_step: impl FnMut() -> bool,
) -> Result<T> {
    loop {
        match try_alloc() {
            Ok(v) => return Ok(v),
            Err(e @ Error::OutOfMemory { .. }) => {
                if !gc_step() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn succeeds_without_gc_when_first_try_works() {
        let result = retry_with_gc(|| Ok(42), || panic!("gc should not run"));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn retries_until_gc_frees_enough() {
        let attempts = Cell::new(0);
        let result = retry_with_gc(
            || {
                let n = attempts.get();
                attempts.set(n + 1);
                if n < 2 {
                    Err(Error::OutOfMemory {
                        requested: 1,
                        quota: 1,
                    })
                } else {
                    Ok(())
                }
            },
            || true,
        );
        assert!(result.is_ok());
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn gives_up_when_gc_reports_done() {
        let result: Result<()> = retry_with_gc(
            || {
                Err(Error::OutOfMemory {
                    requested: 1,
                    quota: 1,
                })
            },
            || false,
        );
        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    }
}
