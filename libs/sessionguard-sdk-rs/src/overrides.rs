//! Override composition for pluggable function tables.
//!
//! A function table is a plain struct whose fields are `Arc`'d closures. An
//! override receives the complete table and returns a new one, usually with
//! struct-update syntax so every slot it does not touch is carried over as the
//! very same `Arc`:
//!
//! ```rust,ignore
//! let log_creates: Override<RecipeFunctions> = Arc::new(|original| {
//!     let create = original.create_new_session.clone();
//!     RecipeFunctions {
//!         create_new_session: Arc::new(move |input, ctx| {
//!             tracing::info!(user_id = %input.user_id, "creating session");
//!             create(input, ctx)
//!         }),
//!         ..original
//!     }
//! });
//! ```
//!
//! The overriding closure captures the original slot before the new table
//! exists, so calling "the original" never re-enters the override.

use std::sync::Arc;

/// Replaces selected slots of a function table.
pub type Override<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// Applies overrides to `defaults` in order; each override sees the table
/// produced by the previous one as its "original".
pub fn compose<T>(defaults: T, overrides: &[Override<T>]) -> T {
    overrides
        .iter()
        .fold(defaults, |table, override_fn| override_fn(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Slot = Arc<dyn Fn(u32) -> u32 + Send + Sync>;

    #[derive(Clone)]
    struct Table {
        double: Slot,
        name: Arc<dyn Fn() -> String + Send + Sync>,
    }

    fn defaults() -> Table {
        Table {
            double: Arc::new(|x| x * 2),
            name: Arc::new(|| "default".to_string()),
        }
    }

    #[test]
    fn test_no_overrides_returns_defaults() {
        let table = compose(defaults(), &[]);
        assert_eq!((table.double)(4), 8);
        assert_eq!((table.name)(), "default");
    }

    #[test]
    fn test_unreplaced_slots_keep_original_reference() {
        let base = defaults();
        let original_name = base.name.clone();

        let replace_double: Override<Table> = Arc::new(|original| Table {
            double: Arc::new(|x| x + 1),
            ..original
        });
        let table = compose(base, &[replace_double]);

        assert_eq!((table.double)(4), 5);
        assert!(Arc::ptr_eq(&table.name, &original_name));
    }

    #[test]
    fn test_override_can_call_original_without_recursion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let wrap: Override<Table> = Arc::new(move |original| {
            let inner = original.double.clone();
            let counter = counter.clone();
            Table {
                double: Arc::new(move |x| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    inner(x) + 1
                }),
                ..original
            }
        });

        let table = compose(defaults(), &[wrap]);

        assert_eq!((table.double)(10), 21);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_overrides_apply_in_order() {
        let add_one: Override<Table> = Arc::new(|original| {
            let inner = original.double.clone();
            Table {
                double: Arc::new(move |x| inner(x) + 1),
                ..original
            }
        });
        let times_ten: Override<Table> = Arc::new(|original| {
            let inner = original.double.clone();
            Table {
                double: Arc::new(move |x| inner(x) * 10),
                ..original
            }
        });

        let table = compose(defaults(), &[add_one, times_ten]);

        // (3 * 2 + 1) * 10
        assert_eq!((table.double)(3), 70);
    }
}
