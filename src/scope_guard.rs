/// Runs an undo action when dropped, unless [`ScopeGuard::dismiss`] was called first.
///
/// ```
/// use s3cachefs::scope_guard::ScopeGuard;
///
/// let mut undone = false;
/// {
///     let _guard = ScopeGuard::new(|| undone = true);
/// }
/// assert!(undone);
/// ```
#[must_use = "the undo action runs as soon as the guard is dropped"]
pub struct ScopeGuard<F: FnOnce()> {
    undo: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(undo: F) -> Self {
        Self { undo: Some(undo) }
    }

    /// Disarms the guard. The undo action will never run.
    pub fn dismiss(&mut self) {
        self.undo = None;
    }

    pub fn is_armed(&self) -> bool {
        self.undo.is_some()
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

type UndoStep<'a> = ScopeGuard<Box<dyn FnOnce() + 'a>>;

/// A stack of undo actions for a multi-step mutation.
///
/// Register one step after each successful mutation. Dropping the rollback
/// undoes the registered steps newest first; [`Rollback::dismiss`] commits
/// them instead.
#[must_use = "dropping a rollback immediately undoes its steps"]
#[derive(Default)]
pub struct Rollback<'a> {
    steps: Vec<UndoStep<'a>>,
}

impl<'a> Rollback<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, undo: impl FnOnce() + 'a) {
        self.steps.push(ScopeGuard::new(Box::new(undo)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Keeps every completed step.
    pub fn dismiss(mut self) {
        for step in &mut self.steps {
            step.dismiss();
        }
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        while let Some(step) = self.steps.pop() {
            drop(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn test_guard_runs_on_drop() {
        let runs = Cell::new(0);
        {
            let guard = ScopeGuard::new(|| runs.set(runs.get() + 1));
            assert!(guard.is_armed());
        }
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_dismissed_guard_never_runs() {
        let runs = Cell::new(0);
        {
            let mut guard = ScopeGuard::new(|| runs.set(runs.get() + 1));
            guard.dismiss();
            assert!(!guard.is_armed());
        }
        assert_eq!(runs.get(), 0);
    }

    #[test]
    fn test_guard_runs_on_early_return() {
        fn fallible(fail: bool, log: &RefCell<Vec<&'static str>>) -> Result<(), ()> {
            let mut guard = ScopeGuard::new(|| log.borrow_mut().push("undo"));
            if fail {
                return Err(());
            }
            guard.dismiss();
            Ok(())
        }

        let log = RefCell::new(Vec::new());
        assert!(fallible(true, &log).is_err());
        assert!(fallible(false, &log).is_ok());
        assert_eq!(*log.borrow(), vec!["undo"]);
    }

    #[test]
    fn test_rollback_unwinds_newest_first() {
        let log = RefCell::new(Vec::new());
        {
            let mut rollback = Rollback::new();
            for step in 1..=3 {
                let log = &log;
                rollback.push(move || log.borrow_mut().push(step));
            }
            assert_eq!(rollback.len(), 3);
        }
        assert_eq!(*log.borrow(), vec![3, 2, 1]);
    }

    #[test]
    fn test_rollback_dismiss_keeps_steps() {
        let log = RefCell::new(Vec::new());
        let mut rollback = Rollback::new();
        rollback.push(|| log.borrow_mut().push(1));
        rollback.push(|| log.borrow_mut().push(2));
        rollback.dismiss();
        assert!(log.borrow().is_empty());
    }
}
