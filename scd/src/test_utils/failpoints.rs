use fail::FailScenario;

use crate::failpoints::InjectedError;

/// Fail points armed for the duration of a test.
///
/// Creating the guard takes the global fail point lock, so tests holding one run one at a time.
/// Every fail point armed through the guard is removed when it is dropped.
pub struct FailpointGuard<'a> {
    _scenario: FailScenario<'a>,
    armed: Vec<&'static str>,
}

impl<'a> FailpointGuard<'a> {
    pub fn setup() -> FailpointGuard<'a> {
        FailpointGuard {
            _scenario: FailScenario::setup(),
            armed: Vec::new(),
        }
    }

    /// Makes every evaluation of `name` return `error`.
    pub fn always(self, name: &'static str, error: InjectedError) -> Self {
        self.arm(name, format!("return({})", error.parameter()))
    }

    /// Makes the next `count` evaluations of `name` return `error`.
    pub fn times(self, name: &'static str, count: usize, error: InjectedError) -> Self {
        self.arm(name, format!("{count}*return({})", error.parameter()))
    }

    fn arm(mut self, name: &'static str, action: String) -> Self {
        fail::cfg(name, &action).unwrap();
        self.armed.push(name);
        self
    }
}

impl Drop for FailpointGuard<'_> {
    fn drop(&mut self) {
        for name in &self.armed {
            fail::remove(name);
        }
    }
}
