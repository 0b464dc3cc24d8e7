//! Observable state of a live query.

/// What a live query currently shows.
///
/// `is_loading` is true only until the first fetch settles. Later refetches
/// run in the background and leave it false, so consumers never flash a
/// loading state over data they already have.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveState<T> {
    /// Result of the last successful fetch.
    pub data: Option<T>,
    /// True until the first fetch completes.
    pub is_loading: bool,
    /// Message of the last failed fetch, cleared by the next success.
    pub error: Option<String>,
}

impl<T> LiveState<T> {
    /// The state before the first fetch completes.
    pub fn initial() -> Self {
        Self {
            data: None,
            is_loading: true,
            error: None,
        }
    }

    /// Returns true once data has been fetched at least once.
    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    pub(crate) fn apply(&mut self, result: Result<T, String>) {
        self.is_loading = false;
        match result {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
            }
            // The previous data stays visible next to the error.
            Err(message) => self.error = Some(message),
        }
    }
}

impl<T> Default for LiveState<T> {
    fn default() -> Self {
        Self::initial()
    }
}
