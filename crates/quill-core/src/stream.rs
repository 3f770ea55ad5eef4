use crate::errors::CompletionError;

/// One element of a streamed completion.
///
/// A stream carries `Text` fragments in arrival order. `Error` only ever appears
/// as the sole element, when the request failed before any data was read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFragment {
    Text(String),
    Error(CompletionError),
}

impl StreamFragment {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Text to show the user for this fragment, including error fragments.
    pub fn display_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Error(e) => format!("[{e}]"),
        }
    }
}
