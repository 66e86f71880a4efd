/// Reasons an annotation can be refused or fail.
///
/// The first three are raised before anything is sent; their messages are
/// shown to the user as-is.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnnotateError {
    #[error("Select some content first.")]
    EmptySelection,
    #[error("Configure the AI service first (missing {0}).")]
    MissingConfig(&'static str),
    #[error("The selected text is empty; nothing to analyze.")]
    EmptyText,
    #[error("an annotation is already running")]
    AlreadyRunning,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("stream error: {0}")]
    Stream(String),
}

impl AnnotateError {
    /// Whether the request was refused locally, before any network activity.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AnnotateError::EmptySelection
                | AnnotateError::MissingConfig(_)
                | AnnotateError::EmptyText
                | AnnotateError::AlreadyRunning
        )
    }
}
