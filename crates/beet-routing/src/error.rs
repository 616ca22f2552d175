use thiserror::Error;

/// Mistakes in a route declaration; all of them abort startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteConfigError {
    #[error("route under '{path}' declares a phrase that is empty after trimming")]
    EmptyPhrase { path: String },
    #[error("phrase '{phrase}' is already bound by a sibling route under '{path}'")]
    DuplicatePhrase { path: String, phrase: String },
    #[error("route '{path}' already has a handler")]
    DuplicateHandler { path: String },
    #[error("route '{path}' already has an interceptor")]
    DuplicateInterceptor { path: String },
}
