//! Phrase-prefix command routing.
//!
//! A [`RouteTree`] is declared once at startup with [`RouteTree::build`] and is
//! read-only afterwards, so it can be shared across conversation workers.

mod error;
mod matching;
pub mod route_tree;

pub use error::RouteConfigError;
pub use matching::{match_phrase_prefix, strip_separators};
pub use route_tree::{
    Call, InvocationKind, RouteBuilder, RouteHandler, RouteInvocation, RoutePath, RouteTree,
};
