//! Declarative phrase routing tree.
//!
//! Lookup walks the tree from the root. At each node the node's handler runs
//! first with the path matched so far; then the first child whose phrase is a
//! case-insensitive prefix of the remaining text (and is not followed by
//! another letter or digit) is entered with that phrase consumed. When no child
//! accepts the text, the node's interceptor receives whatever is left.

use std::cmp::Reverse;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use beet_events::{MessageEvent, SenderKind};

use crate::error::RouteConfigError;
use crate::matching::{continues_word, match_phrase_prefix, strip_separators};


#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePath {
    /// Matched phrases joined by single spaces, as they appeared in the text.
    pub passed_path: String,
    pub rest_of_message: String,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub route: RoutePath,
    pub message: Arc<MessageEvent>,
}

#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn call(&self, call: Call) -> Result<()>;
}

#[async_trait]
impl<F, Fut> RouteHandler for F
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn call(&self, call: Call) -> Result<()> {
        (self)(call).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Handler,
    Interceptor,
}

/// One handler or interceptor selected by [`RouteTree::resolve`].
#[derive(Clone)]
pub struct RouteInvocation {
    pub kind: InvocationKind,
    pub route: RoutePath,
    handler: Arc<dyn RouteHandler>,
}

impl RouteInvocation {
    pub async fn invoke(self, message: Arc<MessageEvent>) -> Result<()> {
        self.handler
            .call(Call {
                route: self.route,
                message,
            })
            .await
    }
}

impl std::fmt::Debug for RouteInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteInvocation")
            .field("kind", &self.kind)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

struct RouteNode {
    phrases: Vec<String>,
    only_incoming: bool,
    sender_kind: Option<SenderKind>,
    handler: Option<Arc<dyn RouteHandler>>,
    interceptor: Option<Arc<dyn RouteHandler>>,
    children: Vec<RouteNode>,
}

impl RouteNode {
    fn longest_phrase(&self) -> usize {
        self.phrases
            .first()
            .map(|phrase| phrase.chars().count())
            .unwrap_or(0)
    }

    fn accepts_sender(&self, outbound: bool, kind: SenderKind) -> bool {
        if self.only_incoming && outbound {
            return false;
        }
        self.sender_kind.map_or(true, |required| required == kind)
    }

    /// Byte length of the matched phrase, or `Some(0)` for a phrase-less scope.
    fn match_text(&self, text: &str) -> Option<usize> {
        if self.phrases.is_empty() {
            return Some(0);
        }
        let matched = self
            .phrases
            .iter()
            .find_map(|phrase| match_phrase_prefix(text, phrase))?;
        if continues_word(&text[matched..]) {
            return None;
        }
        Some(matched)
    }
}

/// Builder handed to the closures of [`RouteTree::build`].
pub struct RouteBuilder {
    path: String,
    node: RouteNode,
}

impl RouteBuilder {
    fn root() -> Self {
        Self {
            path: String::new(),
            node: RouteNode {
                phrases: Vec::new(),
                only_incoming: false,
                sender_kind: None,
                handler: None,
                interceptor: None,
                children: Vec::new(),
            },
        }
    }

    /// Binds a child matching any of `phrases`, for messages in either direction.
    pub fn on_message<F>(&mut self, phrases: &[&str], build: F) -> Result<(), RouteConfigError>
    where
        F: FnOnce(&mut RouteBuilder) -> Result<(), RouteConfigError>,
    {
        self.bind(phrases, false, None, build)
    }

    /// Like [`RouteBuilder::on_message`] but ignores messages the bot sent itself.
    pub fn on_incoming_message<F>(
        &mut self,
        phrases: &[&str],
        build: F,
    ) -> Result<(), RouteConfigError>
    where
        F: FnOnce(&mut RouteBuilder) -> Result<(), RouteConfigError>,
    {
        self.bind(phrases, true, None, build)
    }

    /// Binds a child that only matches messages from senders of `kind`.
    /// An empty phrase list scopes without consuming any text.
    pub fn on_message_from<F>(
        &mut self,
        kind: SenderKind,
        phrases: &[&str],
        build: F,
    ) -> Result<(), RouteConfigError>
    where
        F: FnOnce(&mut RouteBuilder) -> Result<(), RouteConfigError>,
    {
        self.bind(phrases, false, Some(kind), build)
    }

    pub fn handle<H>(&mut self, handler: H) -> Result<(), RouteConfigError>
    where
        H: RouteHandler + 'static,
    {
        if self.node.handler.is_some() {
            return Err(RouteConfigError::DuplicateHandler {
                path: self.display_path(),
            });
        }
        self.node.handler = Some(Arc::new(handler));
        Ok(())
    }

    pub fn intercept<H>(&mut self, interceptor: H) -> Result<(), RouteConfigError>
    where
        H: RouteHandler + 'static,
    {
        if self.node.interceptor.is_some() {
            return Err(RouteConfigError::DuplicateInterceptor {
                path: self.display_path(),
            });
        }
        self.node.interceptor = Some(Arc::new(interceptor));
        Ok(())
    }

    fn bind<F>(
        &mut self,
        phrases: &[&str],
        only_incoming: bool,
        sender_kind: Option<SenderKind>,
        build: F,
    ) -> Result<(), RouteConfigError>
    where
        F: FnOnce(&mut RouteBuilder) -> Result<(), RouteConfigError>,
    {
        let mut normalized: Vec<String> = Vec::with_capacity(phrases.len());
        for phrase in phrases {
            let trimmed = phrase.trim();
            if trimmed.is_empty() {
                return Err(RouteConfigError::EmptyPhrase {
                    path: self.display_path(),
                });
            }
            if trimmed.len() != phrase.len() {
                tracing::warn!(
                    phrase = *phrase,
                    path = %self.display_path(),
                    "route phrase has surrounding whitespace, trimming"
                );
            }
            let taken_by_sibling = self
                .node
                .children
                .iter()
                .any(|child| child.phrases.iter().any(|existing| existing == trimmed));
            if taken_by_sibling || normalized.iter().any(|existing| existing == trimmed) {
                return Err(RouteConfigError::DuplicatePhrase {
                    path: self.display_path(),
                    phrase: trimmed.to_string(),
                });
            }
            normalized.push(trimmed.to_string());
        }
        normalized.sort_by_key(|phrase| Reverse(phrase.chars().count()));

        if only_incoming && self.node.only_incoming {
            tracing::warn!(
                path = %self.display_path(),
                "incoming-only route nested in an incoming-only scope"
            );
        }

        let path = match normalized.first() {
            Some(phrase) if self.path.is_empty() => phrase.clone(),
            Some(phrase) => format!("{} {phrase}", self.path),
            None => self.path.clone(),
        };
        let mut child = RouteBuilder {
            path,
            node: RouteNode {
                phrases: normalized,
                only_incoming: only_incoming || self.node.only_incoming,
                sender_kind: sender_kind.or(self.node.sender_kind),
                handler: None,
                interceptor: None,
                children: Vec::new(),
            },
        };
        build(&mut child)?;
        self.node.children.push(child.finish());
        Ok(())
    }

    fn finish(mut self) -> RouteNode {
        self.node
            .children
            .sort_by_key(|child| Reverse(child.longest_phrase()));
        self.node
    }

    fn display_path(&self) -> String {
        if self.path.is_empty() {
            "<root>".to_string()
        } else {
            self.path.clone()
        }
    }
}

/// Immutable routing tree; cloning shares the same nodes.
#[derive(Clone)]
pub struct RouteTree {
    root: Arc<RouteNode>,
}

impl RouteTree {
    pub fn build<F>(declare: F) -> Result<Self, RouteConfigError>
    where
        F: FnOnce(&mut RouteBuilder) -> Result<(), RouteConfigError>,
    {
        let mut root = RouteBuilder::root();
        declare(&mut root)?;
        Ok(Self {
            root: Arc::new(root.finish()),
        })
    }

    /// Selects, in call order, every handler and the interceptor (if any) that
    /// `text` reaches.
    pub fn resolve(&self, text: &str, outbound: bool, kind: SenderKind) -> Vec<RouteInvocation> {
        let mut invocations = Vec::new();
        let mut node = self.root.as_ref();
        let mut passed_path = String::new();
        let mut rest = text;

        loop {
            if let Some(handler) = &node.handler {
                invocations.push(RouteInvocation {
                    kind: InvocationKind::Handler,
                    route: RoutePath {
                        passed_path: passed_path.clone(),
                        rest_of_message: rest.to_string(),
                    },
                    handler: handler.clone(),
                });
            }

            let next = node.children.iter().find_map(|child| {
                if !child.accepts_sender(outbound, kind) {
                    return None;
                }
                child.match_text(rest).map(|matched| (child, matched))
            });

            match next {
                Some((child, matched)) => {
                    if matched > 0 {
                        let slice = &rest[..matched];
                        if !passed_path.is_empty() {
                            passed_path.push(' ');
                        }
                        passed_path.push_str(slice);
                        rest = strip_separators(&rest[matched..]);
                    }
                    node = child;
                }
                None => {
                    if let Some(interceptor) = &node.interceptor {
                        invocations.push(RouteInvocation {
                            kind: InvocationKind::Interceptor,
                            route: RoutePath {
                                passed_path,
                                rest_of_message: rest.to_string(),
                            },
                            handler: interceptor.clone(),
                        });
                    }
                    return invocations;
                }
            }
        }
    }

    /// Runs every invocation `message` resolves to, in order. All of them run
    /// even when one fails; the first failure is returned.
    pub async fn dispatch(&self, message: Arc<MessageEvent>) -> Result<usize> {
        let invocations = self.resolve(&message.text, message.is_outbox(), message.sender_kind());
        let count = invocations.len();
        let mut first_error = None;
        for invocation in invocations {
            let kind = invocation.kind;
            let passed_path = invocation.route.passed_path.clone();
            if let Err(error) = invocation.invoke(message.clone()).await {
                tracing::warn!(
                    peer_id = message.peer_id,
                    message_id = message.message_id,
                    ?kind,
                    route = %passed_path,
                    error = %format!("{error:#}"),
                    "route handler failed"
                );
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(count),
        }
    }
}
