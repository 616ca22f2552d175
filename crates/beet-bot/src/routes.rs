//! Chat commands the bot answers to.
//!
//! Every chat message is appended to the history store. Messages addressed to
//! the bot by name (`бет`, `бетховен`) are matched against the commands below;
//! anything else said in a chat is offered to the quiz as an answer. Direct
//! messages only understand `добавь`.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use beet_events::{Messenger, SenderKind};
use beet_quiz::QuizEngine;
use beet_routing::{Call, RouteConfigError, RouteTree};
use beet_store::{HistoryRecord, JsonlHistoryStore};

use crate::friend_requests::{
    approve_friend, requested_user_id, INVALID_USER_ID_REPLY, PLATFORM_ERROR_REPLY,
};


pub const HELP_REPLY: &str = "Я откликаюсь на: Бет, Бетховен\n\n\
Доступные команды:\n\
• викторина [стоп]\n\
• добавь {меня} или {id} - одобрение заявки в друзья\n\
• помощь\n\
• о себе";

pub const ABOUT_REPLY: &str = "Ты не робот, а я - да.";

/// Shared collaborators of every route handler.
pub struct BotContext {
    pub messenger: Arc<dyn Messenger>,
    pub quiz: QuizEngine,
    pub history: JsonlHistoryStore,
}

fn bind<F, Fut>(
    context: &Arc<BotContext>,
    action: F,
) -> impl Fn(Call) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<BotContext>, Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let context = context.clone();
    move |call| action(context.clone(), call)
}

pub fn build_routes(context: Arc<BotContext>) -> Result<RouteTree, RouteConfigError> {
    RouteTree::build(|root| {
        root.on_message_from(SenderKind::Chat, &[], |chat| {
            chat.handle(bind(&context, save_chat_message))?;
            chat.intercept(bind(&context, check_quiz_answer))?;
            chat.on_incoming_message(&["бет", "бетховен"], |bot| {
                bot.on_message(&["викторина"], |quiz| {
                    quiz.on_message(&["стоп"], |stop| stop.intercept(bind(&context, stop_quiz)))?;
                    quiz.intercept(bind(&context, start_quiz))
                })?;
                bot.on_message(&["помощь", "команды"], |help| {
                    help.intercept(bind(&context, |context, call| {
                        respond_with_forward(context, call, HELP_REPLY)
                    }))
                })?;
                bot.on_message(&["о себе", "инфо"], |about| {
                    about.intercept(bind(&context, |context, call| {
                        respond_with_forward(context, call, ABOUT_REPLY)
                    }))
                })?;
                bot.on_message(&["добавь"], |add| add.intercept(bind(&context, add_friend)))
            })
        })?;
        root.on_message_from(SenderKind::User, &[], |user| {
            user.on_incoming_message(&["добавь"], |add| {
                add.intercept(bind(&context, add_friend))
            })
        })
    })
}

async fn save_chat_message(context: Arc<BotContext>, call: Call) -> Result<()> {
    let written = context
        .history
        .append(&[HistoryRecord::from_event(&call.message)])?;
    tracing::trace!(
        peer_id = call.message.peer_id,
        message_id = call.message.message_id,
        written,
        "chat message captured"
    );
    Ok(())
}

async fn check_quiz_answer(context: Arc<BotContext>, call: Call) -> Result<()> {
    if call.message.is_outbox() {
        return Ok(());
    }
    context
        .quiz
        .check_answer(
            call.message.peer_id,
            call.message.message_id,
            &call.route.rest_of_message,
        )
        .await?;
    Ok(())
}

async fn start_quiz(context: Arc<BotContext>, call: Call) -> Result<()> {
    context
        .quiz
        .start(call.message.peer_id, call.message.message_id)
        .await
}

async fn stop_quiz(context: Arc<BotContext>, call: Call) -> Result<()> {
    context
        .quiz
        .stop(call.message.peer_id, call.message.message_id)
        .await
}

async fn add_friend(context: Arc<BotContext>, call: Call) -> Result<()> {
    let author_id = call.message.sender.author_id();
    let reply = match requested_user_id(&call.route.rest_of_message, author_id) {
        None => INVALID_USER_ID_REPLY,
        Some(user_id) => match approve_friend(context.messenger.as_ref(), user_id).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(
                    peer_id = call.message.peer_id,
                    user_id,
                    error = %format!("{error:#}"),
                    "friend request approval failed"
                );
                PLATFORM_ERROR_REPLY
            }
        },
    };
    respond_with_forward(context, call, reply).await
}

async fn respond_with_forward(context: Arc<BotContext>, call: Call, text: &'static str) -> Result<()> {
    let peer_id = call.message.peer_id;
    if let Err(error) = context
        .messenger
        .send_message(peer_id, text, &[call.message.message_id])
        .await
    {
        tracing::warn!(
            peer_id,
            route = %call.route.passed_path,
            error = %format!("{error:#}"),
            "failed to send command reply"
        );
    }
    Ok(())
}
