//! `добавь {меня|id}`: approves a friend request the user already sent.

use anyhow::{Context, Result};
use beet_events::{Messenger, FRIEND_REQUESTS_PAGE_SIZE};

pub const INVALID_USER_ID_REPLY: &str = "Укажите корректный id пользователя.";
pub const REQUEST_FIRST_REPLY: &str = "Сперва отправь мне запрос в друзья.";
pub const REQUEST_APPROVED_REPLY: &str = "Заявка в друзья одобрена.";
pub const PLATFORM_ERROR_REPLY: &str = "Произошла ошибка.";

/// `меня` names the author; otherwise the digits following `id` (or leading the text).
pub fn requested_user_id(rest_of_message: &str, author_id: i64) -> Option<i64> {
    let rest = rest_of_message.trim();
    let user_id = if rest.to_lowercase().starts_with("меня") {
        author_id
    } else {
        let digits_from = rest.find("id").map_or(rest, |index| &rest[index + 2..]);
        let digits = digits_from
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>();
        digits.parse::<i64>().ok()?
    };
    (user_id > 0).then_some(user_id)
}

/// Returns the reply text; platform failures come back as errors.
pub async fn approve_friend(messenger: &dyn Messenger, user_id: i64) -> Result<&'static str> {
    let mut pending = Vec::new();
    loop {
        let page = messenger
            .fetch_friend_requests(pending.len())
            .await
            .context("failed to list pending friend requests")?;
        let last_page = page.len() < FRIEND_REQUESTS_PAGE_SIZE;
        pending.extend(page);
        if last_page {
            break;
        }
    }

    if !pending.contains(&user_id) {
        return Ok(REQUEST_FIRST_REPLY);
    }
    messenger
        .approve_friend_request(user_id)
        .await
        .with_context(|| format!("failed to approve friend request from {user_id}"))?;
    Ok(REQUEST_APPROVED_REPLY)
}
